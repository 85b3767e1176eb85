// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Engine scenarios: timer cadence, cross-thread wakeup, ordering, and lifecycle.
//! These drive the condvar sleep path (no wait service attached); the readiness path
//! is covered by the wait module's scenarios.

mod service_scenarios;
