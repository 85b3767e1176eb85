// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Opt-in tracing subscriber setup for hosts that have none of their own.
//!
//! The runtime itself only *emits* `tracing` events; embedding applications usually
//! install their own subscriber. Binaries and tests that want to see runtime
//! diagnostics can call [`try_init_tracing`] once at startup.

use tracing_subscriber::EnvFilter;

/// Installs a stderr `fmt` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Idempotent in practice: when a global subscriber is already set the error is
/// reported instead of panicking, so library consumers can call this defensively.
///
/// # Errors
///
/// Returns the subscriber-installation failure, typically "a global default
/// subscriber has already been set".
pub fn try_init_tracing() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| miette::miette!("tracing init failed: {err}"))
}
