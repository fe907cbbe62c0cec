//! Process-wide `tracing` subscriber.
//!
//! The subscriber is installed before the configuration is read, so that
//! loading problems are logged, and [`apply_logging_level`] swaps in the
//! configured filter afterwards. `RUST_LOG` always takes precedence.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

const DEFAULT_LEVEL: &str = "info";

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Installs the subscriber with the default `info` level.
pub fn init_tracing() {
    init_tracing_with_level(DEFAULT_LEVEL);
}

pub fn init_tracing_with_level(level: &str) {
    let (filter, handle) = reload::Layer::new(initial_filter(level));
    if FILTER_HANDLE.set(handle).is_err() {
        return;
    }

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
    {
        eprintln!("Warning: tracing subscriber not installed: {e}");
    }
}

/// Replaces the active filter with `level` unless `RUST_LOG` is set.
pub fn apply_logging_level(level: &str) {
    if rust_log_set() {
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    match handle.reload(EnvFilter::new(level)) {
        Ok(()) => tracing::debug!(level, "logging level applied"),
        Err(e) => tracing::warn!(error = %e, level, "failed to apply logging level"),
    }
}

fn rust_log_set() -> bool {
    std::env::var_os(EnvFilter::DEFAULT_ENV).is_some()
}

fn initial_filter(level: &str) -> EnvFilter {
    if rust_log_set() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    }
}
