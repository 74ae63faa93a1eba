//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global fmt subscriber filtered by `RUST_LOG`, defaulting
/// to `info` when unset. Safe to call more than once; later calls are
/// no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

/// Like [`init_tracing`], but emits one JSON object per event, for
/// log-pipeline consumption.
pub fn init_tracing_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).json().try_init();
}
