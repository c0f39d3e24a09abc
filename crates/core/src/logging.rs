//! Tracing subscriber setup for processes embedding the engine.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the host process, which can call [`init_tracing`] once at startup.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `level` (an `EnvFilter` directive
/// such as `info` or `taskmerge_core=debug`).
///
/// An unparseable directive falls back to `info`. Returns `false` if a global
/// subscriber was already installed.
pub fn init_tracing(level: &str) -> bool {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .try_init()
        .is_ok()
}
