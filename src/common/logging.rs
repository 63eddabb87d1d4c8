//! Logging setup
//!
//! Thin wrapper around `tracing-subscriber`. The engine itself only emits
//! events through `tracing`; without a subscriber every event is a no-op,
//! which keeps the task probes free when telemetry is not wanted.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceLock<()> = OnceLock::new();

/// Initialize stderr logging at the given default level. `RUST_LOG` wins if
/// set. Safe to call more than once; only the first call takes effect.
pub fn init_with_level(level: &str) {
    let level = level.to_string();
    INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let _ = fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// Initialize stderr logging at `info`.
pub fn init() {
    init_with_level("info");
}
