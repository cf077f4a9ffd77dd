//! Console logging setup for the tracing ecosystem.
//!
//! Environment-aware console logging for containerized deployments:
//! logs go to stdout, the level comes from `RUST_LOG` (default `info`),
//! and ANSI colors are enabled only on a TTY.

use std::io::IsTerminal;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; subsequent calls are no-ops so tests can
/// initialize logging without coordinating.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_ansi(std::io::stdout().is_terminal())
        .with_target(true)
        .compact()
        .try_init();
}
