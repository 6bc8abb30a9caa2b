//! Logging setup
//!
//! Filter comes from `UBLUE_LOG` (EnvFilter syntax), `info` when unset or
//! unparseable.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "UBLUE_LOG";
const DEFAULT_FILTER: &str = "info";

pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second init (tests) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
