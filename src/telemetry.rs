//! Logging setup.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level. Returns an error if a global
/// subscriber is already installed.
pub fn init_tracing(config: &Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("immoguard=debug,info"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.log_format == "json" {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    }
}
