//! Logger setup for command-line runs.

use anyhow::{Context, Result};
use log::LevelFilter;

/// Install an `env_logger` logger with the given filter, e.g. `"info"` or
/// `"covariant=debug,covariant_core=trace"`. `RUST_LOG` is not consulted.
///
/// Fails if a logger is already installed.
pub fn init_with_level(filter: &str) -> Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .parse_filters(filter)
        .format_timestamp_millis()
        .try_init()
        .with_context(|| format!("installing logger with filter '{filter}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_installs_once() {
        init_with_level("covariant=debug").unwrap();
        log::debug!("logger installed");
        assert!(log::log_enabled!(target: "covariant", log::Level::Debug));
        let err = init_with_level("info").unwrap_err();
        assert!(err.to_string().contains("'info'"));
    }
}
