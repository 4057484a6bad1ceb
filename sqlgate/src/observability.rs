//! Structured logging setup

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Initialize JSON tracing to stderr
///
/// `RUST_LOG` wins when set; otherwise the filter comes from
/// `service.log_level`, and an unparsable directive falls back to `info`.
/// Calling this more than once is harmless: only the first subscriber is
/// installed.
pub fn init_tracing(config: &Config) -> Result<()> {
    let installed = tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(&config.service.log_level))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            database = %config.database.redacted_url(),
            dialect = %config.database.dialect,
            "Tracing initialized for service: {}",
            config.service.name
        );
    }

    Ok(())
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        let config = Config::default();
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_ok());
    }

    #[test]
    fn test_configured_level_applies_without_rust_log() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(env_filter("sqlgate=debug").to_string(), "sqlgate=debug");
        assert_eq!(env_filter("sqlgate=loud").to_string(), "info");
    }
}
