//! Configuration sanity checks

use super::config::AppConfig;
use anyhow::{bail, Result};
use tracing::warn;

/// Reject unusable settings and warn about risky ones
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.execution.retry_count == 0 {
        bail!("execution.retry_count must be at least 1");
    }
    if config.execution.timeout_ms == 0 {
        bail!("execution.timeout_ms must be greater than 0");
    }
    if config.relay.max_message_bytes == 0 {
        bail!("relay.max_message_bytes must be greater than 0");
    }

    if config.relay.host != "127.0.0.1" && config.relay.host != "localhost" {
        warn!(
            host = %config.relay.host,
            "Relay is reachable from other hosts and does not authenticate connections. \
             Consider binding to 127.0.0.1."
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_are_valid() {
        assert_ok!(validate_config(&AppConfig::default()));
    }

    #[test]
    fn test_zero_retry_count_rejected() {
        let mut config = AppConfig::default();
        config.execution.retry_count = 0;
        let err = assert_err!(validate_config(&config));
        assert!(err.to_string().contains("retry_count"));
    }

    #[test]
    fn test_exposed_host_allowed() {
        let mut config = AppConfig::default();
        config.relay.host = "0.0.0.0".to_string();
        assert_ok!(validate_config(&config));
    }
}
