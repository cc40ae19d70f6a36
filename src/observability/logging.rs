//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins over the
//! configured level so operators can raise verbosity without editing config.
//!
//! Audit events are emitted on the `keyward::audit` target and can be routed
//! separately with a directive such as `keyward::audit=info`.

use crate::config::{KeywardConfig, ObservabilityConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// Build the filter from `RUST_LOG`, falling back to the configured level.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already set (integration tests,
/// embedding applications); that case is not an error.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let builder = fmt().with_env_filter(env_filter(config)).with_target(true);

    let result = if config.json_logging {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };

    result.is_ok()
}

/// Log configuration at startup
pub fn log_config_info(config: &KeywardConfig) {
    tracing::info!(
        backend = %config.secrets.backend,
        default_ttl_seconds = config.secrets.default_ttl_seconds,
        refresh_interval_seconds = config.secrets.refresh_interval().as_secs(),
        critical_secrets = config.secrets.critical_secrets.len(),
        rotation_scheduled = config.rotation.schedule_interval_hours.is_some(),
        database_enabled = config.database.is_some(),
        webhook_enabled = config.notifications.webhook_url.is_some(),
        metrics_enabled = %config.observability.enable_metrics,
        "keyward configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_uses_configured_level() {
        let config = ObservabilityConfig { log_level: "keyward=debug".to_string(), ..Default::default() };
        // Only checks the directive parses; RUST_LOG may be set in CI.
        let _filter = env_filter(&config);
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        let config = ObservabilityConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }

    #[test]
    fn test_log_config_info() {
        let config = KeywardConfig::default();

        // This should not panic
        log_config_info(&config);
    }
}
