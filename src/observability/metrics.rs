//! # Metrics Collection
//!
//! Prometheus metrics for the secret store and rotation coordinator. The
//! `metrics` macros are no-ops until a recorder is installed, so library
//! users that never call [`init_metrics`] pay nothing.

use crate::config::ObservabilityConfig;
use crate::errors::{KeywardError, Result};
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metrics recorder that tracks secret store metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self) {
        counter!("secrets_cache_hits_total").increment(1);
    }

    /// Record a cache miss (absent, expired, undecryptable or forced)
    pub fn record_cache_miss(&self, reason: &'static str) {
        counter!("secrets_cache_misses_total", "reason" => reason).increment(1);
    }

    /// Record a provider fetch with its outcome and duration
    pub fn record_provider_fetch(&self, backend: &str, outcome: &'static str, duration: f64) {
        let labels = [("backend", backend.to_string()), ("outcome", outcome.to_string())];
        counter!("secrets_provider_fetch_total", &labels).increment(1);

        let duration_labels = [("backend", backend.to_string())];
        histogram!("secrets_provider_fetch_duration_seconds", &duration_labels).record(duration);
    }

    /// Record a read served by the environment fallback
    pub fn record_fallback(&self, primary: &str) {
        let labels = [("primary", primary.to_string())];
        counter!("secrets_fallback_reads_total", &labels).increment(1);
    }

    /// Record a rotation or rollback outcome
    pub fn record_rotation(&self, outcome: &'static str) {
        counter!("secrets_rotations_total", "outcome" => outcome).increment(1);
    }

    /// Register descriptions so Prometheus exports appear before events occur.
    pub fn register_secrets_metrics(&self) {
        describe_counter!("secrets_cache_hits_total", Unit::Count, "Reads served from the cache");
        describe_counter!(
            "secrets_cache_misses_total",
            Unit::Count,
            "Reads that had to consult a provider"
        );
        describe_counter!(
            "secrets_provider_fetch_total",
            Unit::Count,
            "Provider fetches by backend and outcome"
        );
        describe_histogram!(
            "secrets_provider_fetch_duration_seconds",
            Unit::Seconds,
            "Provider fetch latency"
        );
        describe_counter!(
            "secrets_fallback_reads_total",
            Unit::Count,
            "Reads served by the environment fallback"
        );
        describe_counter!("secrets_rotations_total", Unit::Count, "Key rotations by outcome");
    }
}

/// Initialize metrics collection and Prometheus exporter
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        KeywardError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| KeywardError::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    MetricsRecorder::new().register_secrets_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let recorder = MetricsRecorder::new();
        recorder.record_cache_hit();
        recorder.record_cache_miss("expired");
        recorder.record_provider_fetch("env", "success", 0.001);
        recorder.record_fallback("kv-store");
        recorder.record_rotation("completed");
        recorder.register_secrets_metrics();
    }

    #[test]
    fn test_init_metrics_disabled() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };
        assert!(init_metrics(&config).is_ok());

        let config = ObservabilityConfig { metrics_port: 0, ..Default::default() };
        assert!(init_metrics(&config).is_ok());
    }
}
