//! Operator notifications for startup-gate and rotation outcomes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::error::{Result, SecretsError};
use super::types::SecretString;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex hmac of body>` on webhook deliveries.
pub const SIGNATURE_HEADER: &str = "X-Keyward-Signature";

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// An operator-facing alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            metadata,
            timestamp: Utc::now(),
        }
    }
}

/// Admin notification collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn alert(&self, alert: &Alert) -> Result<()>;
}

/// Emits alerts as log events, at a level matching the severity.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn alert(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            Severity::Info => {
                info!(title = %alert.title, metadata = %alert.metadata, "{}", alert.message)
            }
            Severity::Warning => {
                warn!(title = %alert.title, metadata = %alert.metadata, "{}", alert.message)
            }
            Severity::High | Severity::Critical => error!(
                title = %alert.title,
                severity = %alert.severity,
                metadata = %alert.metadata,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// Notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Endpoint receiving JSON alerts; alerts are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Shared secret for the signature header.
    #[serde(default)]
    pub webhook_secret: Option<SecretString>,
}

/// Posts alerts as JSON to a webhook with retries and an HMAC signature.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<SecretString>,
    max_retries: u32,
    retry_delay: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: Option<SecretString>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SecretsError::config_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, url: url.into(), secret, max_retries: 3, retry_delay: Duration::from_secs(1) })
    }

    /// Override the retry policy (attempts include the first try).
    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    fn signature(&self, body: &[u8]) -> Result<Option<String>> {
        let Some(secret) = &self.secret else {
            return Ok(None);
        };
        let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| SecretsError::config_error(format!("Invalid webhook secret: {}", e)))?;
        mac.update(body);
        Ok(Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes()))))
    }

    async fn send(&self, body: &[u8]) -> std::result::Result<reqwest::StatusCode, String> {
        let mut request =
            self.client.post(&self.url).header("Content-Type", "application/json");

        if let Some(signature) = self.signature(body).map_err(|e| e.to_string())? {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.body(body.to_vec()).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("webhook endpoint returned error status: {}", status));
        }
        Ok(status)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn alert(&self, alert: &Alert) -> Result<()> {
        let body = serde_json::to_vec(alert)?;

        for attempt in 1..=self.max_retries {
            match self.send(&body).await {
                Ok(status) => {
                    info!(
                        url = %self.url,
                        title = %alert.title,
                        status_code = status.as_u16(),
                        attempt = attempt,
                        "Alert delivered"
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    warn!(url = %self.url, error = %e, attempt = attempt, "Alert delivery failed, retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(e) => {
                    error!(
                        url = %self.url,
                        error = %e,
                        attempts = self.max_retries,
                        "Alert delivery failed after all retries"
                    );
                    return Err(SecretsError::provider_unavailable("webhook", e));
                }
            }
        }

        Ok(())
    }
}

/// Webhook notifier when a URL is configured, otherwise log-only.
pub fn notifier_from_config(config: &NotificationConfig) -> Result<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url.clone(), config.webhook_secret.clone())?)),
        None => Ok(Arc::new(TracingNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert() -> Alert {
        Alert::new(
            "Critical secrets unavailable",
            "missing: [A]",
            Severity::High,
            serde_json::json!({ "missing": ["A"] }),
        )
    }

    #[tokio::test]
    async fn test_tracing_notifier_accepts_all_severities() {
        let notifier = TracingNotifier;
        for severity in [Severity::Info, Severity::Warning, Severity::High, Severity::Critical] {
            let alert = Alert { severity, ..alert() };
            assert!(notifier.alert(&alert).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_webhook_delivers_signed_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .and(header_exists(SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(
            format!("{}/alerts", server.uri()),
            Some(SecretString::new("webhook-secret")),
        )
        .unwrap();
        notifier.alert(&alert()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let body: Alert = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body.severity, Severity::High);

        let header = request.headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        let mut mac = HmacSha256::new_from_slice(b"webhook-secret").unwrap();
        mac.update(&request.body);
        assert_eq!(header, format!("sha256={}", hex::encode(mac.finalize().into_bytes())));
    }

    #[tokio::test]
    async fn test_webhook_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri(), None)
            .unwrap()
            .with_retry_policy(3, Duration::from_millis(10));
        let err = notifier.alert(&alert()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_notifier_from_config() {
        assert!(notifier_from_config(&NotificationConfig::default()).is_ok());
        let config = NotificationConfig {
            webhook_url: Some("http://localhost:9/alerts".to_string()),
            webhook_secret: None,
        };
        assert!(notifier_from_config(&config).is_ok());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    }
}
