//! Audit log repository for secret access events

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::secrets::audit::{AuditAction, AuditEvent, AuditSink};
use crate::secrets::{Result, SecretsError};
use crate::storage::DbPool;

/// Stored audit row. Values appear only as fingerprint and signature.
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRow {
    pub id: Uuid,
    pub action: String,
    pub secret_key: String,
    pub fingerprint: String,
    pub signature: String,
    pub backend: String,
    pub backup_id: Option<Uuid>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Appends audit events to `secret_audit_log`.
#[derive(Debug, Clone)]
pub struct PgAuditSink {
    pool: DbPool,
}

impl PgAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Most recent events for `key`, newest first.
    pub async fn recent_for_key(&self, key: &str, limit: i64) -> Result<Vec<AuditLogRow>> {
        sqlx::query_as::<_, AuditLogRow>(
            "SELECT id, action, secret_key, fingerprint, signature, backend, backup_id, error, created_at \
             FROM secret_audit_log WHERE secret_key = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SecretsError::persistence(format!("Failed to read audit log: {}", e)))
    }

    /// Count of events with `action`.
    pub async fn count_action(&self, action: AuditAction) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM secret_audit_log WHERE action = $1")
            .bind(action.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SecretsError::persistence(format!("Failed to count audit events: {}", e)))
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO secret_audit_log (id, action, secret_key, fingerprint, signature, backend, backup_id, error, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(event.id)
        .bind(event.action.as_str())
        .bind(&event.key)
        .bind(&event.fingerprint)
        .bind(&event.signature)
        .bind(&event.backend)
        .bind(event.backup_id)
        .bind(event.error.as_deref())
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| SecretsError::persistence(format!("Failed to write secret audit event: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #[cfg(feature = "postgres_tests")]
    mod postgres_tests {
        use super::super::*;
        use crate::secrets::{AuditRecorder, SecretString};
        use crate::storage::test_helpers::TestDatabase;
        use std::sync::Arc;
        use std::time::Duration;

        #[tokio::test]
        async fn test_events_are_persisted_without_values() {
            let db = TestDatabase::new("audit_log_persist").await;
            let sink = Arc::new(PgAuditSink::new(db.pool.clone()));
            let recorder = AuditRecorder::new(
                &SecretString::new("audit-log-test-source-0123456789abcdefgh"),
                sink.clone(),
                Duration::from_secs(5),
            )
            .unwrap();

            let value = SecretString::new("live-jwt-secret-value-0123456789abcdef");
            let backup_id = Uuid::new_v4();
            recorder
                .record(
                    recorder
                        .event(AuditAction::SecretRotated, "JWT_SECRET", "kv-store", Some(&value))
                        .with_backup(backup_id),
                )
                .await;
            recorder
                .record(
                    recorder
                        .event(AuditAction::SecretRotationFailed, "JWT_SECRET", "kv-store", None)
                        .with_error("staging failed"),
                )
                .await;

            let rows = sink.recent_for_key("JWT_SECRET", 10).await.unwrap();
            assert_eq!(rows.len(), 2);
            assert!(rows.iter().all(|row| row.backend == "kv-store"));

            let rotated = rows.iter().find(|row| row.backup_id == Some(backup_id)).unwrap();
            assert!(recorder.verify(&rotated.fingerprint, &rotated.signature));
            assert!(!format!("{:?}", rows).contains(value.expose_secret()));

            assert_eq!(sink.count_action(AuditAction::SecretRotationFailed).await.unwrap(), 1);
        }
    }
}
