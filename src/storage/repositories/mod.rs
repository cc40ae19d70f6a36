//! Postgres repositories for key backups and the secret audit log.

pub mod audit_log;
pub mod key_backup;

pub use audit_log::{AuditLogRow, PgAuditSink};
pub use key_backup::PgBackupStore;
