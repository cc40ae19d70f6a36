//! Key rotation: the rotation saga, its backups and the periodic trigger.

pub mod backup;
pub mod coordinator;
pub mod scheduler;

pub use backup::{BackupStore, InMemoryBackupStore, KeyBackup};
pub use coordinator::{
    KeyRotationCoordinator, RollbackOutcome, RotationOutcome, RotationRequest, RotationState,
    RotationTrigger, PREVIOUS_PREFIX, STAGING_PREFIX,
};
pub use scheduler::{RotationScheduler, SchedulerHandle};
