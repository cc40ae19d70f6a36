use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use keyward::{
    config::KeywardConfig,
    observability::{init_observability, log_config_info},
    rotation::{BackupStore, InMemoryBackupStore, KeyRotationCoordinator, RotationScheduler},
    secrets::{
        audit::AuditSink, notify::notifier_from_config, SecretCipher, SecretStore,
        TracingAuditSink,
    },
    storage::{create_pool, PgAuditSink, PgBackupStore},
    Result, APP_NAME, VERSION,
};
use tokio::signal;
use tracing::{error, info, warn};

/// Cached, audited secret store with scheduled key rotation.
#[derive(Debug, Parser)]
#[command(name = "keyward", version, about)]
struct Cli {
    /// Path to a TOML, YAML or JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists; must happen before config reads the environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    let config = KeywardConfig::load(cli.config.as_deref())?;

    init_observability(&config.observability)?;
    info!(app_name = APP_NAME, version = VERSION, "Starting keyward");
    log_config_info(&config);

    let (audit_sink, backups): (Arc<dyn AuditSink>, Arc<dyn BackupStore>) =
        match &config.database {
            Some(db_config) => {
                let pool = create_pool(db_config).await?;
                let cipher = SecretCipher::from_master(&config.secrets.encryption_key_source)?;
                (
                    Arc::new(PgAuditSink::new(pool.clone())),
                    Arc::new(PgBackupStore::new(pool, cipher)),
                )
            }
            None => {
                warn!("No database configured; key backups are kept in memory only");
                (Arc::new(TracingAuditSink), Arc::new(InMemoryBackupStore::new()))
            }
        };

    let notifier = notifier_from_config(&config.notifications)?;
    let store = SecretStore::from_config(&config.secrets, audit_sink, notifier).await?;

    if let Err(e) = store.assert_critical_secrets(&config.secrets.critical_secrets).await {
        error!(error = %e, "Critical secrets unavailable, refusing to start");
        std::process::exit(1);
    }

    store.start_background_refresh().await;

    let scheduler = config.rotation.schedule_interval().map(|interval| {
        let coordinator =
            Arc::new(KeyRotationCoordinator::new(store.clone(), backups, config.rotation.clone()));
        RotationScheduler::spawn(coordinator, interval)
    });

    info!(backend = %store.backend(), "keyward running, press Ctrl-C to stop");

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutdown signal received");
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    store.shutdown().await;

    info!("keyward shutdown completed");
    Ok(())
}
