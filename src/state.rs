use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::backup::drive::DriveClient;
use crate::backup::remote::{self, RemoteBackupFile};
use crate::backup::schedule::{self, AutoBackupOutcome};
use crate::backup::{local, RemoteStore, RestoreMode, RestoreSummary};
use crate::config::AppConfig;
use crate::db::Store;
use crate::security::{BiometricAuthenticator, Clock, SecurityGate, SystemClock};
use crate::settings::SettingsStore;
use crate::{AppError, AppResult};

/// Everything a front end needs, built once at startup and passed around by
/// clone. Settings and the session are owned here rather than held globally.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    pub settings: SettingsStore,
    pub gate: SecurityGate,
    pub maintenance: Arc<AtomicBool>,
}

impl AppState {
    /// Opens the database under the configured data directory and restores
    /// the previous session.
    pub async fn init(
        config: AppConfig,
        biometrics: Arc<dyn BiometricAuthenticator>,
    ) -> AppResult<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|err| {
            AppError::from(err).with_context("path", config.data_dir.display().to_string())
        })?;
        let store = Store::open(&config.db_path()).await?;
        Self::with_store(config, store, biometrics, Arc::new(SystemClock)).await
    }

    pub async fn with_store(
        config: AppConfig,
        store: Store,
        biometrics: Arc<dyn BiometricAuthenticator>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let settings = SettingsStore::load(&store).await?;
        let gate = SecurityGate::boot(&store, &settings, biometrics, clock).await?;
        info!(target: "minet", event = "app_state_ready", state = ?gate.state());
        Ok(Self {
            config: Arc::new(config),
            store,
            settings,
            gate,
            maintenance: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Bulk operations (restore, wipe) take this so two never overlap.
    pub fn begin_maintenance(&self) -> AppResult<MaintenanceGuard> {
        MaintenanceGuard::begin(self.maintenance.clone())
    }

    pub fn maintenance_active(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    /// Drive client for the signed-in session, if it carries a token.
    pub fn drive(&self) -> AppResult<Option<DriveClient>> {
        self.gate
            .token()
            .map(|token| DriveClient::new(&self.config, token))
            .transpose()
    }

    fn require_drive(&self) -> AppResult<DriveClient> {
        self.drive()?.ok_or_else(|| {
            AppError::security("DRIVE_NOT_CONNECTED", "Sign in to use Google Drive backups")
        })
    }

    pub async fn export_local(&self, dir: Option<&Path>) -> AppResult<PathBuf> {
        self.gate.authorize()?;
        let dir = dir.unwrap_or(&self.config.backup_dir);
        local::export_to_dir(&self.store, dir).await
    }

    pub async fn restore_file(&self, path: &Path, mode: RestoreMode) -> AppResult<RestoreSummary> {
        self.gate.authorize()?;
        let _guard = self.begin_maintenance()?;
        let payload = local::read_payload(path)?;
        crate::backup::restore(&self.store, &self.settings, &payload, mode).await
    }

    /// Uploads a snapshot and prunes old ones. Errors reach the caller.
    pub async fn backup_to_drive(&self) -> AppResult<RemoteBackupFile> {
        self.gate.authorize()?;
        let drive = self.require_drive()?;
        let file = remote::backup_to_remote(&self.store, &drive).await?;
        remote::prune_remote(&drive, self.settings.get().max_backup_versions).await?;
        Ok(file)
    }

    pub async fn list_drive_backups(&self) -> AppResult<Vec<RemoteBackupFile>> {
        self.gate.authorize()?;
        self.require_drive()?.list().await
    }

    pub async fn restore_from_drive(&self, id: &str, mode: RestoreMode) -> AppResult<RestoreSummary> {
        self.gate.authorize()?;
        let drive = self.require_drive()?;
        let _guard = self.begin_maintenance()?;
        remote::restore_from_remote(&self.store, &self.settings, &drive, id, mode).await
    }

    /// Skipped while the session is locked; the next check after unlock
    /// picks it up.
    pub async fn run_auto_backup(&self, now: DateTime<Utc>) -> AutoBackupOutcome {
        if let Err(err) = self.gate.authorize() {
            info!(target: "minet", event = "auto_backup_skipped", reason = %err.code());
            return AutoBackupOutcome::Locked;
        }
        let drive = match self.drive() {
            Ok(drive) => drive,
            Err(err) => {
                return AutoBackupOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        let remote = drive.as_ref().map(|d| d as &dyn RemoteStore);
        schedule::run_auto_backup(&self.store, &self.settings, &self.config.backup_dir, remote, now)
            .await
    }

    pub async fn wipe(&self) -> AppResult<u64> {
        self.gate.authorize()?;
        let _guard = self.begin_maintenance()?;
        self.gate.sign_out_and_wipe().await
    }

    pub async fn shutdown(&self) {
        self.store.close().await;
    }
}

#[derive(Debug)]
pub struct MaintenanceGuard {
    flag: Arc<AtomicBool>,
}

impl MaintenanceGuard {
    fn begin(flag: Arc<AtomicBool>) -> AppResult<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::new(
                "MAINTENANCE_ACTIVE",
                "Another restore or wipe is already running.",
            ));
        }
        Ok(Self { flag })
    }
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::NoBiometrics;

    #[tokio::test]
    async fn maintenance_is_exclusive() {
        let store = Store::in_memory().await.unwrap();
        let state = AppState::with_store(
            AppConfig::at("/tmp/minet-test"),
            store,
            Arc::new(NoBiometrics),
            Arc::new(SystemClock),
        )
        .await
        .unwrap();
        let guard = state.begin_maintenance().unwrap();
        assert!(state.maintenance_active());
        assert_eq!(state.begin_maintenance().unwrap_err().code(), "MAINTENANCE_ACTIVE");
        drop(guard);
        assert!(!state.maintenance_active());
        assert!(state.drive().unwrap().is_none());
    }
}
