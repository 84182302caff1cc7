use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::local::export_to_dir;
use super::remote::{backup_to_remote, prune_remote, RemoteBackupFile, RemoteStore};
use crate::db::Store;
use crate::settings::{BackupFrequency, SettingsStore};
use crate::AppResult;

const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Due with no previous backup, or once the elapsed days reach the cadence.
pub fn is_backup_due(
    last_backup_at: Option<DateTime<Utc>>,
    frequency: BackupFrequency,
    now: DateTime<Utc>,
) -> bool {
    match last_backup_at {
        None => true,
        Some(last) => {
            let elapsed_days = (now - last).num_milliseconds() as f64 / MS_PER_DAY;
            elapsed_days >= frequency.min_days()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AutoBackupOutcome {
    Disabled,
    NotDue,
    /// Destination is remote-only and no remote session is available.
    NoDestination,
    /// The session is locked, so the store was not read.
    Locked,
    Completed {
        local: Option<PathBuf>,
        remote: Option<RemoteBackupFile>,
        pruned: usize,
    },
    /// Logged and left for the next check.
    Failed { error: String },
}

/// Runs a scheduled backup if one is due. Never returns an error: failures
/// are logged and `lastBackupAt` stays as it was so the next check retries.
pub async fn run_auto_backup(
    store: &Store,
    settings: &SettingsStore,
    backup_dir: &Path,
    remote: Option<&dyn RemoteStore>,
    now: DateTime<Utc>,
) -> AutoBackupOutcome {
    let current = settings.get();
    if !current.auto_backup_enabled {
        return AutoBackupOutcome::Disabled;
    }
    if !is_backup_due(current.last_backup_at, current.auto_backup_frequency, now) {
        return AutoBackupOutcome::NotDue;
    }
    let destination = current.auto_backup_destination;
    let remote = remote.filter(|_| destination.includes_remote());
    if !destination.includes_local() && remote.is_none() {
        info!(target: "minet", event = "auto_backup_skipped", reason = "no_remote_session");
        return AutoBackupOutcome::NoDestination;
    }

    let attempt: AppResult<_> = async {
        let local = if destination.includes_local() {
            Some(export_to_dir(store, backup_dir).await?)
        } else {
            None
        };
        let (uploaded, pruned) = match remote {
            Some(remote) => {
                let file = backup_to_remote(store, remote).await?;
                let pruned = prune_remote(remote, current.max_backup_versions).await?;
                (Some(file), pruned)
            }
            None => (None, 0),
        };
        settings.set_last_backup_at(now).await?;
        Ok(AutoBackupOutcome::Completed {
            local,
            remote: uploaded,
            pruned,
        })
    }
    .await;

    match attempt {
        Ok(outcome) => {
            info!(target: "minet", event = "auto_backup_completed", destination = %destination);
            outcome
        }
        Err(err) => {
            error!(
                target: "minet",
                event = "auto_backup_failed",
                destination = %destination,
                code = %err.code(),
                error = %err
            );
            AutoBackupOutcome::Failed {
                error: err.to_string(),
            }
        }
    }
}
