use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{create_payload, parse_payload, restore, BackupPayload, RestoreMode, RestoreSummary};
use crate::db::Store;
use crate::settings::SettingsStore;
use crate::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBackupFile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    /// Byte size as the service reports it (a decimal string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// Object storage holding tagged backup files.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upload(&self, name: &str, payload: &BackupPayload) -> AppResult<RemoteBackupFile>;

    /// Backups only, newest first.
    async fn list(&self) -> AppResult<Vec<RemoteBackupFile>>;

    async fn fetch(&self, id: &str) -> AppResult<Vec<u8>>;

    async fn delete(&self, id: &str) -> AppResult<()>;
}

pub async fn backup_to_remote(store: &Store, remote: &dyn RemoteStore) -> AppResult<RemoteBackupFile> {
    let payload = create_payload(store).await?;
    let file = remote.upload(&payload.file_name(), &payload).await?;
    info!(target: "minet", event = "remote_backup_uploaded", id = %file.id, name = %file.name);
    Ok(file)
}

/// Downloads and applies one remote backup. A file that does not parse as a
/// snapshot leaves the store untouched.
pub async fn restore_from_remote(
    store: &Store,
    settings: &SettingsStore,
    remote: &dyn RemoteStore,
    id: &str,
    mode: RestoreMode,
) -> AppResult<RestoreSummary> {
    let bytes = remote.fetch(id).await?;
    let payload = parse_payload(&bytes)?;
    restore(store, settings, &payload, mode).await
}

/// Deletes every backup past the newest `keep`. `keep == 0` keeps all.
/// Returns how many were deleted.
pub async fn prune_remote(remote: &dyn RemoteStore, keep: u32) -> AppResult<usize> {
    if keep == 0 {
        return Ok(0);
    }
    let listed = remote.list().await?;
    let mut deleted = 0;
    for old in listed.iter().skip(keep as usize) {
        remote.delete(&old.id).await.inspect_err(|err| {
            warn!(target: "minet", event = "remote_prune_failed", id = %old.id, error = %err);
        })?;
        deleted += 1;
    }
    if deleted > 0 {
        info!(target: "minet", event = "remote_pruned", deleted, keep);
    }
    Ok(deleted)
}
