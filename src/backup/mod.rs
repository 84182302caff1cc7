//! Portable snapshots of business data.
//!
//! A snapshot carries exactly the seven business collections. Settings, the
//! profile and anything PIN-related are never part of it, whatever keys the
//! settings table grows later.

pub mod drive;
pub mod local;
pub mod remote;
pub mod schedule;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::companies::{self, Company};
use crate::contacts::{self, Contact};
use crate::custom_fields::{self, CustomFieldDef};
use crate::db::Store;
use crate::events::{self, Event};
use crate::interactions::{self, Interaction};
use crate::reminders::{self, Reminder};
use crate::repo::{self, BUSINESS_TABLES};
use crate::settings::{change, write_in, SettingKey, SettingsStore};
use crate::tags::{self, Tag};
use crate::{time, AppError, AppResult};

pub use remote::{RemoteBackupFile, RemoteStore};

pub const BACKUP_VERSION: &str = "1.0";
pub const APP_NAME: &str = "MiNet CRM";
pub const FILE_PREFIX: &str = "minet-crm-backup";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupData {
    pub contacts: Vec<Contact>,
    pub companies: Vec<Company>,
    pub interactions: Vec<Interaction>,
    pub events: Vec<Event>,
    pub reminders: Vec<Reminder>,
    pub tags: Vec<Tag>,
    pub custom_field_defs: Vec<CustomFieldDef>,
}

impl BackupData {
    pub fn record_count(&self) -> usize {
        self.contacts.len()
            + self.companies.len()
            + self.interactions.len()
            + self.events.len()
            + self.reminders.len()
            + self.tags.len()
            + self.custom_field_defs.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
    pub version: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    pub data: BackupData,
}

impl BackupPayload {
    pub fn to_json_pretty(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn file_name(&self) -> String {
        let date = self
            .exported_at
            .map(|at| at.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive());
        file_name_for(date)
    }
}

pub fn file_name_for(date: NaiveDate) -> String {
    format!("{FILE_PREFIX}-{}.json", time::format_date(&date))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    /// Upsert on top of what is there; snapshot rows win on id collisions.
    Merge,
    /// Clear every business table first.
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub mode: RestoreMode,
    pub cleared: u64,
    pub restored: u64,
}

pub fn invalid_backup(reason: impl Into<String>) -> AppError {
    AppError::validation("BACKUP", "invalid backup file").with_context("reason", reason)
}

/// Parses and checks a snapshot. Anything that is not a versioned payload
/// with all seven collections is rejected before touching the store.
pub fn parse_payload(bytes: &[u8]) -> AppResult<BackupPayload> {
    let payload: BackupPayload =
        serde_json::from_slice(bytes).map_err(|err| invalid_backup(err.to_string()))?;
    if payload.version.trim().is_empty() {
        return Err(invalid_backup("empty version"));
    }
    Ok(payload)
}

/// Reads every business table inside one read transaction.
pub async fn create_payload(store: &Store) -> AppResult<BackupPayload> {
    let mut tx = store.pool().begin().await?;
    let data = BackupData {
        contacts: contacts::fetch_all(&mut *tx).await?,
        companies: companies::fetch_all(&mut *tx).await?,
        interactions: interactions::fetch_all(&mut *tx).await?,
        events: events::fetch_all(&mut *tx).await?,
        reminders: reminders::fetch_all(&mut *tx).await?,
        tags: tags::fetch_all(&mut *tx).await?,
        custom_field_defs: custom_fields::fetch_all(&mut *tx).await?,
    };
    tx.rollback().await?;
    Ok(BackupPayload {
        version: BACKUP_VERSION.to_string(),
        app_name: APP_NAME.to_string(),
        exported_at: Some(time::now()),
        data,
    })
}

/// Applies a snapshot and stamps `lastBackupAt` in one transaction. Once that
/// commits the restore has happened, so a failed settings refresh is only
/// logged.
pub async fn restore(
    store: &Store,
    settings: &SettingsStore,
    payload: &BackupPayload,
    mode: RestoreMode,
) -> AppResult<RestoreSummary> {
    let mut tx = store.begin("restore_backup").await?;
    let result: AppResult<_> = async {
        let mut cleared = 0;
        if mode == RestoreMode::Overwrite {
            for table in BUSINESS_TABLES {
                cleared += repo::clear(tx.conn(), *table).await?;
            }
        }
        let data = &payload.data;
        for c in &data.contacts {
            contacts::put(tx.conn(), c).await?;
        }
        for c in &data.companies {
            companies::put(tx.conn(), c).await?;
        }
        for i in &data.interactions {
            interactions::put(tx.conn(), i).await?;
        }
        for e in &data.events {
            events::put(tx.conn(), e).await?;
        }
        for r in &data.reminders {
            reminders::put(tx.conn(), r).await?;
        }
        for t in &data.tags {
            tags::put(tx.conn(), t).await?;
        }
        for d in &data.custom_field_defs {
            custom_fields::put(tx.conn(), d).await?;
        }
        for table in BUSINESS_TABLES {
            tx.touch(*table);
        }
        write_in(&mut tx, &[change(SettingKey::LastBackupAt, time::now())?]).await?;
        Ok(RestoreSummary {
            mode,
            cleared,
            restored: data.record_count() as u64,
        })
    }
    .await;
    let summary = tx.finish(result).await?;
    if let Err(err) = settings.reload().await {
        warn!(target: "minet", event = "settings_refresh_failed", error = %err);
    }
    info!(
        target: "minet",
        event = "backup_restored",
        mode = ?summary.mode,
        cleared = summary.cleared,
        restored = summary.restored
    );
    Ok(summary)
}

pub async fn restore_bytes(
    store: &Store,
    settings: &SettingsStore,
    bytes: &[u8],
    mode: RestoreMode,
) -> AppResult<RestoreSummary> {
    let payload = parse_payload(bytes)?;
    restore(store, settings, &payload, mode).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_missing_collections() {
        let raw = json!({"version": "1.0", "data": {}}).to_string();
        let err = parse_payload(raw.as_bytes()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION/BACKUP");
        assert_eq!(err.message(), "invalid backup file");
    }

    #[test]
    fn rejects_missing_version_and_garbage() {
        let no_version = json!({"data": BackupData::default()}).to_string();
        assert!(parse_payload(no_version.as_bytes()).is_err());
        assert!(parse_payload(b"{not json").is_err());
        assert!(parse_payload(b"").is_err());
    }

    #[test]
    fn accepts_empty_collections() {
        let raw = json!({"version": "1.0", "data": BackupData::default()}).to_string();
        let payload = parse_payload(raw.as_bytes()).unwrap();
        assert_eq!(payload.data.record_count(), 0);
        assert_eq!(payload.app_name, "");
    }

    #[test]
    fn file_name_uses_export_date() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        assert_eq!(file_name_for(date), "minet-crm-backup-2025-01-09.json");
    }
}
