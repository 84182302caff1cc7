//! User settings: typed view over the key/value `app_settings` table.
//!
//! Each key is its own row holding a JSON value. Keys this build does not
//! know about are left untouched, and a partial update writes only the keys
//! it names.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{Executor, Row, Sqlite};
use tracing::warn;

use crate::db::{Store, WriteTx};
use crate::model::string_enum;
use crate::repo::Table;
use crate::{AppError, AppResult};

string_enum!(DarkMode {
    System => "system",
    Light => "light",
    Dark => "dark",
});

string_enum!(Language {
    Vi => "vi",
    En => "en",
});

string_enum!(BackupFrequency {
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
});

string_enum!(BackupDestination {
    Local => "local",
    Drive => "drive",
    Both => "both",
});

impl BackupFrequency {
    /// Minimum whole days between scheduled backups.
    pub fn min_days(self) -> f64 {
        match self {
            BackupFrequency::Daily => 1.0,
            BackupFrequency::Weekly => 7.0,
            BackupFrequency::Monthly => 30.0,
        }
    }
}

impl BackupDestination {
    pub fn includes_local(self) -> bool {
        matches!(self, BackupDestination::Local | BackupDestination::Both)
    }

    pub fn includes_remote(self) -> bool {
        matches!(self, BackupDestination::Drive | BackupDestination::Both)
    }
}

string_enum!(
    /// Every key this build reads or writes.
    SettingKey {
        PinEnabled => "pinEnabled",
        PinHash => "pinHash",
        BiometricEnabled => "biometricEnabled",
        BiometricCredentialId => "biometricCredentialId",
        LockAfterMinutes => "lockAfterMinutes",
        AutoBackupEnabled => "autoBackupEnabled",
        AutoBackupFrequency => "autoBackupFrequency",
        AutoBackupDestination => "autoBackupDestination",
        MaxBackupVersions => "maxBackupVersions",
        LastBackupAt => "lastBackupAt",
        DriveConnected => "driveConnected",
        DarkMode => "darkMode",
        Language => "language",
        NotificationsEnabled => "notificationsEnabled",
        ReminderLeadDays => "reminderLeadDays",
        PendingLogin => "pendingLogin",
        PendingSubjectId => "pendingSubjectId",
    }
);

/// Keys owned by the security gate. Cleared together when PIN is turned off.
pub const SECURITY_KEYS: &[SettingKey] = &[
    SettingKey::PinEnabled,
    SettingKey::PinHash,
    SettingKey::BiometricEnabled,
    SettingKey::BiometricCredentialId,
];

/// Longest inactivity timeout accepted for `lockAfterMinutes`: one week.
pub const MAX_LOCK_AFTER_MINUTES: f64 = 7.0 * 24.0 * 60.0;

/// Longest look-ahead accepted for `reminderLeadDays`.
pub const MAX_REMINDER_LEAD_DAYS: u64 = 365;

/// How the auto-lock timer behaves, derived from `lockAfterMinutes`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LockPolicy {
    Never,
    /// Lock as soon as the app is backgrounded.
    OnBackground,
    After(Duration),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub pin_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_hash: Option<String>,
    pub biometric_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biometric_credential_id: Option<String>,
    /// -1 never, 0 on background, otherwise minutes (fractions allowed).
    pub lock_after_minutes: f64,

    pub auto_backup_enabled: bool,
    pub auto_backup_frequency: BackupFrequency,
    pub auto_backup_destination: BackupDestination,
    /// 0 keeps every remote backup.
    pub max_backup_versions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_at: Option<DateTime<Utc>>,
    pub drive_connected: bool,

    pub dark_mode: DarkMode,
    pub language: Language,

    pub notifications_enabled: bool,
    pub reminder_lead_days: u32,

    pub pending_login: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_subject_id: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            pin_enabled: false,
            pin_hash: None,
            biometric_enabled: false,
            biometric_credential_id: None,
            lock_after_minutes: 5.0,
            auto_backup_enabled: false,
            auto_backup_frequency: BackupFrequency::Weekly,
            auto_backup_destination: BackupDestination::Local,
            max_backup_versions: 5,
            last_backup_at: None,
            drive_connected: false,
            dark_mode: DarkMode::System,
            language: Language::Vi,
            notifications_enabled: false,
            reminder_lead_days: 3,
            pending_login: false,
            pending_subject_id: None,
        }
    }
}

impl AppSettings {
    pub fn lock_policy(&self) -> LockPolicy {
        let minutes = self.lock_after_minutes;
        if minutes < 0.0 || !minutes.is_finite() {
            LockPolicy::Never
        } else if minutes == 0.0 {
            LockPolicy::OnBackground
        } else {
            let minutes = minutes.min(MAX_LOCK_AFTER_MINUTES);
            Duration::try_from_secs_f64(minutes * 60.0)
                .map(LockPolicy::After)
                .unwrap_or(LockPolicy::Never)
        }
    }

    /// PIN protection is in force only with both the flag and a hash.
    pub fn pin_active(&self) -> bool {
        self.pin_enabled && self.pin_hash.is_some()
    }

    /// Overlays stored rows onto the defaults. A stored value of the wrong
    /// shape is skipped with a warning rather than failing the whole load.
    fn from_rows(rows: Vec<(String, Value)>) -> Self {
        let mut merged = match serde_json::to_value(AppSettings::default()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in rows {
            if key.parse::<SettingKey>().is_err() {
                continue;
            }
            let mut candidate = merged.clone();
            if value.is_null() {
                candidate.remove(&key);
            } else {
                candidate.insert(key.clone(), value);
            }
            if serde_json::from_value::<AppSettings>(Value::Object(candidate.clone())).is_ok() {
                merged = candidate;
            } else {
                warn!(target: "minet", event = "setting_ignored", key = %key);
            }
        }
        serde_json::from_value(Value::Object(merged)).unwrap_or_default()
    }
}

pub(crate) async fn load<'e, E>(exec: E) -> AppResult<AppSettings>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT key, value FROM app_settings")
        .fetch_all(exec)
        .await?;
    let mut pairs = Vec::with_capacity(rows.len());
    for row in rows {
        let key: String = row.try_get("key")?;
        let raw: String = row.try_get("value")?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => pairs.push((key, value)),
            Err(err) => {
                warn!(target: "minet", event = "setting_unparseable", key = %key, error = %err)
            }
        }
    }
    Ok(AppSettings::from_rows(pairs))
}

fn out_of_range(key: SettingKey, value: &Value) -> AppError {
    AppError::validation("SETTING", "Setting value out of range")
        .with_context("key", key.as_str())
        .with_context("value", value.to_string())
}

/// Range checks for numeric keys whose values feed timers and date math.
fn check_value(key: SettingKey, value: &Value) -> AppResult<()> {
    if value.is_null() {
        return Ok(());
    }
    match key {
        SettingKey::LockAfterMinutes => match value.as_f64() {
            Some(m) if m == -1.0 || (0.0..=MAX_LOCK_AFTER_MINUTES).contains(&m) => Ok(()),
            _ => Err(out_of_range(key, value)),
        },
        SettingKey::ReminderLeadDays => match value.as_u64() {
            Some(days) if days <= MAX_REMINDER_LEAD_DAYS => Ok(()),
            _ => Err(out_of_range(key, value)),
        },
        _ => Ok(()),
    }
}

/// Writes each change as its own row. `Value::Null` removes the key.
pub(crate) async fn write_in(tx: &mut WriteTx, changes: &[(SettingKey, Value)]) -> AppResult<()> {
    for (key, value) in changes {
        check_value(*key, value)?;
    }
    for (key, value) in changes {
        if value.is_null() {
            sqlx::query("DELETE FROM app_settings WHERE key = ?")
                .bind(key.as_str())
                .execute(tx.conn())
                .await?;
        } else {
            sqlx::query("INSERT OR REPLACE INTO app_settings (key, value) VALUES (?, ?)")
                .bind(key.as_str())
                .bind(serde_json::to_string(value)?)
                .execute(tx.conn())
                .await?;
        }
    }
    tx.touch(Table::AppSettings);
    Ok(())
}

/// Builds a change list entry from any serializable value.
pub fn change<T: Serialize>(key: SettingKey, value: T) -> AppResult<(SettingKey, Value)> {
    Ok((key, serde_json::to_value(value)?))
}

/// The single in-memory copy of settings. Every write goes through the
/// table first, then refreshes this cache.
#[derive(Clone)]
pub struct SettingsStore {
    store: Store,
    cached: Arc<RwLock<AppSettings>>,
}

impl SettingsStore {
    pub async fn load(store: &Store) -> AppResult<Self> {
        let settings = load(store.pool()).await?;
        Ok(Self {
            store: store.clone(),
            cached: Arc::new(RwLock::new(settings)),
        })
    }

    pub fn get(&self) -> AppSettings {
        self.cached
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub async fn reload(&self) -> AppResult<AppSettings> {
        let fresh = load(self.store.pool()).await?;
        if let Ok(mut guard) = self.cached.write() {
            *guard = fresh.clone();
        }
        Ok(fresh)
    }

    pub async fn update(&self, changes: &[(SettingKey, Value)]) -> AppResult<AppSettings> {
        let mut tx = self.store.begin("update_settings").await?;
        let result = write_in(&mut tx, changes).await;
        tx.finish(result).await?;
        self.reload().await
    }

    pub async fn set<T: Serialize>(&self, key: SettingKey, value: T) -> AppResult<AppSettings> {
        self.update(&[change(key, value)?]).await
    }

    pub async fn set_last_backup_at(&self, at: DateTime<Utc>) -> AppResult<AppSettings> {
        self.set(SettingKey::LastBackupAt, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_first_run() {
        let s = AppSettings::default();
        assert!(!s.pin_enabled);
        assert_eq!(s.lock_after_minutes, 5.0);
        assert_eq!(s.auto_backup_frequency, BackupFrequency::Weekly);
        assert_eq!(s.auto_backup_destination, BackupDestination::Local);
        assert_eq!(s.max_backup_versions, 5);
        assert_eq!(s.language, Language::Vi);
        assert_eq!(s.reminder_lead_days, 3);
    }

    #[test]
    fn lock_policy_from_minutes() {
        let mut s = AppSettings::default();
        s.lock_after_minutes = -1.0;
        assert_eq!(s.lock_policy(), LockPolicy::Never);
        s.lock_after_minutes = 0.0;
        assert_eq!(s.lock_policy(), LockPolicy::OnBackground);
        s.lock_after_minutes = 0.5;
        assert_eq!(s.lock_policy(), LockPolicy::After(Duration::from_secs(30)));
        s.lock_after_minutes = 1e300;
        assert_eq!(
            s.lock_policy(),
            LockPolicy::After(Duration::from_secs_f64(MAX_LOCK_AFTER_MINUTES * 60.0))
        );
        s.lock_after_minutes = f64::NAN;
        assert_eq!(s.lock_policy(), LockPolicy::Never);
    }

    #[test]
    fn numeric_settings_are_range_checked() {
        let lock = SettingKey::LockAfterMinutes;
        assert!(check_value(lock, &json!(-1)).is_ok());
        assert!(check_value(lock, &json!(0)).is_ok());
        assert!(check_value(lock, &json!(2.5)).is_ok());
        assert!(check_value(lock, &json!(1e300)).is_err());
        assert!(check_value(lock, &json!(-0.5)).is_err());
        assert!(check_value(lock, &json!("5")).is_err());
        let lead = SettingKey::ReminderLeadDays;
        assert!(check_value(lead, &json!(7)).is_ok());
        assert_eq!(
            check_value(lead, &json!(u32::MAX)).unwrap_err().code(),
            "VALIDATION/SETTING"
        );
        assert!(check_value(SettingKey::Language, &json!("en")).is_ok());
    }

    #[test]
    fn rows_overlay_defaults_and_bad_values_are_skipped() {
        let s = AppSettings::from_rows(vec![
            ("pinEnabled".into(), json!(true)),
            ("maxBackupVersions".into(), json!("lots")),
            ("somethingNew".into(), json!(1)),
            ("autoBackupFrequency".into(), json!("daily")),
        ]);
        assert!(s.pin_enabled);
        assert_eq!(s.max_backup_versions, 5);
        assert_eq!(s.auto_backup_frequency, BackupFrequency::Daily);
    }

    #[test]
    fn setting_keys_use_camel_case() {
        assert_eq!(SettingKey::PinHash.as_str(), "pinHash");
        assert_eq!(
            "lastBackupAt".parse::<SettingKey>().unwrap(),
            SettingKey::LastBackupAt
        );
    }
}
