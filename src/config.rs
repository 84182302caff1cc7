use std::path::{Path, PathBuf};

use crate::{AppError, AppResult};

pub const APP_DIR_NAME: &str = "minet-crm";
pub const DB_FILE_NAME: &str = "minet.sqlite3";

pub const DEFAULT_DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";
pub const DEFAULT_LOG_FILTER: &str = "minet=info,sqlx=warn";

/// Process-level configuration resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub log_filter: String,
    pub drive_api_url: String,
    pub drive_upload_url: String,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        let data_dir = match std::env::var_os("MINET_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .or_else(|| std::env::current_dir().ok())
                .map(|base| base.join(APP_DIR_NAME))
                .ok_or_else(|| {
                    AppError::new(
                        "CONFIG/DATA_DIR",
                        "Failed to resolve application data directory",
                    )
                })?,
        };
        let backup_dir = std::env::var_os("MINET_BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("backups"));

        Ok(Self {
            backup_dir,
            log_filter: env_or("MINET_LOG", DEFAULT_LOG_FILTER),
            drive_api_url: env_or("MINET_DRIVE_API_URL", DEFAULT_DRIVE_API_URL),
            drive_upload_url: env_or("MINET_DRIVE_UPLOAD_URL", DEFAULT_DRIVE_UPLOAD_URL),
            data_dir,
        })
    }

    /// Configuration rooted at an explicit directory, ignoring the environment.
    pub fn at(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            backup_dir: data_dir.join("backups"),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            drive_api_url: DEFAULT_DRIVE_API_URL.to_string(),
            drive_upload_url: DEFAULT_DRIVE_UPLOAD_URL.to_string(),
            data_dir,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_root_derives_paths() {
        let config = AppConfig::at("/tmp/minet-test");
        assert_eq!(config.db_path(), PathBuf::from("/tmp/minet-test/minet.sqlite3"));
        assert_eq!(config.backup_dir, PathBuf::from("/tmp/minet-test/backups"));
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/minet-test/logs"));
        assert_eq!(config.drive_api_url, DEFAULT_DRIVE_API_URL);
    }
}
