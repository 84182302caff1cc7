use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{create_payload, parse_payload, BackupPayload, FILE_PREFIX};
use crate::db::Store;
use crate::{AppError, AppResult};

const PARTIAL_SUFFIX: &str = ".partial";

fn tmp_path(final_path: &Path) -> PathBuf {
    let mut s = OsString::from(final_path.as_os_str());
    s.push(PARTIAL_SUFFIX);
    PathBuf::from(s)
}

/// Writes `payload` as pretty JSON to `path`. The file only appears under its
/// final name once fully written.
pub fn write_payload(path: &Path, payload: &BackupPayload) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = payload.to_json_pretty()?;
    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_payload(path: &Path) -> AppResult<BackupPayload> {
    let bytes = fs::read(path)
        .map_err(|err| AppError::from(err).with_context("path", path.display().to_string()))?;
    parse_payload(&bytes)
}

/// Snapshots the store into `dir` under the dated backup file name. A second
/// export on the same day replaces the first.
pub async fn export_to_dir(store: &Store, dir: &Path) -> AppResult<PathBuf> {
    let payload = create_payload(store).await?;
    let path = dir.join(payload.file_name());
    write_payload(&path, &payload)?;
    info!(
        target: "minet",
        event = "backup_written",
        path = %path.display(),
        records = payload.data.record_count()
    );
    Ok(path)
}

/// Backup files in `dir`, newest name first.
pub fn list_backups(dir: &Path) -> AppResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_backup = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"));
        if is_backup {
            found.push(path);
        }
    }
    found.sort();
    found.reverse();
    Ok(found)
}
