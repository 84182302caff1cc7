//! Google Drive as a [`RemoteStore`]. Backups are ordinary Drive files tagged
//! through `appProperties` so listing finds only ours.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use super::remote::{RemoteBackupFile, RemoteStore};
use super::BackupPayload;
use crate::config::AppConfig;
use crate::security::BearerToken;
use crate::{AppError, AppResult};

pub const BACKUP_TYPE: &str = "minet-crm";
pub const LIST_QUERY: &str =
    "appProperties has { key='backupType' and value='minet-crm' } and trashed=false";
pub const LIST_PAGE_SIZE: u32 = 20;
const LIST_FIELDS: &str = "files(id,name,createdTime,size)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("Drive access token expired or revoked")]
    Unauthorized,
    #[error("Drive returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<DriveError> for AppError {
    fn from(err: DriveError) -> Self {
        match err {
            DriveError::Unauthorized => {
                AppError::transport("UNAUTHORIZED", err.to_string()).with_context("status", "401")
            }
            DriveError::Api { status, ref message } => {
                AppError::transport("STATUS", format!("Drive request failed with status {status}"))
                    .with_context("status", status.to_string())
                    .with_context("body", message.clone())
            }
            DriveError::Http(inner) => AppError::from(inner),
            DriveError::Json(inner) => AppError::from(inner),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteBackupFile>,
}

pub struct DriveClient {
    http: reqwest::Client,
    api_url: String,
    upload_url: String,
    token: BearerToken,
}

impl DriveClient {
    pub fn new(config: &AppConfig, token: BearerToken) -> AppResult<Self> {
        Self::with_urls(&config.drive_api_url, &config.drive_upload_url, token)
    }

    pub fn with_urls(api_url: &str, upload_url: &str, token: BearerToken) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn check(resp: Response) -> Result<Response, DriveError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(DriveError::Unauthorized);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(DriveError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    async fn upload_inner(&self, name: &str, payload: &BackupPayload) -> Result<RemoteBackupFile, DriveError> {
        let metadata = json!({
            "name": name,
            "mimeType": "application/json",
            "appProperties": {
                "backupType": BACKUP_TYPE,
                "version": payload.version,
            },
        });
        let body = serde_json::to_string_pretty(payload)?;
        let form = Form::new()
            .part(
                "metadata",
                Part::text(metadata.to_string()).mime_str("application/json")?,
            )
            .part(
                "file",
                Part::text(body)
                    .file_name(name.to_string())
                    .mime_str("application/json")?,
            );
        let resp = self
            .http
            .post(format!("{}/files", self.upload_url))
            .query(&[("uploadType", "multipart")])
            .bearer_auth(self.token.expose())
            .multipart(form)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn list_inner(&self) -> Result<Vec<RemoteBackupFile>, DriveError> {
        let page_size = LIST_PAGE_SIZE.to_string();
        let resp = self
            .http
            .get(format!("{}/files", self.api_url))
            .query(&[
                ("q", LIST_QUERY),
                ("orderBy", "createdTime desc"),
                ("pageSize", page_size.as_str()),
                ("fields", LIST_FIELDS),
            ])
            .bearer_auth(self.token.expose())
            .send()
            .await?;
        let list: FileList = Self::check(resp).await?.json().await?;
        Ok(list.files)
    }

    async fn fetch_inner(&self, id: &str) -> Result<Vec<u8>, DriveError> {
        let resp = self
            .http
            .get(format!("{}/files/{id}", self.api_url))
            .query(&[("alt", "media")])
            .bearer_auth(self.token.expose())
            .send()
            .await?;
        Ok(Self::check(resp).await?.bytes().await?.to_vec())
    }

    async fn delete_inner(&self, id: &str) -> Result<(), DriveError> {
        let resp = self
            .http
            .delete(format!("{}/files/{id}", self.api_url))
            .bearer_auth(self.token.expose())
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn upload(&self, name: &str, payload: &BackupPayload) -> AppResult<RemoteBackupFile> {
        Ok(self.upload_inner(name, payload).await?)
    }

    async fn list(&self) -> AppResult<Vec<RemoteBackupFile>> {
        Ok(self.list_inner().await?)
    }

    async fn fetch(&self, id: &str) -> AppResult<Vec<u8>> {
        Ok(self.fetch_inner(id).await?)
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        Ok(self.delete_inner(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_transport() {
        let err: AppError = DriveError::Api {
            status: 500,
            message: "boom".into(),
        }
        .into();
        assert_eq!(err.code(), "TRANSPORT/STATUS");
        assert_eq!(err.context().get("status").map(String::as_str), Some("500"));
        let err: AppError = DriveError::Unauthorized.into();
        assert_eq!(err.kind(), crate::ErrorKind::Transport);
    }
}
