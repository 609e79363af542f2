//! Google Drive v3 storage.

use super::{AccessToken, StorageProvider};
use crate::error::DeliveryError;
use crate::output::{FolderHandle, StoredFile};
use async_trait::async_trait;
use reqwest::{multipart, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Drive REST client. Base URLs are overridable for tests and proxies.
#[derive(Debug, Clone)]
pub struct DriveStorage {
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
}

impl Default for DriveStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveStorage {
    pub fn new() -> Self {
        Self::with_base_urls(DRIVE_API_BASE, DRIVE_UPLOAD_BASE)
    }

    pub fn with_base_urls(api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

/// Drive query for a live folder named `name`, optionally under `parent_id`.
pub fn folder_query(name: &str, parent_id: Option<&str>) -> String {
    let mut query = format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        escape_query(name),
        FOLDER_MIME
    );
    if let Some(parent) = parent_id {
        query.push_str(&format!(" and '{}' in parents", escape_query(parent)));
    }
    query
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Pass 2xx responses through; otherwise return status and body.
async fn check(response: Response) -> Result<Response, (StatusCode, String)> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err((status, body))
}

fn folder_failure(name: &str, status: StatusCode, body: String) -> DeliveryError {
    match status {
        StatusCode::UNAUTHORIZED => DeliveryError::Unauthorized(body),
        StatusCode::CONFLICT => DeliveryError::FolderExists {
            name: name.to_string(),
        },
        _ => DeliveryError::FolderResolution {
            name: name.to_string(),
            detail: format!("HTTP {}: {}", status.as_u16(), body),
        },
    }
}

#[async_trait]
impl StorageProvider for DriveStorage {
    async fn find_folder(
        &self,
        token: &AccessToken,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Option<FolderHandle>, DeliveryError> {
        let query = folder_query(name, parent_id);
        debug!("Drive folder lookup: {}", query);
        let response = self
            .http
            .get(format!("{}/files", self.api_base))
            .bearer_auth(token.secret())
            .query(&[("q", query.as_str()), ("fields", "files(id, name)")])
            .send()
            .await
            .map_err(DeliveryError::transport)?;
        let response = check(response)
            .await
            .map_err(|(status, body)| folder_failure(name, status, body))?;

        let list: FileList = response.json().await?;
        Ok(list.files.into_iter().next().map(|f| FolderHandle {
            name: f.name.unwrap_or_else(|| name.to_string()),
            id: f.id,
            parent_id: parent_id.map(str::to_string),
        }))
    }

    async fn create_folder(
        &self,
        token: &AccessToken,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderHandle, DeliveryError> {
        let mut metadata = json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(parent) = parent_id {
            metadata["parents"] = json!([parent]);
        }
        let response = self
            .http
            .post(format!("{}/files", self.api_base))
            .bearer_auth(token.secret())
            .query(&[("fields", "id, name")])
            .json(&metadata)
            .send()
            .await
            .map_err(DeliveryError::transport)?;
        let response = check(response)
            .await
            .map_err(|(status, body)| folder_failure(name, status, body))?;

        let created: DriveFile = response.json().await?;
        Ok(FolderHandle {
            id: created.id,
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
        })
    }

    async fn upload_file(
        &self,
        token: &AccessToken,
        folder_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, DeliveryError> {
        let metadata = json!({
            "name": file_name,
            "parents": [folder_id],
            "mimeType": "application/pdf",
        });
        let form = multipart::Form::new()
            .part(
                "metadata",
                multipart::Part::text(metadata.to_string()).mime_str("application/json")?,
            )
            .part(
                "file",
                multipart::Part::bytes(bytes.to_vec())
                    .file_name(file_name.to_string())
                    .mime_str("application/pdf")?,
            );

        let response = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(token.secret())
            .query(&[("uploadType", "multipart"), ("fields", "id, name")])
            .multipart(form)
            .send()
            .await
            .map_err(DeliveryError::transport)?;
        let response = check(response).await.map_err(|(status, body)| {
            if status == StatusCode::UNAUTHORIZED {
                DeliveryError::Unauthorized(body)
            } else {
                DeliveryError::Upload {
                    name: file_name.to_string(),
                    status: status.as_u16(),
                    body,
                }
            }
        })?;

        let stored: DriveFile = response.json().await?;
        Ok(StoredFile {
            id: stored.id,
            name: stored.name.unwrap_or_else(|| file_name.to_string()),
        })
    }
}
