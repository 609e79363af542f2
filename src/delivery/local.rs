//! Local-directory storage for dry runs: folders are directories, uploads are files.

use super::{AccessToken, StorageProvider};
use crate::error::DeliveryError;
use crate::output::{FolderHandle, StoredFile};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes deliverables under a root directory.
///
/// Folder ids are paths relative to the root, so `parent_id` nests folders.
/// Files are written to a temporary file in the target directory and renamed
/// into place; an existing file with the same name gets a numeric suffix.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_path(&self, name: &str, parent_id: Option<&str>) -> (String, PathBuf) {
        let id = match parent_id {
            Some(parent) => format!("{parent}/{name}"),
            None => name.to_string(),
        };
        let path = self.root.join(&id);
        (id, path)
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn find_folder(
        &self,
        _token: &AccessToken,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Option<FolderHandle>, DeliveryError> {
        let (id, path) = self.folder_path(name, parent_id);
        if tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            Ok(Some(FolderHandle {
                id,
                name: name.to_string(),
                parent_id: parent_id.map(str::to_string),
            }))
        } else {
            Ok(None)
        }
    }

    async fn create_folder(
        &self,
        _token: &AccessToken,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderHandle, DeliveryError> {
        let (id, path) = self.folder_path(name, parent_id);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DeliveryError::FolderExists {
                    name: name.to_string(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&path).await?;
            }
            Err(e) => return Err(e.into()),
        }
        debug!("Created directory {}", path.display());
        Ok(FolderHandle {
            id,
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
        })
    }

    async fn upload_file(
        &self,
        _token: &AccessToken,
        folder_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, DeliveryError> {
        let dir = self.root.join(folder_id);
        let file_name = file_name.to_string();
        let bytes = bytes.to_vec();

        let written = tokio::task::spawn_blocking(move || write_atomic(&dir, &file_name, &bytes))
            .await
            .map_err(|e| std::io::Error::other(format!("write task failed: {e}")))??;

        let id = written
            .strip_prefix(&self.root)
            .unwrap_or(&written)
            .to_string_lossy()
            .into_owned();
        let name = written
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.clone());
        Ok(StoredFile { id, name })
    }
}

fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let target = unique_path(dir, file_name);
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(&target).map_err(|e| e.error)?;
    Ok(target)
}

fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (2..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
