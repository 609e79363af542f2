//! Delivery: authenticate, resolve destination folders, upload deliverables.
//!
//! [`DeliveryClient`] is the only component with remote side effects. It sits
//! on two seams:
//!
//! * [`IdentityProvider`] turns a client id into a bearer [`AccessToken`].
//! * [`StorageProvider`] finds folders, creates folders and stores files.
//!
//! ## Folder idempotency
//!
//! Several groups often target the same client folder. The client keeps a
//! per-run cache keyed by `(name, parent_id)` and holds one async mutex across
//! the whole lookup-then-create sequence, so two resolves of the same name can
//! never both miss and both create. When a provider reports that the folder
//! already exists (a concurrent writer outside this run), the client looks it
//! up again instead of failing.

pub mod auth;
pub mod drive;
pub mod local;

pub use auth::{IdentityProvider, RefreshTokenFlow, StaticToken};
pub use drive::DriveStorage;
pub use local::LocalStorage;

use crate::error::DeliveryError;
use crate::output::{DeliverableDocument, FolderHandle, StoredFile};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Bearer token for the storage API. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Remote storage with folders and files.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Look a folder up by exact name under `parent_id` (storage root when `None`).
    async fn find_folder(
        &self,
        token: &AccessToken,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Option<FolderHandle>, DeliveryError>;

    /// Create a folder. Returns [`DeliveryError::FolderExists`] when the
    /// provider refuses because the name is taken.
    async fn create_folder(
        &self,
        token: &AccessToken,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderHandle, DeliveryError>;

    /// Store `bytes` as `file_name` inside `folder_id`.
    async fn upload_file(
        &self,
        token: &AccessToken,
        folder_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, DeliveryError>;
}

type FolderKey = (String, Option<String>);

/// Authenticates once per run and delivers deliverables to their folders.
pub struct DeliveryClient {
    identity: Arc<dyn IdentityProvider>,
    storage: Arc<dyn StorageProvider>,
    folders: Mutex<HashMap<FolderKey, FolderHandle>>,
}

impl DeliveryClient {
    pub fn new(identity: Arc<dyn IdentityProvider>, storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            identity,
            storage,
            folders: Mutex::new(HashMap::new()),
        }
    }

    /// Obtain a bearer token for `client_id`.
    pub async fn authenticate(&self, client_id: &str) -> Result<AccessToken, DeliveryError> {
        let token = self.identity.access_token(client_id).await.map_err(|e| match e {
            DeliveryError::Auth(_) => e,
            other => DeliveryError::Auth(other.to_string()),
        })?;
        info!("Authenticated with storage provider");
        Ok(token)
    }

    /// Return the folder named `name` under `parent_id`, creating it if needed.
    ///
    /// At most one lookup and one create are issued per key per run.
    pub async fn resolve_or_create_folder(
        &self,
        token: &AccessToken,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<FolderHandle, DeliveryError> {
        let key: FolderKey = (name.to_string(), parent_id.map(str::to_string));
        let mut folders = self.folders.lock().await;
        if let Some(handle) = folders.get(&key) {
            debug!("Folder '{}' served from cache ({})", name, handle.id);
            return Ok(handle.clone());
        }

        let handle = match self.storage.find_folder(token, name, parent_id).await {
            Ok(Some(found)) => found,
            Ok(None) => match self.storage.create_folder(token, name, parent_id).await {
                Ok(created) => {
                    info!("Created folder '{}' ({})", name, created.id);
                    created
                }
                Err(DeliveryError::FolderExists { .. }) => {
                    debug!("Folder '{}' appeared concurrently, looking it up again", name);
                    self.storage
                        .find_folder(token, name, parent_id)
                        .await
                        .map_err(|e| folder_error(name, e))?
                        .ok_or_else(|| DeliveryError::FolderResolution {
                            name: name.to_string(),
                            detail: "reported as existing but not found".to_string(),
                        })?
                }
                Err(e) => return Err(folder_error(name, e)),
            },
            Err(e) => return Err(folder_error(name, e)),
        };

        folders.insert(key, handle.clone());
        Ok(handle)
    }

    /// Upload one deliverable into `folder_id`.
    pub async fn upload(
        &self,
        token: &AccessToken,
        deliverable: &DeliverableDocument,
        folder_id: &str,
    ) -> Result<StoredFile, DeliveryError> {
        let stored = self
            .storage
            .upload_file(token, folder_id, &deliverable.file_name, &deliverable.bytes)
            .await?;
        info!(
            "Uploaded '{}' ({} bytes) → {}",
            stored.name,
            deliverable.bytes.len(),
            stored.id
        );
        Ok(stored)
    }
}

/// Fatal errors pass through; anything else becomes a folder-resolution failure.
fn folder_error(name: &str, err: DeliveryError) -> DeliveryError {
    if err.is_fatal() || matches!(err, DeliveryError::FolderResolution { .. }) {
        err
    } else {
        DeliveryError::FolderResolution {
            name: name.to_string(),
            detail: err.to_string(),
        }
    }
}
