use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectMeta, ObjectStore};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Read-side access to the bucket holding manifests and corpus artifacts,
/// plus a durable local download cache with content-identifier change
/// detection.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
}

impl StorageManager {
    pub async fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let store = create_storage_backend(cfg).await?;
        Ok(Self {
            store,
            backend_kind: cfg.storage,
        })
    }

    /// Inject a specific backend; used by tests to seed in-memory fixtures.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
        }
    }

    pub fn backend_kind(&self) -> StorageKind {
        self.backend_kind
    }

    pub async fn put(&self, location: &str, data: Bytes) -> Result<(), AppError> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await?;
        Ok(())
    }

    pub async fn get(&self, location: &str) -> Result<Bytes, AppError> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        Ok(result.bytes().await?)
    }

    /// Fetch an object and parse it as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, location: &str) -> Result<T, AppError> {
        let bytes = self.get(location).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn head(&self, location: &str) -> Result<ObjectMeta, AppError> {
        let path = ObjPath::from(location);
        Ok(self.store.head(&path).await?)
    }

    pub async fn exists(&self, location: &str) -> Result<bool, AppError> {
        match self.head(location).await {
            Ok(_) => Ok(true),
            Err(AppError::Storage(object_store::Error::NotFound { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Download an object to `local_path` unless the cached copy already
    /// matches the remote content identifier (ETag, falling back to size
    /// when the backend reports none).
    ///
    /// The identifier observed at download time is recorded in a sidecar
    /// file next to the payload, so warm starts skip the transfer entirely.
    /// Returns `true` when bytes were transferred.
    pub async fn download_if_needed(
        &self,
        location: &str,
        local_path: &Path,
    ) -> Result<bool, AppError> {
        let meta = self.head(location).await?;
        let remote_tag = content_tag(&meta);
        let marker_path = sidecar_path(local_path);

        if tokio::fs::try_exists(local_path).await? {
            match tokio::fs::read_to_string(&marker_path).await {
                Ok(cached_tag) if cached_tag == remote_tag => {
                    debug!(location, path = %local_path.display(), "file already cached");
                    return Ok(false);
                }
                Ok(_) => {
                    debug!(location, "cached content identifier is stale, re-downloading");
                }
                Err(e) => {
                    warn!(location, error = %e, "cache marker unreadable, re-downloading");
                }
            }
        }

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Stream into a partial file first so a failed transfer never leaves
        // a plausible-looking payload behind.
        let partial_path = partial_path(local_path);
        let object = self.store.get(&ObjPath::from(location)).await?;
        let mut stream = object.into_stream();
        let mut file = tokio::fs::File::create(&partial_path).await?;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial_path, local_path).await?;
        tokio::fs::write(&marker_path, &remote_tag).await?;

        info!(location, path = %local_path.display(), "downloaded file");
        Ok(true)
    }
}

fn content_tag(meta: &ObjectMeta) -> String {
    match &meta.e_tag {
        Some(tag) => tag.trim_matches('"').to_string(),
        None => format!("size-{}", meta.size),
    }
}

fn sidecar_path(local_path: &Path) -> PathBuf {
    append_suffix(local_path, ".etag")
}

fn partial_path(local_path: &Path) -> PathBuf {
    append_suffix(local_path, ".part")
}

fn append_suffix(local_path: &Path, suffix: &str) -> PathBuf {
    let mut name = local_path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

async fn create_storage_backend(cfg: &AppConfig) -> Result<DynStore, AppError> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await?;
            }
            let store = LocalFileSystem::new_with_prefix(base)?;
            Ok(Arc::new(store))
        }
        StorageKind::Memory => Ok(Arc::new(InMemory::new())),
    }
}

/// Resolve the absolute base directory used for local storage from config.
///
/// If `data_dir` is relative, it is resolved against the current working
/// directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}
