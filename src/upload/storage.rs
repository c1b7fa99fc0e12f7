use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Called with `(bytes_transferred, total_bytes)` as a transfer advances
pub type ProgressFn = dyn Fn(u64, u64) + Send + Sync;

const WRITE_PIECE_SIZE: usize = 64 * 1024;

/// Durable object store addressed by slash-separated paths
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` at `path`, replacing any existing object
    async fn put_object(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
        progress: &ProgressFn,
    ) -> Result<(), StorageError>;

    /// Remove the object at `path`. Missing objects are not an error.
    async fn delete_object(&self, path: &str) -> Result<(), StorageError>;

    async fn object_exists(&self, path: &str) -> Result<bool, StorageError>;
}

/// Objects stored as files under a root directory
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` below the root, rejecting anything that could escape it
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn transfer_error(path: &str, e: std::io::Error) -> StorageError {
        StorageError::Transfer {
            path: path.to_string(),
            details: e.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn put_object(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
        progress: &ProgressFn,
    ) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::transfer_error(path, e))?;
        }

        let total = data.len() as u64;
        let partial = target.with_extension("part");
        let mut file = fs::File::create(&partial)
            .await
            .map_err(|e| Self::transfer_error(path, e))?;

        let mut written = 0u64;
        progress(0, total);
        for piece in data.chunks(WRITE_PIECE_SIZE) {
            if let Err(e) = file.write_all(piece).await {
                let _ = fs::remove_file(&partial).await;
                return Err(Self::transfer_error(path, e));
            }
            written += piece.len() as u64;
            progress(written, total);
        }

        if let Err(e) = file.sync_all().await {
            let _ = fs::remove_file(&partial).await;
            return Err(Self::transfer_error(path, e));
        }
        drop(file);

        fs::rename(&partial, &target)
            .await
            .map_err(|e| Self::transfer_error(path, e))?;

        info!("Stored {} ({} bytes, {})", path, total, content_type);
        Ok(())
    }

    async fn delete_object(&self, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => {
                debug!("Deleted {}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::transfer_error(path, e)),
        }
    }

    async fn object_exists(&self, path: &str) -> Result<bool, StorageError> {
        let target = self.resolve(path)?;
        fs::try_exists(&target)
            .await
            .map_err(|e| Self::transfer_error(path, e))
    }
}
