use super::record::ChunkSummary;
use super::storage::ObjectStorage;
use crate::diagnostics::{DiagnosticContext, DiagnosticsSink};
use crate::error::StorageError;
use crate::identifier::{derive_chunk_path, SessionIdentifier};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Uploads partial recording data while capture is still running.
///
/// Each chunk gets one attempt; a failed chunk makes the whole progressive
/// upload ineligible and the engine falls back to a single-blob upload.
pub struct ChunkedUploader {
    storage: Arc<dyn ObjectStorage>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    identity: SessionIdentifier,
    owner: Option<String>,
    mime_type: String,
    stored: Vec<(String, u64)>,
    failed: u32,
    next_index: u32,
}

impl ChunkedUploader {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        identity: SessionIdentifier,
        owner: Option<String>,
        mime_type: &str,
    ) -> Self {
        Self {
            storage,
            diagnostics,
            identity,
            owner,
            mime_type: mime_type.to_string(),
            stored: Vec::new(),
            failed: 0,
            next_index: 0,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn uploaded_count(&self) -> u32 {
        self.stored.len() as u32
    }

    pub fn failed_count(&self) -> u32 {
        self.failed
    }

    pub fn uploaded_paths(&self) -> Vec<String> {
        self.stored.iter().map(|(path, _)| path.clone()).collect()
    }

    /// Store the next chunk at `chunks/chunk-{n}`
    pub async fn upload_chunk(&mut self, data: Bytes) -> Result<String, StorageError> {
        let index = self.next_index;
        self.next_index += 1;

        let path = derive_chunk_path(&self.identity, self.owner.as_deref(), index);
        let size = data.len() as u64;
        let noop = |_: u64, _: u64| {};

        match self.storage.put_object(&path, data, &self.mime_type, &noop).await {
            Ok(()) => {
                debug!("Stored chunk {} ({} bytes)", path, size);
                self.stored.push((path.clone(), size));
                Ok(path)
            }
            Err(e) => {
                self.failed += 1;
                self.diagnostics.log_warning(
                    &format!("Chunk upload failed: {}", e),
                    DiagnosticContext::new("chunked_upload")
                        .session(self.identity.session_id())
                        .field("chunk", index)
                        .field("storage_path", path),
                );
                Err(e)
            }
        }
    }

    /// Chunk metadata, only when at least one chunk was stored and none failed
    pub fn summary(&self) -> Option<ChunkSummary> {
        if self.stored.is_empty() || self.failed > 0 {
            return None;
        }
        Some(ChunkSummary {
            paths: self.uploaded_paths(),
            combined_size: self.stored.iter().map(|(_, size)| size).sum(),
        })
    }

    /// Best-effort removal of every stored chunk
    pub async fn discard(self) {
        for (path, _) in &self.stored {
            if let Err(e) = self.storage.delete_object(path).await {
                warn!("Could not remove partial chunk {}: {}", path, e);
            }
        }
    }
}
