use super::chunked::ChunkedUploader;
use super::record::{CompletionTransaction, RecordPatch, RecordStatus, SessionRecordStore};
use super::retry::{commit_with_cleanup, retry_with_backoff, BackoffPolicy, RetryError};
use super::storage::ObjectStorage;
use crate::config::{CompletionPolicy, UploadConfig};
use crate::diagnostics::{DiagnosticContext, DiagnosticsSink};
use crate::error::{CompletionError, SoftRecordError, StorageError, TransferError, UploadError};
use crate::events::{EventBus, PipelineEvent};
use crate::identifier::{
    derive_chunk_prefix, derive_storage_path, extension_for_mime, SessionIdentifier,
};
use crate::recorder::RecordedBlob;
use bytes::Bytes;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Minimum advance between progress writes to the record
const PROGRESS_WRITE_STEP_PERMILLE: u64 = 100;

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Untruncated owner id, when the caller already has the record
    pub full_user_id: Option<String>,
    pub cancel: CancellationToken,
    pub duration_seconds: Option<u32>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_full_user_id(mut self, full_user_id: impl Into<String>) -> Self {
        self.full_user_id = Some(full_user_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_duration(mut self, duration_seconds: u32) -> Self {
        self.duration_seconds = Some(duration_seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub success: bool,
    /// Final object path, or the chunk prefix for progressive uploads
    pub storage_path: String,
    pub identity: SessionIdentifier,
    pub session_id: String,
    pub attempts: u32,
    pub bytes: u64,
    pub chunked: bool,
    /// Best-effort record writes that failed along the way
    pub soft_failures: Vec<SoftRecordError>,
}

/// Drives a finished recording into storage and the session record
pub struct UploadEngine {
    storage: Arc<dyn ObjectStorage>,
    records: Arc<dyn SessionRecordStore>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    event_bus: Option<EventBus>,
    backoff: BackoffPolicy,
    completion_policy: CompletionPolicy,
}

impl UploadEngine {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        records: Arc<dyn SessionRecordStore>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            storage,
            records,
            diagnostics,
            event_bus: None,
            backoff: BackoffPolicy::default(),
            completion_policy: CompletionPolicy::default(),
        }
    }

    pub fn with_config(mut self, config: &UploadConfig) -> Self {
        self.backoff = BackoffPolicy::from(config);
        self.completion_policy = config.completion_policy;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_completion_policy(mut self, policy: CompletionPolicy) -> Self {
        self.completion_policy = policy;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn storage(&self) -> Arc<dyn ObjectStorage> {
        Arc::clone(&self.storage)
    }

    pub fn records(&self) -> Arc<dyn SessionRecordStore> {
        Arc::clone(&self.records)
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Best-effort `status = Recording` when capture starts
    pub async fn mark_recording(&self, identity: &SessionIdentifier) -> Result<(), SoftRecordError> {
        let session_id = identity.session_id();
        self.soft_update(&session_id, "mark_recording", RecordPatch::status(RecordStatus::Recording))
            .await
    }

    /// Owner id for storage paths: the caller's, else the record's
    pub async fn resolve_owner(
        &self,
        identity: &SessionIdentifier,
        options: &UploadOptions,
    ) -> Option<String> {
        if let Some(id) = options.full_user_id.as_ref().filter(|id| !id.trim().is_empty()) {
            return Some(id.clone());
        }
        match self.records.get(&identity.session_id()).await {
            Ok(Some(record)) => record.user_id,
            Ok(None) => None,
            Err(e) => {
                warn!("Could not read record for owner id: {}", e);
                None
            }
        }
    }

    /// Start a progressive upload for a recording in progress
    pub async fn chunked_uploader(
        &self,
        identity: &SessionIdentifier,
        mime_type: &str,
        options: &UploadOptions,
    ) -> ChunkedUploader {
        let owner = self.resolve_owner(identity, options).await;
        ChunkedUploader::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.diagnostics),
            identity.clone(),
            owner,
            mime_type,
        )
    }

    /// Upload a finished recording and finalize its record.
    ///
    /// Succeeds only once the bytes are stored and the completion transaction
    /// has been handled according to the completion policy.
    pub async fn upload(
        &self,
        blob: &RecordedBlob,
        identity: &SessionIdentifier,
        options: &UploadOptions,
    ) -> Result<UploadResult, UploadError> {
        let session_id = identity.session_id();
        if blob.is_empty() {
            self.diagnostics.log_error(
                "Refusing to upload an empty recording",
                DiagnosticContext::new("upload").session(session_id.clone()),
            );
            return Err(UploadError::EmptyBlob);
        }

        let owner = self.resolve_owner(identity, options).await;
        let path = derive_storage_path(identity, owner.as_deref(), extension_for_mime(&blob.mime_type));
        let size = blob.size();
        let duration = options.duration_seconds.or(Some(blob.duration_seconds));
        info!("Uploading {} bytes for {} to {}", size, session_id, path);

        let mut soft_failures = Vec::new();
        if let Err(e) = self.mark_uploading(&session_id, size, &blob.mime_type).await {
            soft_failures.push(e);
        }

        let attempts = match self
            .transfer(&session_id, &path, blob.data.clone(), &blob.mime_type, &options.cancel)
            .await
        {
            Ok(attempts) => attempts,
            Err(e) => return Err(self.transfer_failed(&session_id, e).await),
        };

        let transaction =
            CompletionTransaction::for_blob(&path, size, &blob.mime_type).with_duration(duration);
        if let Some(soft) = self
            .finalize(&session_id, &path, transaction, vec![path.clone()])
            .await?
        {
            soft_failures.push(soft);
        }

        self.publish(PipelineEvent::UploadCompleted {
            session_id: session_id.clone(),
            storage_path: path.clone(),
        });
        self.diagnostics.log_info(
            "Upload completed",
            DiagnosticContext::new("upload")
                .session(session_id.clone())
                .field("storage_path", path.clone())
                .field("bytes", size)
                .field("attempts", attempts),
        );

        Ok(UploadResult {
            success: true,
            storage_path: path,
            identity: identity.clone(),
            session_id,
            attempts,
            bytes: size,
            chunked: false,
            soft_failures,
        })
    }

    /// Finish a progressive upload.
    ///
    /// When every chunk was stored the chunk summary is committed; otherwise
    /// the partial chunks are removed and the whole blob is uploaded instead.
    pub async fn finish_chunked(
        &self,
        uploader: ChunkedUploader,
        blob: &RecordedBlob,
        identity: &SessionIdentifier,
        options: &UploadOptions,
    ) -> Result<UploadResult, UploadError> {
        let session_id = identity.session_id();

        let Some(summary) = uploader.summary() else {
            info!(
                "Chunked upload for {} incomplete ({} stored, {} failed); uploading whole recording",
                session_id,
                uploader.uploaded_count(),
                uploader.failed_count()
            );
            self.diagnostics.log_warning(
                "Falling back to single upload",
                DiagnosticContext::new("chunked_upload")
                    .session(session_id.clone())
                    .field("stored_chunks", uploader.uploaded_count())
                    .field("failed_chunks", uploader.failed_count()),
            );
            uploader.discard().await;
            return self.upload(blob, identity, options).await;
        };

        let prefix = derive_chunk_prefix(identity, uploader.owner());
        let mut soft_failures = Vec::new();
        if let Err(e) = self
            .mark_uploading(&session_id, summary.combined_size, &blob.mime_type)
            .await
        {
            soft_failures.push(e);
        }

        let bytes = summary.combined_size;
        let cleanup_paths = summary.paths.clone();
        let transaction = CompletionTransaction::for_chunks(summary, &blob.mime_type)
            .with_duration(options.duration_seconds.or(Some(blob.duration_seconds)));

        if let Some(soft) = self
            .finalize(&session_id, &prefix, transaction, cleanup_paths)
            .await?
        {
            soft_failures.push(soft);
        }

        self.publish(PipelineEvent::UploadCompleted {
            session_id: session_id.clone(),
            storage_path: prefix.clone(),
        });

        Ok(UploadResult {
            success: true,
            storage_path: prefix,
            identity: identity.clone(),
            session_id,
            attempts: 1,
            bytes,
            chunked: true,
            soft_failures,
        })
    }

    async fn mark_uploading(
        &self,
        session_id: &str,
        size: u64,
        mime_type: &str,
    ) -> Result<(), SoftRecordError> {
        let patch = RecordPatch {
            status: Some(RecordStatus::Uploading),
            upload_started_at: Some(Utc::now()),
            file_size: Some(size),
            mime_type: Some(mime_type.to_string()),
            upload_progress: Some(0.0),
            ..Default::default()
        };
        let result = self.soft_update(session_id, "mark_uploading", patch).await;
        if result.is_ok() {
            self.publish(PipelineEvent::UploadStatusChanged {
                session_id: session_id.to_string(),
                status: RecordStatus::Uploading.to_string(),
            });
        }
        result
    }

    async fn transfer(
        &self,
        session_id: &str,
        path: &str,
        data: Bytes,
        mime_type: &str,
        cancel: &CancellationToken,
    ) -> Result<u32, RetryError<StorageError>> {
        // Highest fraction handed to the record writer, in permille, across attempts
        let written = Arc::new(AtomicU64::new(0));
        let result = retry_with_backoff(&self.backoff, cancel, |attempt| {
            let data = data.clone();
            let written = Arc::clone(&written);
            async move {
                let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<f64>();
                let progress = {
                    let bus = self.event_bus.clone();
                    let session_id = session_id.to_string();
                    move |transferred: u64, total: u64| {
                        if let Some(bus) = &bus {
                            let _ = bus.publish(PipelineEvent::UploadProgress {
                                session_id: session_id.clone(),
                                attempt,
                                bytes_transferred: transferred,
                                total_bytes: total,
                            });
                        }
                        if total == 0 {
                            return;
                        }
                        let permille = transferred.min(total).saturating_mul(1000) / total;
                        let last = written.load(Ordering::Relaxed);
                        let finished = permille == 1000 && last < 1000;
                        if finished || permille >= last + PROGRESS_WRITE_STEP_PERMILLE {
                            written.store(permille, Ordering::Relaxed);
                            let _ = progress_tx.send(permille as f64 / 1000.0);
                        }
                    }
                };

                let put = async move {
                    let outcome = self.storage.put_object(path, data, mime_type, &progress).await;
                    // Closes the channel so the writer below drains and ends
                    drop(progress);
                    outcome
                };
                // Progress patches never carry a status
                let record_progress = async {
                    while let Some(fraction) = progress_rx.recv().await {
                        let patch = RecordPatch::progress(fraction);
                        let _ = self.soft_update(session_id, "upload_progress", patch).await;
                    }
                };
                let (outcome, ()) = tokio::join!(put, record_progress);

                if let Err(e) = &outcome {
                    self.diagnostics.log_warning(
                        &format!("Transfer attempt failed: {}", e),
                        DiagnosticContext::new("transfer")
                            .session(session_id)
                            .field("attempt", attempt)
                            .field("max_attempts", self.backoff.max_attempts)
                            .field("storage_path", path),
                    );
                }
                outcome
            }
        })
        .await;

        result.map(|(_, attempts)| attempts)
    }

    async fn transfer_failed(&self, session_id: &str, error: RetryError<StorageError>) -> UploadError {
        let cancelled = error.is_cancelled();
        let details = error
            .last_error()
            .map(ToString::to_string)
            .unwrap_or_else(|| "cancelled before first attempt".to_string());
        let transfer = TransferError {
            attempts: error.attempts(),
            details,
            cancelled,
        };

        let context = DiagnosticContext::new("transfer")
            .session(session_id)
            .field("attempts", transfer.attempts)
            .field("cancelled", cancelled);

        if cancelled {
            self.diagnostics
                .log_info(&format!("Upload cancelled: {}", transfer), context);
        } else {
            self.diagnostics
                .log_error(&format!("Upload failed: {}", transfer), context);
            let patch = RecordPatch::failed(transfer.to_string());
            if self.soft_update(session_id, "mark_failed", patch).await.is_ok() {
                self.publish(PipelineEvent::UploadStatusChanged {
                    session_id: session_id.to_string(),
                    status: RecordStatus::Failed.to_string(),
                });
            }
        }

        self.publish(PipelineEvent::UploadFailed {
            session_id: session_id.to_string(),
            error: transfer.to_string(),
        });
        UploadError::Transfer(transfer)
    }

    /// Commit the completion transaction according to the completion policy.
    ///
    /// Returns a soft failure when `retry_then_log` accepted a failed commit.
    async fn finalize(
        &self,
        session_id: &str,
        storage_path: &str,
        transaction: CompletionTransaction,
        cleanup_paths: Vec<String>,
    ) -> Result<Option<SoftRecordError>, UploadError> {
        match self.completion_policy {
            CompletionPolicy::AtomicCleanup => {
                let records = Arc::clone(&self.records);
                let storage = Arc::clone(&self.storage);
                let committed = commit_with_cleanup(
                    || records.complete(session_id, transaction),
                    || async move {
                        let mut first_error = None;
                        for path in &cleanup_paths {
                            if let Err(e) = storage.delete_object(path).await {
                                first_error.get_or_insert(e);
                            }
                        }
                        first_error.map_or(Ok(()), Err)
                    },
                )
                .await;

                match committed {
                    Ok(()) => {
                        self.completed(session_id);
                        Ok(None)
                    }
                    Err(failure) => {
                        let error = CompletionError {
                            storage_path: storage_path.to_string(),
                            details: failure.error.to_string(),
                            object_removed: failure.cleaned_up,
                        };
                        self.diagnostics.log_error(
                            &format!("Completion failed: {}", error),
                            DiagnosticContext::new("completion")
                                .session(session_id)
                                .field("storage_path", storage_path)
                                .field("object_removed", failure.cleaned_up),
                        );
                        self.publish(PipelineEvent::UploadFailed {
                            session_id: session_id.to_string(),
                            error: error.to_string(),
                        });
                        Err(UploadError::Completion(error))
                    }
                }
            }
            CompletionPolicy::RetryThenLog => {
                let first = self.records.complete(session_id, transaction.clone()).await;
                let outcome = match first {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        debug!("Completion failed once ({}); retrying", e);
                        self.records.complete(session_id, transaction).await
                    }
                };

                match outcome {
                    Ok(()) => {
                        self.completed(session_id);
                        Ok(None)
                    }
                    Err(e) => {
                        let soft = SoftRecordError {
                            step: "completion".to_string(),
                            details: e.to_string(),
                        };
                        self.diagnostics.log_warning(
                            &format!("Object stored but record not finalized: {}", soft),
                            DiagnosticContext::new("completion")
                                .session(session_id)
                                .field("storage_path", storage_path)
                                .field("attempts", 2),
                        );
                        Ok(Some(soft))
                    }
                }
            }
        }
    }

    fn completed(&self, session_id: &str) {
        self.publish(PipelineEvent::UploadStatusChanged {
            session_id: session_id.to_string(),
            status: RecordStatus::ReadyForTranscription.to_string(),
        });
    }

    async fn soft_update(
        &self,
        session_id: &str,
        step: &str,
        patch: RecordPatch,
    ) -> Result<(), SoftRecordError> {
        self.records.update(session_id, patch).await.map_err(|e| {
            let soft = SoftRecordError {
                step: step.to_string(),
                details: e.to_string(),
            };
            self.diagnostics.log_warning(
                &soft.to_string(),
                DiagnosticContext::new(step).session(session_id),
            );
            soft
        })
    }

    fn publish(&self, event: PipelineEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(event);
        }
    }
}
