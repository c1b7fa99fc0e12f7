use crate::error::RecordError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Lifecycle of a remote session record.
///
/// Wire names follow the remote record format, which mixes casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "Recording")]
    Recording,
    #[serde(rename = "Uploading")]
    Uploading,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "ReadyForTranscription")]
    ReadyForTranscription,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "expired")]
    Expired,
    #[serde(rename = "removed")]
    Removed,
}

impl RecordStatus {
    /// Forward-only ordering. Equal ranks may replace each other.
    pub fn rank(&self) -> u8 {
        match self {
            RecordStatus::Pending | RecordStatus::Active => 0,
            RecordStatus::Recording => 1,
            RecordStatus::Uploading | RecordStatus::Failed => 2,
            RecordStatus::ReadyForTranscription => 3,
            RecordStatus::Completed => 4,
            RecordStatus::Expired | RecordStatus::Removed => 5,
        }
    }

    pub fn can_move_to(&self, next: RecordStatus) -> bool {
        next.rank() >= self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Active => "active",
            RecordStatus::Recording => "Recording",
            RecordStatus::Uploading => "Uploading",
            RecordStatus::Failed => "failed",
            RecordStatus::ReadyForTranscription => "ReadyForTranscription",
            RecordStatus::Completed => "completed",
            RecordStatus::Expired => "expired",
            RecordStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    /// 0.0 - 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined_size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordErrorInfo {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Server-held record for one recording session, keyed by the full identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSessionRecord {
    pub session_id: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asker_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storyteller_name: Option<String>,
    /// Untruncated owner id; preferred over the one embedded in the identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub recording_data: RecordingData,
    #[serde(default)]
    pub storage_paths: StoragePaths,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordErrorInfo>,
}

impl RemoteSessionRecord {
    pub fn new(session_id: impl Into<String>, status: RecordStatus) -> Self {
        Self {
            session_id: session_id.into(),
            status,
            prompt_text: None,
            asker_name: None,
            storyteller_name: None,
            user_id: None,
            recording_data: RecordingData::default(),
            storage_paths: StoragePaths::default(),
            recording_completed_at: None,
            error: None,
        }
    }

    pub fn with_prompt(mut self, prompt_text: &str, asker_name: &str, storyteller_name: &str) -> Self {
        self.prompt_text = Some(prompt_text.to_string());
        self.asker_name = Some(asker_name.to_string());
        self.storyteller_name = Some(storyteller_name.to_string());
        self
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Apply a partial update. A patch that would lower the status is rejected whole.
    pub fn apply(&mut self, patch: &RecordPatch) -> Result<(), RecordError> {
        if let Some(next) = patch.status {
            if !self.status.can_move_to(next) {
                return Err(RecordError::StatusRegression {
                    from: self.status.to_string(),
                    to: next.to_string(),
                });
            }
            self.status = next;
        }

        let data = &mut self.recording_data;
        if let Some(v) = patch.file_size {
            data.file_size = Some(v);
        }
        if let Some(v) = &patch.mime_type {
            data.mime_type = Some(v.clone());
        }
        if let Some(v) = patch.duration {
            data.duration = Some(v);
        }
        if let Some(v) = patch.upload_progress {
            data.upload_progress = Some(v.clamp(0.0, 1.0));
        }
        if let Some(v) = patch.upload_started_at {
            data.upload_started_at = Some(v);
        }
        if let Some(v) = patch.total_chunks {
            data.total_chunks = Some(v);
        }
        if let Some(v) = patch.combined_size {
            data.combined_size = Some(v);
        }
        if let Some(v) = &patch.final_video {
            self.storage_paths.final_video = Some(v.clone());
        }
        if let Some(v) = &patch.chunk_paths {
            self.storage_paths.chunks = Some(v.clone());
        }
        if let Some(v) = patch.recording_completed_at {
            self.recording_completed_at = Some(v);
        }
        if let Some(v) = &patch.error {
            self.error = Some(v.clone());
        }
        Ok(())
    }
}

/// Partial record update. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub status: Option<RecordStatus>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
    pub duration: Option<u32>,
    pub upload_progress: Option<f64>,
    pub upload_started_at: Option<DateTime<Utc>>,
    pub total_chunks: Option<u32>,
    pub combined_size: Option<u64>,
    pub final_video: Option<String>,
    pub chunk_paths: Option<Vec<String>>,
    pub recording_completed_at: Option<DateTime<Utc>>,
    pub error: Option<RecordErrorInfo>,
}

impl RecordPatch {
    pub fn status(status: RecordStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(fraction: f64) -> Self {
        Self {
            upload_progress: Some(fraction),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(RecordStatus::Failed),
            error: Some(RecordErrorInfo {
                message: message.into(),
                timestamp: Utc::now(),
            }),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &RecordPatch::default()
    }

    /// Dot-path field map as written to the remote record
    pub fn to_field_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let mut put = |key: &str, value: Value| {
            map.insert(key.to_string(), value);
        };

        if let Some(v) = self.status {
            put("status", Value::from(v.as_str()));
        }
        if let Some(v) = &self.final_video {
            put("storagePaths.finalVideo", Value::from(v.clone()));
        }
        if let Some(v) = &self.chunk_paths {
            put("storagePaths.chunks", Value::from(v.clone()));
        }
        if let Some(v) = self.file_size {
            put("recordingData.fileSize", Value::from(v));
        }
        if let Some(v) = &self.mime_type {
            put("recordingData.mimeType", Value::from(v.clone()));
        }
        if let Some(v) = self.duration {
            put("recordingData.duration", Value::from(v));
        }
        if let Some(v) = self.upload_progress {
            put("recordingData.uploadProgress", Value::from(v));
        }
        if let Some(v) = self.upload_started_at {
            put("recordingData.uploadStartedAt", Value::from(v.to_rfc3339()));
        }
        if let Some(v) = self.total_chunks {
            put("recordingData.totalChunks", Value::from(v));
        }
        if let Some(v) = self.combined_size {
            put("recordingData.combinedSize", Value::from(v));
        }
        if let Some(v) = self.recording_completed_at {
            put("recordingCompletedAt", Value::from(v.to_rfc3339()));
        }
        if let Some(v) = &self.error {
            put("error.message", Value::from(v.message.clone()));
            put("error.timestamp", Value::from(v.timestamp.to_rfc3339()));
        }
        map
    }
}

/// Chunk metadata folded into the completion transaction
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSummary {
    pub paths: Vec<String>,
    pub combined_size: u64,
}

impl ChunkSummary {
    pub fn total_chunks(&self) -> u32 {
        self.paths.len() as u32
    }
}

/// The single write that finalizes a record: status, storage pointer and
/// recording metadata land together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionTransaction {
    pub final_path: Option<String>,
    pub chunks: Option<ChunkSummary>,
    pub file_size: u64,
    pub mime_type: String,
    pub duration_seconds: Option<u32>,
    pub completed_at: DateTime<Utc>,
}

impl CompletionTransaction {
    pub fn for_blob(final_path: &str, file_size: u64, mime_type: &str) -> Self {
        Self {
            final_path: Some(final_path.to_string()),
            chunks: None,
            file_size,
            mime_type: mime_type.to_string(),
            duration_seconds: None,
            completed_at: Utc::now(),
        }
    }

    pub fn for_chunks(summary: ChunkSummary, mime_type: &str) -> Self {
        Self {
            final_path: None,
            file_size: summary.combined_size,
            chunks: Some(summary),
            mime_type: mime_type.to_string(),
            duration_seconds: None,
            completed_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration_seconds: Option<u32>) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }

    pub fn to_patch(&self) -> RecordPatch {
        RecordPatch {
            status: Some(RecordStatus::ReadyForTranscription),
            file_size: Some(self.file_size),
            mime_type: Some(self.mime_type.clone()),
            duration: self.duration_seconds,
            upload_progress: Some(1.0),
            total_chunks: self.chunks.as_ref().map(ChunkSummary::total_chunks),
            combined_size: self.chunks.as_ref().map(|c| c.combined_size),
            final_video: self.final_path.clone(),
            chunk_paths: self.chunks.as_ref().map(|c| c.paths.clone()),
            recording_completed_at: Some(self.completed_at),
            ..Default::default()
        }
    }
}

/// Remote session record access
#[async_trait]
pub trait SessionRecordStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<RemoteSessionRecord>, RecordError>;

    /// Partial field update. Never lowers `status`.
    async fn update(&self, session_id: &str, patch: RecordPatch) -> Result<(), RecordError>;

    /// Apply the completion transaction atomically
    async fn complete(
        &self,
        session_id: &str,
        transaction: CompletionTransaction,
    ) -> Result<(), RecordError>;
}

/// One JSON file per session record
pub struct FsRecordStore {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl FsRecordStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Create or replace a record
    pub async fn put_record(&self, record: &RemoteSessionRecord) -> Result<(), RecordError> {
        let _guard = self.write_lock.lock().await;
        self.write(record).await
    }

    fn record_path(&self, session_id: &str) -> Result<PathBuf, RecordError> {
        let safe = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(RecordError::Write {
                details: format!("unsupported session id '{}'", session_id),
            });
        }
        Ok(self.directory.join(format!("{}.json", session_id)))
    }

    async fn read(&self, session_id: &str) -> Result<Option<RemoteSessionRecord>, RecordError> {
        let path = self.record_path(session_id)?;
        match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| RecordError::Write {
                    details: format!("corrupt record {}: {}", path.display(), e),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RecordError::Write {
                details: e.to_string(),
            }),
        }
    }

    async fn write(&self, record: &RemoteSessionRecord) -> Result<(), RecordError> {
        let path = self.record_path(&record.session_id)?;
        let io_err = |e: std::io::Error| RecordError::Write {
            details: e.to_string(),
        };

        fs::create_dir_all(&self.directory).await.map_err(io_err)?;
        let json = serde_json::to_string_pretty(record).map_err(|e| RecordError::Write {
            details: e.to_string(),
        })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await.map_err(io_err)?;
        fs::rename(&tmp_path, &path).await.map_err(io_err)?;
        Ok(())
    }

    async fn modify(&self, session_id: &str, patch: &RecordPatch) -> Result<(), RecordError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .read(session_id)
            .await?
            .ok_or_else(|| RecordError::NotFound {
                session_id: session_id.to_string(),
            })?;

        if let Err(e) = record.apply(patch) {
            warn!("Rejected update for {}: {}", session_id, e);
            return Err(e);
        }
        self.write(&record).await?;
        let fields: Vec<String> = patch.to_field_map().keys().cloned().collect();
        debug!("Updated record {}: {}", session_id, fields.join(", "));
        Ok(())
    }
}

#[async_trait]
impl SessionRecordStore for FsRecordStore {
    async fn get(&self, session_id: &str) -> Result<Option<RemoteSessionRecord>, RecordError> {
        self.read(session_id).await
    }

    async fn update(&self, session_id: &str, patch: RecordPatch) -> Result<(), RecordError> {
        self.modify(session_id, &patch).await
    }

    async fn complete(
        &self,
        session_id: &str,
        transaction: CompletionTransaction,
    ) -> Result<(), RecordError> {
        self.modify(session_id, &transaction.to_patch()).await
    }
}
