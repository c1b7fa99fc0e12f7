use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoryCaptureError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Invalid link: {0}")]
    Format(#[from] FormatError),

    #[error("Capture device error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Session record error: {0}")]
    Record(#[from] RecordError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl StoryCaptureError {
    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Malformed session identifier. Always fatal for the link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("expected 5 dash-separated parts, found {found}")]
    PartCount { found: usize },

    #[error("part {index} is empty")]
    EmptyPart { index: usize },

    #[error("timestamp '{value}' is not a positive integer")]
    InvalidTimestamp { value: String },

    #[error("no session identifier found in link")]
    MissingIdentifier,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("{kind} permission denied: {details}")]
    Denied { kind: String, details: String },

    #[error("device {device_id} unavailable: {details}")]
    DeviceUnavailable { device_id: String, details: String },

    #[error("{operation} already in progress")]
    Busy { operation: String },

    #[error("no active media stream")]
    NoActiveStream,

    #[error("media platform error: {details}")]
    Platform { details: String },
}

impl PermissionError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PermissionError::Denied { .. }
                | PermissionError::DeviceUnavailable { .. }
                | PermissionError::Busy { .. }
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            PermissionError::Denied { kind, .. } => format!(
                "Access to your {} was blocked. Allow access and try again.",
                kind
            ),
            PermissionError::DeviceUnavailable { .. } => {
                "That device could not be opened. Your current device is still active.".to_string()
            }
            PermissionError::Busy { .. } => "Please wait, the device is still starting.".to_string(),
            PermissionError::NoActiveStream => "No camera or microphone is active.".to_string(),
            PermissionError::Platform { details } => format!("Device error: {}", details),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("cannot {operation} while recorder is {state}")]
    InvalidState { operation: String, state: String },

    #[error("recording produced no data")]
    EmptyRecording,

    #[error("recording backend error: {details}")]
    Backend { details: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("transfer of {path} failed: {details}")]
    Transfer { path: String, details: String },

    #[error("invalid object path '{path}'")]
    InvalidPath { path: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("session record {session_id} not found")]
    NotFound { session_id: String },

    #[error("status cannot move from {from} back to {to}")]
    StatusRegression { from: String, to: String },

    #[error("record write failed: {details}")]
    Write { details: String },
}

/// Byte transfer failed after the retry budget was spent (or was cancelled).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transfer failed after {attempts} attempt(s): {details}")]
pub struct TransferError {
    pub attempts: u32,
    pub details: String,
    pub cancelled: bool,
}

/// The completion transaction failed after the bytes were stored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("completion of {storage_path} failed: {details}")]
pub struct CompletionError {
    pub storage_path: String,
    pub details: String,
    pub object_removed: bool,
}

/// A best-effort record write that failed while the object is safe. Logged, never surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record write at step '{step}' failed: {details}")]
pub struct SoftRecordError {
    pub step: String,
    pub details: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("recording is empty")]
    EmptyBlob,
}

impl UploadError {
    /// Both failures re-enter the upload step without re-recording.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transfer(_) | UploadError::Completion(_) => true,
            UploadError::EmptyBlob => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            UploadError::Transfer(e) if e.cancelled => "Upload was cancelled.".to_string(),
            UploadError::Transfer(_) => {
                "We couldn't upload your recording. Check your connection and try again.".to_string()
            }
            UploadError::Completion(_) => {
                "Your recording uploaded but could not be saved. Please try again.".to_string()
            }
            UploadError::EmptyBlob => "The recording is empty. Please record again.".to_string(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, StoryCaptureError>;
