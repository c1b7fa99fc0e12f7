use crate::device::{CaptureMode, PermissionState};
use serde::Serialize;

/// Read-only view of the in-progress capture attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    pub capture_mode: Option<CaptureMode>,
    pub permission_state: PermissionState,
    pub has_live_stream: bool,
    pub is_recording: bool,
    pub is_paused: bool,
    pub elapsed_seconds: u32,
    pub remaining_seconds: u32,
    /// Size of the finished recording, once stopped
    pub recorded_bytes: Option<u64>,
    pub mime_type: Option<String>,
}
