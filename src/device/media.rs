use crate::error::PermissionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// What the user chose to record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Audio,
    Video,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Audio => "audio",
            CaptureMode::Video => "video",
        }
    }

    /// Device kind named in permission prompts
    pub fn device_label(&self) -> &'static str {
        match self {
            CaptureMode::Audio => "microphone",
            CaptureMode::Video => "camera",
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// One live track. Clones share the same liveness flag.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    pub device_id: String,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, device_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            device_id: device_id.to_string(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// A live capture stream handed out by the platform
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    pub mode: CaptureMode,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(mode: CaptureMode, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mode,
            tracks,
        }
    }

    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    pub fn stop_all_tracks(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Device backing the primary track for this mode
    pub fn device_id(&self) -> Option<&str> {
        let wanted = match self.mode {
            CaptureMode::Audio => TrackKind::Audio,
            CaptureMode::Video => TrackKind::Video,
        };
        self.tracks
            .iter()
            .find(|t| t.kind == wanted)
            .or_else(|| self.tracks.first())
            .map(|t| t.device_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub mode: CaptureMode,
    /// Specific input device, or the platform default
    pub device_id: Option<String>,
}

/// Platform media access (permission prompt + stream acquisition)
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Prompt for permission if needed and open a stream
    async fn get_user_media(&self, request: &MediaRequest) -> Result<MediaStream, PermissionError>;

    /// List available inputs for a mode
    async fn enumerate_devices(&self, mode: CaptureMode) -> Result<Vec<DeviceInfo>, PermissionError>;
}
