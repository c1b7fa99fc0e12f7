use super::media::{
    CaptureMode, DeviceInfo, MediaDevices, MediaRequest, MediaStream, MediaTrack, TrackKind,
};
use crate::error::PermissionError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

/// Scripted media platform for tests and the CLI, without real hardware
pub struct ScriptedMediaDevices {
    devices: Vec<DeviceInfo>,
    deny_permission: Mutex<bool>,
    failing_devices: Mutex<HashSet<String>>,
    prompt_delay: Duration,
    prompts: AtomicU32,
    opened: Mutex<Vec<MediaStream>>,
}

impl ScriptedMediaDevices {
    /// Platform with one default microphone and camera
    pub fn new() -> Self {
        Self {
            devices: vec![
                DeviceInfo {
                    device_id: "default-mic".to_string(),
                    label: "Default Microphone".to_string(),
                    kind: TrackKind::Audio,
                },
                DeviceInfo {
                    device_id: "default-cam".to_string(),
                    label: "Default Camera".to_string(),
                    kind: TrackKind::Video,
                },
            ],
            deny_permission: Mutex::new(false),
            failing_devices: Mutex::new(HashSet::new()),
            prompt_delay: Duration::ZERO,
            prompts: AtomicU32::new(0),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn with_device(mut self, device_id: &str, label: &str, kind: TrackKind) -> Self {
        self.devices.push(DeviceInfo {
            device_id: device_id.to_string(),
            label: label.to_string(),
            kind,
        });
        self
    }

    /// Delay each request so concurrent calls overlap
    pub fn with_prompt_delay(mut self, delay: Duration) -> Self {
        self.prompt_delay = delay;
        self
    }

    pub fn set_deny_permission(&self, deny: bool) {
        *self.deny_permission.lock() = deny;
    }

    pub fn fail_device(&self, device_id: &str) {
        self.failing_devices.lock().insert(device_id.to_string());
    }

    /// Number of platform prompts issued so far
    pub fn prompt_count(&self) -> u32 {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Every stream handed out so far
    pub fn opened_streams(&self) -> Vec<MediaStream> {
        self.opened.lock().clone()
    }

    fn default_device(&self, kind: TrackKind) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.kind == kind)
    }
}

impl Default for ScriptedMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for ScriptedMediaDevices {
    async fn get_user_media(&self, request: &MediaRequest) -> Result<MediaStream, PermissionError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if !self.prompt_delay.is_zero() {
            tokio::time::sleep(self.prompt_delay).await;
        }

        if *self.deny_permission.lock() {
            return Err(PermissionError::Denied {
                kind: request.mode.device_label().to_string(),
                details: "NotAllowedError".to_string(),
            });
        }

        let primary_kind = match request.mode {
            CaptureMode::Audio => TrackKind::Audio,
            CaptureMode::Video => TrackKind::Video,
        };

        let primary = match &request.device_id {
            Some(id) => {
                if self.failing_devices.lock().contains(id) {
                    return Err(PermissionError::DeviceUnavailable {
                        device_id: id.clone(),
                        details: "NotReadableError".to_string(),
                    });
                }
                self.devices
                    .iter()
                    .find(|d| &d.device_id == id)
                    .ok_or_else(|| PermissionError::DeviceUnavailable {
                        device_id: id.clone(),
                        details: "device not found".to_string(),
                    })?
            }
            None => self.default_device(primary_kind).ok_or_else(|| {
                PermissionError::DeviceUnavailable {
                    device_id: "default".to_string(),
                    details: "no device of this kind".to_string(),
                }
            })?,
        };

        let mut tracks = vec![MediaTrack::new(primary.kind, &primary.device_id)];
        if request.mode == CaptureMode::Video {
            // Video responses also carry the default microphone
            if let Some(mic) = self.default_device(TrackKind::Audio) {
                tracks.push(MediaTrack::new(TrackKind::Audio, &mic.device_id));
            }
        }

        let stream = MediaStream::new(request.mode, tracks);
        debug!("Scripted platform opened stream {}", stream.id);
        self.opened.lock().push(stream.clone());
        Ok(stream)
    }

    async fn enumerate_devices(&self, mode: CaptureMode) -> Result<Vec<DeviceInfo>, PermissionError> {
        let kind = match mode {
            CaptureMode::Audio => TrackKind::Audio,
            CaptureMode::Video => TrackKind::Video,
        };
        Ok(self
            .devices
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect())
    }
}
