use super::media::{CaptureMode, DeviceInfo, MediaDevices, MediaRequest, MediaStream};
use crate::diagnostics::{DiagnosticContext, DiagnosticsSink};
use crate::error::PermissionError;
use crate::events::{EventBus, PipelineEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Capture permission lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Idle,
    Requesting,
    Granted,
    Denied,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionState::Idle => "idle",
            PermissionState::Requesting => "requesting",
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
        };
        f.write_str(s)
    }
}

struct ControllerState {
    permission: PermissionState,
    mode: Option<CaptureMode>,
    stream: Option<MediaStream>,
    last_error: Option<PermissionError>,
}

const OP_NONE: u8 = 0;
const OP_REQUEST: u8 = 1;
const OP_SWITCH: u8 = 2;

/// Holds the single operation slot; frees it when the operation ends,
/// including on early return
struct OperationSlot<'a>(&'a AtomicU8);

impl<'a> OperationSlot<'a> {
    /// Claim the slot for `op`, or report which operation holds it
    fn acquire(slot: &'a AtomicU8, op: u8) -> Result<Self, u8> {
        slot.compare_exchange(OP_NONE, op, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| Self(slot))
    }
}

impl Drop for OperationSlot<'_> {
    fn drop(&mut self) {
        self.0.store(OP_NONE, Ordering::SeqCst);
    }
}

fn busy_with(op: u8) -> PermissionError {
    let operation = if op == OP_SWITCH {
        "device switch"
    } else {
        "permission request"
    };
    PermissionError::Busy {
        operation: operation.to_string(),
    }
}

/// Owns the live media stream and the permission state machine.
///
/// `idle -> requesting -> granted | denied`. Permission requests and device
/// switches share one operation slot, so at most one touches the stream.
/// [`release`](Self::release) bumps a generation counter; a platform call
/// that resolves after a release has its stream stopped and dropped.
pub struct DeviceCaptureController {
    devices: Arc<dyn MediaDevices>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    event_bus: Option<EventBus>,
    session_id: Option<String>,
    state: Mutex<ControllerState>,
    operation: AtomicU8,
    generation: AtomicU64,
}

impl DeviceCaptureController {
    pub fn new(devices: Arc<dyn MediaDevices>, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            devices,
            diagnostics,
            event_bus: None,
            session_id: None,
            state: Mutex::new(ControllerState {
                permission: PermissionState::Idle,
                mode: None,
                stream: None,
                last_error: None,
            }),
            operation: AtomicU8::new(OP_NONE),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn permission_state(&self) -> PermissionState {
        self.state.lock().permission
    }

    pub fn mode(&self) -> Option<CaptureMode> {
        self.state.lock().mode
    }

    pub fn current_stream(&self) -> Option<MediaStream> {
        self.state.lock().stream.clone()
    }

    pub fn has_live_stream(&self) -> bool {
        self.state
            .lock()
            .stream
            .as_ref()
            .map(MediaStream::is_active)
            .unwrap_or(false)
    }

    pub fn active_device_id(&self) -> Option<String> {
        self.state
            .lock()
            .stream
            .as_ref()
            .and_then(|s| s.device_id().map(str::to_string))
    }

    pub fn last_error(&self) -> Option<PermissionError> {
        self.state.lock().last_error.clone()
    }

    /// Ask the platform for a stream in `mode`.
    ///
    /// Prompts at most once per entry into `requesting`. A concurrent duplicate
    /// call returns `Requesting` without prompting. While `denied`, returns
    /// `Denied` until [`retry`](Self::retry) is called.
    pub async fn request_permission(
        &self,
        mode: CaptureMode,
    ) -> Result<PermissionState, PermissionError> {
        let _slot = match OperationSlot::acquire(&self.operation, OP_REQUEST) {
            Ok(slot) => slot,
            Err(OP_REQUEST) => {
                debug!("Permission request already in flight; not prompting again");
                return Ok(PermissionState::Requesting);
            }
            Err(op) => return Err(busy_with(op)),
        };

        let generation = {
            let mut state = self.state.lock();
            match state.permission {
                PermissionState::Granted if state.mode == Some(mode) => {
                    return Ok(PermissionState::Granted);
                }
                PermissionState::Denied => return Ok(PermissionState::Denied),
                PermissionState::Granted => {
                    // Switching modes: previous stream no longer matches
                    if let Some(old) = state.stream.take() {
                        old.stop_all_tracks();
                    }
                }
                PermissionState::Idle | PermissionState::Requesting => {}
            }
            state.permission = PermissionState::Requesting;
            state.mode = Some(mode);
            state.last_error = None;
            self.generation.load(Ordering::SeqCst)
        };
        self.publish_permission(PermissionState::Requesting);

        info!("Requesting {} permission", mode.device_label());
        let request = MediaRequest {
            mode,
            device_id: None,
        };
        let outcome = self.devices.get_user_media(&request).await;

        let new_state = {
            let mut state = self.state.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                drop(state);
                if let Ok(late) = outcome {
                    late.stop_all_tracks();
                }
                debug!(
                    "Released while the {} prompt was open; dropping its result",
                    mode.device_label()
                );
                return Ok(PermissionState::Idle);
            }
            match outcome {
                Ok(stream) => {
                    state.stream = Some(stream);
                    state.permission = PermissionState::Granted;
                    Ok(PermissionState::Granted)
                }
                Err(e) => {
                    state.permission = PermissionState::Denied;
                    state.last_error = Some(e.clone());
                    Err(e)
                }
            }
        };

        match &new_state {
            Ok(granted) => {
                self.diagnostics.log_info(
                    "Capture permission granted",
                    self.context("permission").field("mode", mode.as_str()),
                );
                self.publish_permission(*granted);
            }
            Err(e) => {
                self.diagnostics.log_warning(
                    &format!("Capture permission failed: {}", e),
                    self.context("permission").field("mode", mode.as_str()),
                );
                self.publish_permission(PermissionState::Denied);
            }
        }

        new_state
    }

    /// Reset a denial so the user can be prompted again
    pub fn retry(&self) -> PermissionState {
        let mut state = self.state.lock();
        if state.permission == PermissionState::Denied {
            state.permission = PermissionState::Idle;
            state.last_error = None;
            drop(state);
            self.publish_permission(PermissionState::Idle);
            return PermissionState::Idle;
        }
        state.permission
    }

    /// Move the active stream to another input device.
    ///
    /// The new stream is acquired before the old one is released; on failure
    /// the old stream stays live and the permission state is untouched.
    pub async fn switch_device(&self, device_id: &str) -> Result<(), PermissionError> {
        let _slot = OperationSlot::acquire(&self.operation, OP_SWITCH).map_err(busy_with)?;

        let (mode, generation) = {
            let state = self.state.lock();
            let mode = match (&state.permission, &state.stream) {
                (PermissionState::Granted, Some(_)) => state.mode,
                _ => None,
            };
            (mode, self.generation.load(Ordering::SeqCst))
        };
        let mode = mode.ok_or(PermissionError::NoActiveStream)?;

        let request = MediaRequest {
            mode,
            device_id: Some(device_id.to_string()),
        };

        match self.devices.get_user_media(&request).await {
            Ok(new_stream) => {
                let old = {
                    let mut state = self.state.lock();
                    if self.generation.load(Ordering::SeqCst) != generation {
                        drop(state);
                        new_stream.stop_all_tracks();
                        debug!(
                            "Released during switch to {}; dropping the new stream",
                            device_id
                        );
                        return Err(PermissionError::NoActiveStream);
                    }
                    state.last_error = None;
                    state.stream.replace(new_stream)
                };
                if let Some(old) = old {
                    old.stop_all_tracks();
                }
                info!("Switched capture device to {}", device_id);
                self.diagnostics.log_info(
                    "Capture device switched",
                    self.context("device_switch").field("device_id", device_id),
                );
                Ok(())
            }
            Err(e) => {
                warn!("Device switch to {} failed: {}", device_id, e);
                if self.generation.load(Ordering::SeqCst) == generation {
                    self.state.lock().last_error = Some(e.clone());
                }
                self.diagnostics.log_warning(
                    &format!("Device switch failed: {}", e),
                    self.context("device_switch").field("device_id", device_id),
                );
                Err(e)
            }
        }
    }

    pub async fn enumerate_devices(
        &self,
        mode: CaptureMode,
    ) -> Result<Vec<DeviceInfo>, PermissionError> {
        self.devices.enumerate_devices(mode).await
    }

    /// Stop every track and return to `idle`
    pub fn release(&self) {
        let released = {
            let mut state = self.state.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            let stream = state.stream.take();
            state.permission = PermissionState::Idle;
            state.mode = None;
            state.last_error = None;
            stream
        };

        if let Some(stream) = released {
            stream.stop_all_tracks();
            debug!("Released media stream {}", stream.id);
        }
        self.publish_permission(PermissionState::Idle);
    }

    fn context(&self, step: &str) -> DiagnosticContext {
        let context = DiagnosticContext::new(step);
        match &self.session_id {
            Some(id) => context.session(id.clone()),
            None => context,
        }
    }

    fn publish_permission(&self, state: PermissionState) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(PipelineEvent::PermissionChanged {
                state: state.to_string(),
                timestamp: SystemTime::now(),
            });
        }
    }
}

impl Drop for DeviceCaptureController {
    fn drop(&mut self) {
        if let Some(stream) = self.state.get_mut().stream.take() {
            stream.stop_all_tracks();
        }
    }
}
