use super::CaptureApp;
use crate::device::{CaptureMode, PermissionState};
use crate::diagnostics::DiagnosticContext;
use crate::error::{PermissionError, RecorderError, Result};
use crate::events::PipelineEvent;
use crate::flow::{FlowEvent, Screen};
use crate::identifier::{extract_from_link, SessionIdentifier};
use crate::recorder::{DurationTimer, TickOutcome};
use crate::session::{SessionStatus, ValidationOutcome};
use crate::upload::UploadOptions;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl CaptureApp {
    /// Resolve the link, validate the session and enter the flow.
    ///
    /// Any problem with the link ends on the terminal link-unavailable screen.
    pub async fn load_session(&mut self, link: &str) -> Screen {
        let raw = match extract_from_link(link) {
            Ok(raw) => raw,
            Err(e) => {
                self.diagnostics.log_warning(
                    &format!("Unusable link: {}", e),
                    DiagnosticContext::new("load_session").field("link", link),
                );
                let outcome = ValidationOutcome::invalid(SessionStatus::Invalid, "This link is invalid");
                return self.navigator.apply_validation(&outcome).clone();
            }
        };

        let outcome = self.validator.validate(&raw).await;
        if !outcome.is_valid {
            return self.navigator.apply_validation(&outcome).clone();
        }

        let identity = match SessionIdentifier::parse(&raw) {
            Ok(identity) => identity,
            Err(e) => {
                let outcome = ValidationOutcome::invalid(SessionStatus::Invalid, e.to_string());
                return self.navigator.apply_validation(&outcome).clone();
            }
        };

        let session_id = identity.session_id();
        self.device = self.new_device(&session_id);
        self.navigator = self.new_navigator(&session_id);
        self.navigator.apply_validation(&outcome);
        self.session_data = outcome.session_data;
        self.identity = Some(identity);

        info!("Session {} loaded ({})", session_id, outcome.status);
        self.diagnostics.log_info(
            "Session loaded",
            DiagnosticContext::new("load_session")
                .session(session_id)
                .field("status", outcome.status.to_string()),
        );
        self.screen().clone()
    }

    pub fn begin(&mut self) -> Screen {
        self.navigator.dispatch(FlowEvent::Begin).clone()
    }

    /// The user chose to answer the prompt
    pub fn respond(&mut self) -> Screen {
        self.navigator.dispatch(FlowEvent::ShowModeChoice).clone()
    }

    pub fn select_mode(&mut self, mode: CaptureMode) -> Screen {
        self.navigator.dispatch(FlowEvent::SelectMode(mode)).clone()
    }

    pub async fn request_permission(&mut self) -> Screen {
        let Screen::PermissionRequest { mode } = self.screen().clone() else {
            return self.screen().clone();
        };

        match self.device.request_permission(mode).await {
            Ok(PermissionState::Granted) => {
                self.last_error = None;
                self.navigator.dispatch(FlowEvent::PermissionGranted);
            }
            Ok(PermissionState::Denied) => {
                self.navigator.dispatch(FlowEvent::PermissionDenied);
            }
            Ok(other) => debug!("Permission request returned {}", other),
            Err(e) => {
                self.last_error = Some(e.user_message());
                self.navigator.dispatch(FlowEvent::PermissionDenied);
            }
        }
        self.screen().clone()
    }

    pub fn retry_permission(&mut self) -> Screen {
        self.device.retry();
        self.navigator.dispatch(FlowEvent::RetryPermission).clone()
    }

    /// The user heard or saw their device working
    pub fn confirm_device_test(&mut self) -> Screen {
        if !self.device.has_live_stream() {
            self.last_error = Some(PermissionError::NoActiveStream.user_message());
            return self.screen().clone();
        }
        self.navigator.dispatch(FlowEvent::DeviceTestPassed).clone()
    }

    pub async fn switch_device(&mut self, device_id: &str) -> std::result::Result<(), PermissionError> {
        let result = self.device.switch_device(device_id).await;
        if let Err(e) = &result {
            self.last_error = Some(e.user_message());
        }
        result
    }

    pub async fn start_recording(&mut self) -> Result<Screen> {
        if !matches!(self.screen(), Screen::ReadyToRecord { .. }) {
            return Ok(self.screen().clone());
        }

        let stream = self
            .device
            .current_stream()
            .ok_or(PermissionError::NoActiveStream)?;
        let mime_type = self.recorder.start(&stream)?;

        if let Some(identity) = self.identity.clone() {
            // Best effort; failures are already in diagnostics
            let _ = self.engine.mark_recording(&identity).await;

            if self.config.chunked.enabled {
                let options = self.upload_options();
                self.chunked = Some(self.engine.chunked_uploader(&identity, &mime_type, &options).await);
            }
        }

        Ok(self.navigator.dispatch(FlowEvent::StartRecording).clone())
    }

    /// Data delivered by the platform recording primitive
    pub fn push_media(&mut self, data: impl Into<Bytes>) {
        self.recorder.push_chunk(data);
    }

    pub fn pause(&mut self) -> Result<Screen> {
        if !matches!(self.screen(), Screen::Recording { .. }) {
            return Ok(self.screen().clone());
        }
        self.recorder.pause()?;
        Ok(self.navigator.dispatch(FlowEvent::PauseRecording).clone())
    }

    pub fn resume(&mut self) -> Result<Screen> {
        if !matches!(self.screen(), Screen::Paused { .. }) {
            return Ok(self.screen().clone());
        }
        self.recorder.resume()?;
        Ok(self.navigator.dispatch(FlowEvent::ResumeRecording).clone())
    }

    pub fn stop_recording(&mut self) -> Result<Screen> {
        if !matches!(self.screen(), Screen::Recording { .. } | Screen::Paused { .. }) {
            return Ok(self.screen().clone());
        }
        self.recorder.stop()?;
        Ok(self.navigator.dispatch(FlowEvent::StopRecording).clone())
    }

    /// Advance the recording clock by one second
    pub async fn tick(&mut self) -> Screen {
        match self.recorder.tick() {
            TickOutcome::Idle => {}
            TickOutcome::Counted(elapsed) | TickOutcome::Warning { elapsed, .. } => {
                let _ = self.event_bus.publish(PipelineEvent::RecordingTick {
                    elapsed_seconds: elapsed,
                });
                let interval = self.config.chunked.interval_seconds.max(1);
                if elapsed % interval == 0 {
                    self.flush_chunk().await;
                }
            }
            TickOutcome::HardStop(blob) => {
                info!(
                    "Recording stopped at the {}s limit ({} bytes)",
                    blob.duration_seconds,
                    blob.size()
                );
                self.navigator.dispatch(FlowEvent::MaxDurationReached);
            }
        }
        self.screen().clone()
    }

    /// Whether the duration clock should keep running
    pub fn is_capturing(&self) -> bool {
        matches!(self.screen(), Screen::Recording { .. } | Screen::Paused { .. })
    }

    /// Upload the reviewed recording
    pub async fn submit(&mut self) -> Screen {
        if !matches!(self.screen(), Screen::Review { .. }) {
            return self.screen().clone();
        }
        self.navigator.dispatch(FlowEvent::Submit);
        self.perform_upload().await
    }

    /// Re-enter the upload step without re-recording
    pub async fn retry_upload(&mut self) -> Screen {
        if !matches!(self.screen(), Screen::Error { retryable: true, .. }) {
            return self.screen().clone();
        }
        self.navigator.dispatch(FlowEvent::RetryUpload);
        self.perform_upload().await
    }

    /// Go back one step, releasing whatever the previous screen did not hold
    pub async fn back(&mut self) -> Screen {
        let before = self.screen().clone();
        let after = self.navigator.back().clone();
        if after == before {
            return after;
        }

        if before.holds_stream() && !after.holds_stream() {
            self.device.release();
        }
        match (&before, &after) {
            // A denial is forgotten with the mode, so the next request prompts again
            (Screen::PermissionRequest { .. }, Screen::ModeChoice) => self.device.release(),
            (
                Screen::Recording { .. } | Screen::Paused { .. } | Screen::Review { .. },
                Screen::ReadyToRecord { .. },
            ) => {
                self.recorder.reset();
                self.discard_chunks().await;
            }
            _ => {}
        }
        after
    }

    /// Hard reset: release the stream, drop the recording, cancel uploads
    pub async fn start_over(&mut self) -> Screen {
        if self.screen().is_terminal() {
            return self.screen().clone();
        }

        self.upload_cancel.cancel();
        self.upload_cancel = CancellationToken::new();
        self.discard_chunks().await;
        self.last_result = None;
        self.last_error = None;

        self.navigator
            .start_over(&self.device, &mut self.recorder)
            .clone()
    }

    fn upload_options(&self) -> UploadOptions {
        let mut options = UploadOptions::new().with_cancel(self.upload_cancel.clone());
        if let Some(full) = self.session_data.as_ref().and_then(|d| d.full_user_id.clone()) {
            options = options.with_full_user_id(full);
        }
        options
    }

    async fn perform_upload(&mut self) -> Screen {
        let (Some(identity), Some(blob)) = (self.identity.clone(), self.recorder.recorded_blob().cloned())
        else {
            warn!("Upload requested without a session or recording");
            self.navigator.dispatch(FlowEvent::UploadFailed {
                message: RecorderError::EmptyRecording.to_string(),
                retryable: false,
            });
            return self.screen().clone();
        };

        let options = self.upload_options().with_duration(blob.duration_seconds);
        let outcome = match self.chunked.take() {
            Some(mut uploader) => {
                if let Some(tail) = self.recorder.take_new_chunks() {
                    let _ = uploader.upload_chunk(tail).await;
                }
                self.engine
                    .finish_chunked(uploader, &blob, &identity, &options)
                    .await
            }
            None => self.engine.upload(&blob, &identity, &options).await,
        };

        match outcome {
            Ok(result) => {
                self.last_error = None;
                self.last_result = Some(result);
                self.device.release();
                self.navigator.dispatch(FlowEvent::UploadSucceeded);
            }
            Err(e) => {
                let message = e.user_message();
                self.last_error = Some(message.clone());
                self.navigator.dispatch(FlowEvent::UploadFailed {
                    message,
                    retryable: e.is_retryable(),
                });
            }
        }
        self.screen().clone()
    }

    async fn flush_chunk(&mut self) {
        let Some(uploader) = self.chunked.as_mut() else {
            return;
        };
        if let Some(data) = self.recorder.take_new_chunks() {
            if let Err(e) = uploader.upload_chunk(data).await {
                debug!("Chunk upload failed, whole recording will be uploaded: {}", e);
            }
        }
    }

    async fn discard_chunks(&mut self) {
        if let Some(uploader) = self.chunked.take() {
            uploader.discard().await;
        }
    }
}

/// Drive the app's recording clock once per second while capture is active
pub fn spawn_duration_timer(app: Arc<Mutex<CaptureApp>>) -> DurationTimer {
    DurationTimer::every_second(move || {
        let app = Arc::clone(&app);
        async move {
            let mut app = app.lock().await;
            app.tick().await;
            app.is_capturing()
        }
    })
}
