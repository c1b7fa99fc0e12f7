use super::backend::RecordingBackend;
use super::codec::select_mime_type;
use crate::config::RecorderConfig;
use crate::device::{CaptureMode, MediaStream};
use crate::diagnostics::{DiagnosticContext, DiagnosticsSink};
use crate::error::RecorderError;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Recording,
    Paused,
    Stopped,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecorderState::Inactive => "inactive",
            RecorderState::Recording => "recording",
            RecorderState::Paused => "paused",
            RecorderState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationLimits {
    pub warning_seconds: u32,
    pub max_seconds: u32,
}

impl From<&RecorderConfig> for DurationLimits {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            warning_seconds: config.warning_seconds,
            max_seconds: config.max_duration_seconds,
        }
    }
}

/// A finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBlob {
    pub data: Bytes,
    pub mime_type: String,
    pub mode: CaptureMode,
    pub duration_seconds: u32,
}

impl RecordedBlob {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// What a timer tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Not recording; nothing counted
    Idle,
    Counted(u32),
    /// Warning threshold crossed on this tick
    Warning { elapsed: u32, remaining: u32 },
    /// Maximum reached; the recorder has been stopped
    HardStop(RecordedBlob),
}

type TickCallback = Box<dyn FnMut(u32) + Send>;

/// `inactive -> recording <-> paused -> stopped`, with a duration limit
pub struct RecorderStateMachine {
    backend: Box<dyn RecordingBackend>,
    limits: DurationLimits,
    diagnostics: Arc<dyn DiagnosticsSink>,
    state: RecorderState,
    mode: Option<CaptureMode>,
    mime_type: Option<String>,
    elapsed_seconds: u32,
    chunks: Vec<Bytes>,
    drained_chunks: usize,
    blob: Option<RecordedBlob>,
    warning_fired: bool,
    hard_stop_fired: bool,
    on_warning: Option<TickCallback>,
    on_hard_stop: Option<TickCallback>,
}

impl RecorderStateMachine {
    pub fn new(
        backend: Box<dyn RecordingBackend>,
        limits: DurationLimits,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            backend,
            limits,
            diagnostics,
            state: RecorderState::Inactive,
            mode: None,
            mime_type: None,
            elapsed_seconds: 0,
            chunks: Vec::new(),
            drained_chunks: 0,
            blob: None,
            warning_fired: false,
            hard_stop_fired: false,
            on_warning: None,
            on_hard_stop: None,
        }
    }

    /// Called once when `warning_seconds` is reached
    pub fn on_warning<F: FnMut(u32) + Send + 'static>(&mut self, callback: F) {
        self.on_warning = Some(Box::new(callback));
    }

    /// Called once when `max_seconds` is reached
    pub fn on_hard_stop<F: FnMut(u32) + Send + 'static>(&mut self, callback: F) {
        self.on_hard_stop = Some(Box::new(callback));
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    pub fn is_paused(&self) -> bool {
        self.state == RecorderState::Paused
    }

    pub fn elapsed_seconds(&self) -> u32 {
        self.elapsed_seconds
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.limits.max_seconds.saturating_sub(self.elapsed_seconds)
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn limits(&self) -> DurationLimits {
        self.limits
    }

    pub fn recorded_blob(&self) -> Option<&RecordedBlob> {
        self.blob.as_ref()
    }

    /// Begin recording `stream` with the best codec the backend supports
    pub fn start(&mut self, stream: &MediaStream) -> Result<String, RecorderError> {
        if self.state != RecorderState::Inactive {
            return Err(self.invalid("start"));
        }

        let mime_type = {
            let backend = &self.backend;
            select_mime_type(stream.mode, |mime| backend.is_type_supported(mime))
        };
        self.backend.start(stream, &mime_type)?;

        self.state = RecorderState::Recording;
        self.mode = Some(stream.mode);
        self.mime_type = Some(mime_type.clone());
        self.elapsed_seconds = 0;
        self.chunks.clear();
        self.drained_chunks = 0;
        self.blob = None;
        self.warning_fired = false;
        self.hard_stop_fired = false;

        info!("Recording started ({})", mime_type);
        self.diagnostics.log_info(
            "Recording started",
            DiagnosticContext::new("recorder")
                .field("mime_type", mime_type.clone())
                .field("mode", stream.mode.as_str()),
        );
        Ok(mime_type)
    }

    /// No-op unless recording
    pub fn pause(&mut self) -> Result<(), RecorderError> {
        if self.state != RecorderState::Recording {
            return Ok(());
        }
        self.backend.pause()?;
        self.state = RecorderState::Paused;
        debug!("Recording paused at {}s", self.elapsed_seconds);
        Ok(())
    }

    /// No-op unless paused
    pub fn resume(&mut self) -> Result<(), RecorderError> {
        if self.state != RecorderState::Paused {
            return Ok(());
        }
        self.backend.resume()?;
        self.state = RecorderState::Recording;
        debug!("Recording resumed at {}s", self.elapsed_seconds);
        Ok(())
    }

    /// Buffer data delivered by the platform primitive
    pub fn push_chunk(&mut self, data: impl Into<Bytes>) {
        let data = data.into();
        if data.is_empty() {
            return;
        }
        match self.state {
            RecorderState::Recording | RecorderState::Paused => self.chunks.push(data),
            _ => debug!("Dropping {} byte chunk while {}", data.len(), self.state),
        }
    }

    /// Chunks buffered since the previous call, concatenated
    pub fn take_new_chunks(&mut self) -> Option<Bytes> {
        if self.drained_chunks >= self.chunks.len() {
            return None;
        }
        let fresh = concat(&self.chunks[self.drained_chunks..]);
        self.drained_chunks = self.chunks.len();
        Some(fresh)
    }

    /// Finalize the blob. Stopping twice returns the same blob.
    pub fn stop(&mut self) -> Result<RecordedBlob, RecorderError> {
        match self.state {
            RecorderState::Stopped => {
                return self.blob.clone().ok_or(RecorderError::EmptyRecording);
            }
            RecorderState::Inactive => return Err(self.invalid("stop")),
            RecorderState::Recording | RecorderState::Paused => {}
        }

        if let Some(tail) = self.backend.stop()? {
            if !tail.is_empty() {
                self.chunks.push(tail);
            }
        }
        self.state = RecorderState::Stopped;

        let blob = RecordedBlob {
            data: concat(&self.chunks),
            mime_type: self
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            mode: self.mode.unwrap_or(CaptureMode::Audio),
            duration_seconds: self.elapsed_seconds,
        };

        info!(
            "Recording stopped: {} bytes over {}s",
            blob.size(),
            blob.duration_seconds
        );
        self.diagnostics.log_info(
            "Recording stopped",
            DiagnosticContext::new("recorder")
                .field("bytes", blob.size())
                .field("duration_seconds", blob.duration_seconds)
                .field("chunks", self.chunks.len() as u64),
        );

        self.blob = Some(blob.clone());
        Ok(blob)
    }

    /// Discard any recording and return to `inactive`
    pub fn reset(&mut self) {
        if matches!(self.state, RecorderState::Recording | RecorderState::Paused) {
            let _ = self.backend.stop();
        }
        self.state = RecorderState::Inactive;
        self.mode = None;
        self.mime_type = None;
        self.elapsed_seconds = 0;
        self.chunks.clear();
        self.drained_chunks = 0;
        self.blob = None;
        self.warning_fired = false;
        self.hard_stop_fired = false;
        debug!("Recorder reset");
    }

    /// Advance the duration clock by one second.
    ///
    /// Counts only while recording. The warning and hard stop are latched.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != RecorderState::Recording {
            return TickOutcome::Idle;
        }

        self.elapsed_seconds += 1;
        let elapsed = self.elapsed_seconds;

        // Latched only once the stop succeeds; a failed stop is retried next tick
        if elapsed >= self.limits.max_seconds && !self.hard_stop_fired {
            return match self.stop() {
                Ok(blob) => {
                    self.hard_stop_fired = true;
                    if let Some(callback) = self.on_hard_stop.as_mut() {
                        callback(elapsed);
                    }
                    self.diagnostics.log_warning(
                        "Maximum recording duration reached",
                        DiagnosticContext::new("recorder").field("elapsed_seconds", elapsed),
                    );
                    TickOutcome::HardStop(blob)
                }
                Err(e) => {
                    self.diagnostics.log_error(
                        &format!("Forced stop failed: {}", e),
                        DiagnosticContext::new("recorder").field("elapsed_seconds", elapsed),
                    );
                    TickOutcome::Counted(elapsed)
                }
            };
        }

        if elapsed >= self.limits.warning_seconds && !self.warning_fired {
            self.warning_fired = true;
            if let Some(callback) = self.on_warning.as_mut() {
                callback(elapsed);
            }
            return TickOutcome::Warning {
                elapsed,
                remaining: self.remaining_seconds(),
            };
        }

        TickOutcome::Counted(elapsed)
    }

    fn invalid(&self, operation: &str) -> RecorderError {
        RecorderError::InvalidState {
            operation: operation.to_string(),
            state: self.state.to_string(),
        }
    }
}

fn concat(chunks: &[Bytes]) -> Bytes {
    let total = chunks.iter().map(Bytes::len).sum();
    let mut combined = BytesMut::with_capacity(total);
    for chunk in chunks {
        combined.extend_from_slice(chunk);
    }
    combined.freeze()
}
