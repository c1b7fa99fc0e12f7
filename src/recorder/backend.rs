use crate::device::MediaStream;
use crate::error::RecorderError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Platform recording primitive wrapped by the recorder state machine
pub trait RecordingBackend: Send {
    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn start(&mut self, stream: &MediaStream, mime_type: &str) -> Result<(), RecorderError>;

    fn pause(&mut self) -> Result<(), RecorderError>;

    fn resume(&mut self) -> Result<(), RecorderError>;

    /// Stop and flush; returns any data not yet delivered as a chunk
    fn stop(&mut self) -> Result<Option<Bytes>, RecorderError>;
}

#[derive(Debug, Default)]
struct BackendLog {
    calls: Vec<String>,
    stop_failures: u32,
}

/// In-memory backend for tests and the CLI. Emits a fixed flush on stop.
#[derive(Clone)]
pub struct MemoryRecordingBackend {
    supported: HashSet<String>,
    final_flush: Option<Bytes>,
    fail_start: bool,
    log: Arc<Mutex<BackendLog>>,
}

impl MemoryRecordingBackend {
    pub fn supporting(types: &[&str]) -> Self {
        Self {
            supported: types.iter().map(|t| t.to_string()).collect(),
            final_flush: None,
            fail_start: false,
            log: Arc::new(Mutex::new(BackendLog::default())),
        }
    }

    pub fn with_final_flush(mut self, data: impl Into<Bytes>) -> Self {
        self.final_flush = Some(data.into());
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail the next `count` stops, as a platform recorder that will not flush
    pub fn failing_stops(self, count: u32) -> Self {
        self.log.lock().stop_failures = count;
        self
    }

    /// Backend calls observed so far, e.g. `start:audio/webm`
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().calls.clone()
    }

    fn note(&self, call: String) {
        self.log.lock().calls.push(call);
    }
}

impl RecordingBackend for MemoryRecordingBackend {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported.contains(mime_type)
    }

    fn start(&mut self, stream: &MediaStream, mime_type: &str) -> Result<(), RecorderError> {
        if self.fail_start {
            return Err(RecorderError::Backend {
                details: "recorder could not start".to_string(),
            });
        }
        if !stream.is_active() {
            return Err(RecorderError::Backend {
                details: "stream has no live tracks".to_string(),
            });
        }
        self.note(format!("start:{}", mime_type));
        Ok(())
    }

    fn pause(&mut self) -> Result<(), RecorderError> {
        self.note("pause".to_string());
        Ok(())
    }

    fn resume(&mut self) -> Result<(), RecorderError> {
        self.note("resume".to_string());
        Ok(())
    }

    fn stop(&mut self) -> Result<Option<Bytes>, RecorderError> {
        self.note("stop".to_string());
        let mut log = self.log.lock();
        if log.stop_failures > 0 {
            log.stop_failures -= 1;
            return Err(RecorderError::Backend {
                details: "recorder did not stop".to_string(),
            });
        }
        Ok(self.final_flush.clone())
    }
}
