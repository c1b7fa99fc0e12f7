use super::types::CaptureSession;
use crate::config::StoryCaptureConfig;
use crate::device::{DeviceCaptureController, MediaDevices};
use crate::diagnostics::{DiagnosticsRing, DiagnosticsSink};
use crate::error::{Result, StoryCaptureError};
use crate::events::{EventBus, PipelineEvent};
use crate::flow::{FlowFlags, FlowNavigator, Screen};
use crate::identifier::{SessionIdentifier, ValidityWindow};
use crate::recorder::{DurationLimits, RecorderStateMachine, RecordingBackend};
use crate::session::{RecordBackedValidator, SessionData, SessionValidator};
use crate::upload::{ChunkedUploader, ObjectStorage, SessionRecordStore, UploadEngine, UploadResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Wires identity, device, recorder, navigator and upload engine together
/// and turns user actions into component calls
pub struct CaptureApp {
    pub(super) config: StoryCaptureConfig,
    pub(super) event_bus: EventBus,
    pub(super) diagnostics: Arc<dyn DiagnosticsSink>,
    pub(super) validator: Arc<dyn SessionValidator>,
    pub(super) media_devices: Arc<dyn MediaDevices>,

    // Components
    pub(super) device: DeviceCaptureController,
    pub(super) recorder: RecorderStateMachine,
    pub(super) navigator: FlowNavigator,
    pub(super) engine: UploadEngine,

    // Session
    pub(super) identity: Option<SessionIdentifier>,
    pub(super) session_data: Option<SessionData>,
    pub(super) chunked: Option<ChunkedUploader>,
    pub(super) last_result: Option<UploadResult>,
    pub(super) last_error: Option<String>,
    pub(super) upload_cancel: CancellationToken,
}

impl CaptureApp {
    pub fn builder() -> CaptureAppBuilder {
        CaptureAppBuilder::new()
    }

    pub fn config(&self) -> &StoryCaptureConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn screen(&self) -> &Screen {
        self.navigator.screen()
    }

    pub fn flags(&self) -> &FlowFlags {
        self.navigator.flags()
    }

    pub fn identity(&self) -> Option<&SessionIdentifier> {
        self.identity.as_ref()
    }

    pub fn session_data(&self) -> Option<&SessionData> {
        self.session_data.as_ref()
    }

    pub fn device(&self) -> &DeviceCaptureController {
        &self.device
    }

    pub fn last_result(&self) -> Option<&UploadResult> {
        self.last_result.as_ref()
    }

    /// User-facing message for the most recent failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Token checked between upload attempts; cancel it to abandon an upload
    /// that is currently running
    pub fn upload_cancel_token(&self) -> CancellationToken {
        self.upload_cancel.clone()
    }

    pub fn capture_session(&self) -> CaptureSession {
        let blob = self.recorder.recorded_blob();
        CaptureSession {
            capture_mode: self.navigator.flags().mode,
            permission_state: self.device.permission_state(),
            has_live_stream: self.device.has_live_stream(),
            is_recording: self.recorder.is_recording(),
            is_paused: self.recorder.is_paused(),
            elapsed_seconds: self.recorder.elapsed_seconds(),
            remaining_seconds: self.recorder.remaining_seconds(),
            recorded_bytes: blob.map(|b| b.size()),
            mime_type: self.recorder.mime_type().map(str::to_string),
        }
    }

    pub(super) fn new_device(&self, session_id: &str) -> DeviceCaptureController {
        DeviceCaptureController::new(Arc::clone(&self.media_devices), Arc::clone(&self.diagnostics))
            .with_event_bus(self.event_bus.clone())
            .with_session(session_id)
    }

    pub(super) fn new_navigator(&self, session_id: &str) -> FlowNavigator {
        FlowNavigator::new(Arc::clone(&self.diagnostics))
            .with_event_bus(self.event_bus.clone())
            .with_session(session_id)
    }
}

fn new_recorder(
    backend: Box<dyn RecordingBackend>,
    config: &StoryCaptureConfig,
    diagnostics: Arc<dyn DiagnosticsSink>,
    event_bus: &EventBus,
) -> RecorderStateMachine {
    let limits = DurationLimits::from(&config.recorder);
    let mut recorder = RecorderStateMachine::new(backend, limits, diagnostics);

    let bus = event_bus.clone();
    recorder.on_warning(move |elapsed| {
        let _ = bus.publish(PipelineEvent::DurationWarning {
            elapsed_seconds: elapsed,
            remaining_seconds: limits.max_seconds.saturating_sub(elapsed),
        });
    });
    let bus = event_bus.clone();
    recorder.on_hard_stop(move |elapsed| {
        let _ = bus.publish(PipelineEvent::MaxDurationReached {
            elapsed_seconds: elapsed,
        });
    });
    recorder
}

/// Builder for CaptureApp
pub struct CaptureAppBuilder {
    config: Option<StoryCaptureConfig>,
    media_devices: Option<Arc<dyn MediaDevices>>,
    backend: Option<Box<dyn RecordingBackend>>,
    storage: Option<Arc<dyn ObjectStorage>>,
    records: Option<Arc<dyn SessionRecordStore>>,
    validator: Option<Arc<dyn SessionValidator>>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    event_bus: Option<EventBus>,
}

impl CaptureAppBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            media_devices: None,
            backend: None,
            storage: None,
            records: None,
            validator: None,
            diagnostics: None,
            event_bus: None,
        }
    }

    pub fn with_config(mut self, config: StoryCaptureConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_media_devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.media_devices = Some(devices);
        self
    }

    pub fn with_recording_backend(mut self, backend: Box<dyn RecordingBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_records(mut self, records: Arc<dyn SessionRecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// Defaults to validation against the record store
    pub fn with_validator(mut self, validator: Arc<dyn SessionValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Defaults to an in-memory ring sized from the config
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<CaptureApp> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let media_devices = self
            .media_devices
            .ok_or_else(|| StoryCaptureError::component("capture_app", "Media devices are required"))?;
        let backend = self.backend.ok_or_else(|| {
            StoryCaptureError::component("capture_app", "Recording backend is required")
        })?;
        let storage = self
            .storage
            .ok_or_else(|| StoryCaptureError::component("capture_app", "Object storage is required"))?;
        let records = self
            .records
            .ok_or_else(|| StoryCaptureError::component("capture_app", "Record store is required"))?;

        let diagnostics: Arc<dyn DiagnosticsSink> = match self.diagnostics {
            Some(diagnostics) => diagnostics,
            None => Arc::new(DiagnosticsRing::in_memory(config.diagnostics.capacity)),
        };
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(config.system.event_bus_capacity));

        let validator: Arc<dyn SessionValidator> = match self.validator {
            Some(validator) => validator,
            None => Arc::new(
                RecordBackedValidator::new(Arc::clone(&records), Arc::clone(&diagnostics))
                    .with_window(ValidityWindow::from(&config.identifier)),
            ),
        };

        let device = DeviceCaptureController::new(Arc::clone(&media_devices), Arc::clone(&diagnostics))
            .with_event_bus(event_bus.clone());
        let recorder = new_recorder(backend, &config, Arc::clone(&diagnostics), &event_bus);
        let navigator = FlowNavigator::new(Arc::clone(&diagnostics)).with_event_bus(event_bus.clone());
        let engine = UploadEngine::new(storage, records, Arc::clone(&diagnostics))
            .with_config(&config.upload)
            .with_event_bus(event_bus.clone());

        Ok(CaptureApp {
            config,
            event_bus,
            diagnostics,
            validator,
            media_devices,
            device,
            recorder,
            navigator,
            engine,
            identity: None,
            session_data: None,
            chunked: None,
            last_result: None,
            last_error: None,
            upload_cancel: CancellationToken::new(),
        })
    }
}

impl Default for CaptureAppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
