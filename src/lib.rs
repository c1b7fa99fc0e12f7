pub mod app;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod flow;
pub mod identifier;
pub mod recorder;
pub mod session;
pub mod upload;

pub use app::{spawn_duration_timer, CaptureApp, CaptureAppBuilder, CaptureSession};
pub use config::{CompletionPolicy, StoryCaptureConfig};
pub use device::{
    CaptureMode, DeviceCaptureController, MediaDevices, PermissionState, ScriptedMediaDevices,
};
pub use diagnostics::{
    DiagnosticContext, DiagnosticEvent, DiagnosticsRing, DiagnosticsSink, Severity,
};
pub use error::{Result, StoryCaptureError, UploadError};
pub use events::{EventBus, EventFilter, EventReceiver, PipelineEvent};
pub use flow::{FlowEvent, FlowNavigator, FlowState, Screen};
pub use identifier::{extract_from_link, SessionIdentifier, ValidityWindow};
pub use recorder::{
    MemoryRecordingBackend, RecordedBlob, RecorderState, RecorderStateMachine, RecordingBackend,
};
pub use session::{
    RecordBackedValidator, SessionData, SessionStatus, SessionValidator, ValidationOutcome,
};
pub use upload::{
    FsObjectStorage, FsRecordStore, ObjectStorage, RecordStatus, RemoteSessionRecord,
    SessionRecordStore, UploadEngine, UploadOptions, UploadResult,
};
