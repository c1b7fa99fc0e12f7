mod backend;
mod codec;
mod machine;
mod timer;

pub use backend::{MemoryRecordingBackend, RecordingBackend};
pub use codec::{preferred_mime_types, select_mime_type};
pub use machine::{DurationLimits, RecordedBlob, RecorderState, RecorderStateMachine, TickOutcome};
pub use timer::DurationTimer;
