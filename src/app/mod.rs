mod actions;
mod orchestrator;
mod types;


pub use actions::spawn_duration_timer;
pub use orchestrator::{CaptureApp, CaptureAppBuilder};
pub use types::CaptureSession;
