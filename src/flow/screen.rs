use crate::device::CaptureMode;
use crate::session::SessionStatus;
use std::fmt;

/// Every screen the capture flow can show.
///
/// Variants carry the data their screen needs, so a screen is never inferred
/// from a combination of flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Welcome,
    PromptDisplay,
    ModeChoice,
    PermissionRequest { mode: CaptureMode },
    DeviceTest { mode: CaptureMode },
    ReadyToRecord { mode: CaptureMode },
    Recording { mode: CaptureMode },
    Paused { mode: CaptureMode },
    /// `forced` is set when the maximum duration ended the recording
    Review { mode: CaptureMode, forced: bool },
    Uploading { mode: CaptureMode },
    Success,
    Error {
        mode: CaptureMode,
        message: String,
        retryable: bool,
    },
    /// Terminal: the link cannot be used
    LinkUnavailable {
        status: SessionStatus,
        message: String,
    },
}

impl Screen {
    pub fn name(&self) -> &'static str {
        match self {
            Screen::Welcome => "welcome",
            Screen::PromptDisplay => "prompt",
            Screen::ModeChoice => "mode_choice",
            Screen::PermissionRequest { .. } => "permission_request",
            Screen::DeviceTest { .. } => "device_test",
            Screen::ReadyToRecord { .. } => "ready",
            Screen::Recording { .. } => "recording",
            Screen::Paused { .. } => "paused",
            Screen::Review { .. } => "review",
            Screen::Uploading { .. } => "uploading",
            Screen::Success => "success",
            Screen::Error { .. } => "error",
            Screen::LinkUnavailable { .. } => "link_unavailable",
        }
    }

    pub fn mode(&self) -> Option<CaptureMode> {
        match self {
            Screen::PermissionRequest { mode }
            | Screen::DeviceTest { mode }
            | Screen::ReadyToRecord { mode }
            | Screen::Recording { mode }
            | Screen::Paused { mode }
            | Screen::Review { mode, .. }
            | Screen::Uploading { mode }
            | Screen::Error { mode, .. } => Some(*mode),
            _ => None,
        }
    }

    /// Screens on which a live media stream is expected
    pub fn holds_stream(&self) -> bool {
        matches!(
            self,
            Screen::DeviceTest { .. }
                | Screen::ReadyToRecord { .. }
                | Screen::Recording { .. }
                | Screen::Paused { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Screen::LinkUnavailable { .. })
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode() {
            Some(mode) => write!(f, "{}({})", self.name(), mode),
            None => f.write_str(self.name()),
        }
    }
}

/// UI flags that outlive a single screen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowFlags {
    pub mode: Option<CaptureMode>,
    pub permission_granted: bool,
    pub permission_denied: bool,
    pub device_tested: bool,
    pub has_recording: bool,
    pub max_duration_reached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowState {
    pub screen: Screen,
    pub flags: FlowFlags,
}

impl FlowState {
    pub fn new() -> Self {
        Self {
            screen: Screen::Welcome,
            flags: FlowFlags::default(),
        }
    }

    pub(crate) fn at(screen: Screen, flags: FlowFlags) -> Self {
        Self { screen, flags }
    }
}

impl Default for FlowState {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs to the flow reducer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    Begin,
    /// The user chose to respond to the prompt
    ShowModeChoice,
    SelectMode(CaptureMode),
    PermissionGranted,
    PermissionDenied,
    RetryPermission,
    DeviceTestPassed,
    StartRecording,
    PauseRecording,
    ResumeRecording,
    StopRecording,
    MaxDurationReached,
    Submit,
    UploadSucceeded,
    UploadFailed { message: String, retryable: bool },
    RetryUpload,
    SessionUnavailable {
        status: SessionStatus,
        message: String,
    },
}

impl FlowEvent {
    /// Events that move the user to a new step, each undone by one `back`.
    ///
    /// Everything else updates the current step in place. `UploadSucceeded`
    /// ends the flow and has no inverse.
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            FlowEvent::Begin
                | FlowEvent::ShowModeChoice
                | FlowEvent::SelectMode(_)
                | FlowEvent::PermissionGranted
                | FlowEvent::DeviceTestPassed
                | FlowEvent::StartRecording
                | FlowEvent::Submit
        )
    }
}
