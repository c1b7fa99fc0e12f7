use super::screen::{FlowEvent, FlowFlags, FlowState, Screen};

/// Next flow state for `event`. Events that do not apply to the current
/// screen leave the state unchanged.
pub fn reduce(state: &FlowState, event: &FlowEvent) -> FlowState {
    if state.screen.is_terminal() {
        return state.clone();
    }

    if let FlowEvent::SessionUnavailable { status, message } = event {
        return FlowState::at(
            Screen::LinkUnavailable {
                status: *status,
                message: message.clone(),
            },
            state.flags.clone(),
        );
    }

    let mut flags = state.flags.clone();
    let screen = match (&state.screen, event) {
        (Screen::Welcome, FlowEvent::Begin) => Screen::PromptDisplay,

        (Screen::PromptDisplay, FlowEvent::ShowModeChoice) => Screen::ModeChoice,

        (Screen::ModeChoice, FlowEvent::SelectMode(mode)) => {
            flags.mode = Some(*mode);
            Screen::PermissionRequest { mode: *mode }
        }

        (Screen::PermissionRequest { mode }, FlowEvent::PermissionGranted)
            if !flags.permission_denied =>
        {
            flags.permission_granted = true;
            flags.permission_denied = false;
            Screen::DeviceTest { mode: *mode }
        }
        (Screen::PermissionRequest { mode }, FlowEvent::PermissionDenied) => {
            flags.permission_denied = true;
            Screen::PermissionRequest { mode: *mode }
        }
        (Screen::PermissionRequest { mode }, FlowEvent::RetryPermission)
            if flags.permission_denied =>
        {
            flags.permission_denied = false;
            Screen::PermissionRequest { mode: *mode }
        }

        (Screen::DeviceTest { mode }, FlowEvent::DeviceTestPassed) => {
            flags.device_tested = true;
            Screen::ReadyToRecord { mode: *mode }
        }

        (Screen::ReadyToRecord { mode }, FlowEvent::StartRecording) => {
            Screen::Recording { mode: *mode }
        }

        (Screen::Recording { mode }, FlowEvent::PauseRecording) => Screen::Paused { mode: *mode },
        (Screen::Paused { mode }, FlowEvent::ResumeRecording) => Screen::Recording { mode: *mode },

        (
            Screen::Recording { mode } | Screen::Paused { mode },
            FlowEvent::StopRecording,
        ) => {
            flags.has_recording = true;
            Screen::Review {
                mode: *mode,
                forced: false,
            }
        }
        // Only reachable while the clock runs, so never from Paused
        (Screen::Recording { mode }, FlowEvent::MaxDurationReached) => {
            flags.has_recording = true;
            flags.max_duration_reached = true;
            Screen::Review {
                mode: *mode,
                forced: true,
            }
        }

        (Screen::Review { mode, .. }, FlowEvent::Submit) => Screen::Uploading { mode: *mode },

        (Screen::Uploading { .. }, FlowEvent::UploadSucceeded) => Screen::Success,
        (Screen::Uploading { mode }, FlowEvent::UploadFailed { message, retryable }) => {
            Screen::Error {
                mode: *mode,
                message: message.clone(),
                retryable: *retryable,
            }
        }

        (
            Screen::Error {
                mode,
                retryable: true,
                ..
            },
            FlowEvent::RetryUpload,
        ) => Screen::Uploading { mode: *mode },

        _ => return state.clone(),
    };

    FlowState::at(screen, flags)
}

/// Undo the last navigation that led to the current screen.
///
/// Exact inverse of [`reduce`] for every event where
/// [`FlowEvent::is_navigation`] holds. In-place events on the way (a denial,
/// pause/resume, stop, a failed upload) are undone along with the navigation
/// that entered their step. Screens with no predecessor are left unchanged.
pub fn back(state: &FlowState) -> FlowState {
    let mut flags = state.flags.clone();
    let screen = match &state.screen {
        Screen::PromptDisplay => Screen::Welcome,
        Screen::ModeChoice => Screen::PromptDisplay,
        Screen::PermissionRequest { .. } => {
            flags.mode = None;
            flags.permission_denied = false;
            Screen::ModeChoice
        }
        Screen::DeviceTest { mode } => {
            flags.permission_granted = false;
            Screen::PermissionRequest { mode: *mode }
        }
        Screen::ReadyToRecord { mode } => {
            flags.device_tested = false;
            Screen::DeviceTest { mode: *mode }
        }
        // The take step: recording, paused and review all came from one start
        Screen::Recording { mode } | Screen::Paused { mode } | Screen::Review { mode, .. } => {
            flags.has_recording = false;
            flags.max_duration_reached = false;
            Screen::ReadyToRecord { mode: *mode }
        }
        Screen::Uploading { mode } | Screen::Error { mode, .. } => Screen::Review {
            mode: *mode,
            forced: flags.max_duration_reached,
        },
        Screen::Welcome | Screen::Success | Screen::LinkUnavailable { .. } => return state.clone(),
    };

    FlowState::at(screen, flags)
}

/// Hard reset to the prompt with every flag cleared
pub fn start_over(state: &FlowState) -> FlowState {
    if state.screen.is_terminal() {
        return state.clone();
    }
    FlowState::at(Screen::PromptDisplay, FlowFlags::default())
}
