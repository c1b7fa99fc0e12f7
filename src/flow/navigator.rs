use super::reducer;
use super::screen::{FlowEvent, FlowFlags, FlowState, Screen};
use crate::device::DeviceCaptureController;
use crate::diagnostics::{DiagnosticContext, DiagnosticsSink};
use crate::events::{EventBus, PipelineEvent};
use crate::recorder::RecorderStateMachine;
use crate::session::ValidationOutcome;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Holds the current flow state and applies the reducer
pub struct FlowNavigator {
    state: FlowState,
    diagnostics: Arc<dyn DiagnosticsSink>,
    event_bus: Option<EventBus>,
    session_id: Option<String>,
}

impl FlowNavigator {
    pub fn new(diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            state: FlowState::new(),
            diagnostics,
            event_bus: None,
            session_id: None,
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

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn screen(&self) -> &Screen {
        &self.state.screen
    }

    pub fn flags(&self) -> &FlowFlags {
        &self.state.flags
    }

    pub fn dispatch(&mut self, event: FlowEvent) -> &Screen {
        let next = reducer::reduce(&self.state, &event);
        if next == self.state {
            debug!("Ignoring {:?} on {}", event, self.state.screen);
        }
        self.transition(next)
    }

    pub fn back(&mut self) -> &Screen {
        let next = reducer::back(&self.state);
        self.transition(next)
    }

    /// Release the stream, discard the recording and return to the prompt.
    ///
    /// Cancelling an in-flight upload is up to the caller, which owns the token.
    pub fn start_over(
        &mut self,
        device: &DeviceCaptureController,
        recorder: &mut RecorderStateMachine,
    ) -> &Screen {
        if self.state.screen.is_terminal() {
            return &self.state.screen;
        }

        device.release();
        recorder.reset();

        let mut context = DiagnosticContext::new("navigation").field("from", self.state.screen.name());
        if let Some(id) = &self.session_id {
            context = context.session(id.clone());
        }
        self.diagnostics.log_info("Start over", context);

        let next = reducer::start_over(&self.state);
        self.transition(next)
    }

    /// A non-valid outcome is terminal; a valid one changes nothing
    pub fn apply_validation(&mut self, outcome: &ValidationOutcome) -> &Screen {
        if outcome.is_valid {
            return &self.state.screen;
        }
        self.dispatch(FlowEvent::SessionUnavailable {
            status: outcome.status,
            message: outcome.message.clone(),
        })
    }

    fn transition(&mut self, next: FlowState) -> &Screen {
        if next.screen != self.state.screen {
            debug!("Screen {} -> {}", self.state.screen, next.screen);
            if let Some(bus) = &self.event_bus {
                let _ = bus.publish(PipelineEvent::ScreenChanged {
                    from: self.state.screen.name().to_string(),
                    to: next.screen.name().to_string(),
                    timestamp: SystemTime::now(),
                });
            }
        }
        self.state = next;
        &self.state.screen
    }
}
