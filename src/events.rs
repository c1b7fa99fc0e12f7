use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Events emitted by the capture pipeline for observers (UI, CLI, tests)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PipelineEvent {
    /// The flow navigator moved to another screen
    ScreenChanged {
        from: String,
        to: String,
        timestamp: SystemTime,
    },
    /// Capture permission state changed
    PermissionChanged { state: String, timestamp: SystemTime },
    /// The recorder counted another second
    RecordingTick { elapsed_seconds: u32 },
    /// Recording is close to its maximum duration
    DurationWarning {
        elapsed_seconds: u32,
        remaining_seconds: u32,
    },
    /// Recording hit its maximum duration and was stopped
    MaxDurationReached { elapsed_seconds: u32 },
    /// Bytes moved during an upload attempt
    UploadProgress {
        session_id: String,
        attempt: u32,
        bytes_transferred: u64,
        total_bytes: u64,
    },
    /// The remote record status was advanced
    UploadStatusChanged { session_id: String, status: String },
    /// Upload and completion both succeeded
    UploadCompleted {
        session_id: String,
        storage_path: String,
    },
    /// Upload failed and needs user action
    UploadFailed { session_id: String, error: String },
}

impl PipelineEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::ScreenChanged { from, to, .. } => {
                format!("Screen changed: {} -> {}", from, to)
            }
            PipelineEvent::PermissionChanged { state, .. } => {
                format!("Permission {}", state)
            }
            PipelineEvent::RecordingTick { elapsed_seconds } => {
                format!("Recording {}s", elapsed_seconds)
            }
            PipelineEvent::DurationWarning {
                remaining_seconds, ..
            } => {
                format!("Recording ends in {} seconds", remaining_seconds)
            }
            PipelineEvent::MaxDurationReached { elapsed_seconds } => {
                format!("Maximum duration reached at {}s", elapsed_seconds)
            }
            PipelineEvent::UploadProgress {
                bytes_transferred,
                total_bytes,
                attempt,
                ..
            } => {
                format!(
                    "Upload attempt {}: {}/{} bytes",
                    attempt, bytes_transferred, total_bytes
                )
            }
            PipelineEvent::UploadStatusChanged { session_id, status } => {
                format!("Session {} status: {}", session_id, status)
            }
            PipelineEvent::UploadCompleted { storage_path, .. } => {
                format!("Upload completed: {}", storage_path)
            }
            PipelineEvent::UploadFailed { error, .. } => {
                format!("Upload failed: {}", error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::ScreenChanged { .. } => "screen_changed",
            PipelineEvent::PermissionChanged { .. } => "permission_changed",
            PipelineEvent::RecordingTick { .. } => "recording_tick",
            PipelineEvent::DurationWarning { .. } => "duration_warning",
            PipelineEvent::MaxDurationReached { .. } => "max_duration_reached",
            PipelineEvent::UploadProgress { .. } => "upload_progress",
            PipelineEvent::UploadStatusChanged { .. } => "upload_status_changed",
            PipelineEvent::UploadCompleted { .. } => "upload_completed",
            PipelineEvent::UploadFailed { .. } => "upload_failed",
        }
    }

    /// Fraction of bytes moved, for progress events
    pub fn progress_fraction(&self) -> Option<f64> {
        match self {
            PipelineEvent::UploadProgress {
                bytes_transferred,
                total_bytes,
                ..
            } if *total_bytes > 0 => Some(*bytes_transferred as f64 / *total_bytes as f64),
            _ => None,
        }
    }
}

/// Broadcast bus for pipeline events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers.
    ///
    /// Never blocks; an error only means nobody is listening.
    pub fn publish(&self, event: PipelineEvent) -> Result<usize, EventBusError> {
        trace!("Publishing event: {}", event.description());

        match &event {
            PipelineEvent::MaxDurationReached { elapsed_seconds } => {
                info!("Maximum recording duration reached at {}s", elapsed_seconds);
            }
            PipelineEvent::UploadCompleted { session_id, storage_path } => {
                info!("Upload for {} completed at {}", session_id, storage_path);
            }
            PipelineEvent::UploadFailed { session_id, error } => {
                error!("Upload for {} failed: {}", session_id, error);
            }
            PipelineEvent::DurationWarning {
                remaining_seconds, ..
            } => {
                warn!("Recording ends in {} seconds", remaining_seconds);
            }
            _ => {}
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events for one session
    Session(String),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &PipelineEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Session(wanted) => match event {
                PipelineEvent::UploadProgress { session_id, .. }
                | PipelineEvent::UploadStatusChanged { session_id, .. }
                | PipelineEvent::UploadCompleted { session_id, .. }
                | PipelineEvent::UploadFailed { session_id, .. } => session_id == wanted,
                _ => false,
            },
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<PipelineEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<PipelineEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Progress events are informational; skip ahead
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<PipelineEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    continue;
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Drain everything currently queued
    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let event = PipelineEvent::RecordingTick { elapsed_seconds: 3 };
        let subscriber_count = event_bus.publish(event.clone()).unwrap();
        assert_eq!(subscriber_count, 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_reports_error() {
        let event_bus = EventBus::new(10);
        let result = event_bus.publish(PipelineEvent::RecordingTick { elapsed_seconds: 1 });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["upload_progress"]),
            "progress",
        );

        event_bus
            .publish(PipelineEvent::RecordingTick { elapsed_seconds: 1 })
            .unwrap();
        event_bus
            .publish(PipelineEvent::UploadProgress {
                session_id: "s".to_string(),
                attempt: 1,
                bytes_transferred: 5,
                total_bytes: 10,
            })
            .unwrap();

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "upload_progress");
        assert_eq!(event.progress_fraction(), Some(0.5));
    }

    #[test]
    fn test_session_filter() {
        let filter = EventFilter::Session("a".to_string());
        let mine = PipelineEvent::UploadFailed {
            session_id: "a".to_string(),
            error: "x".to_string(),
        };
        let other = PipelineEvent::UploadFailed {
            session_id: "b".to_string(),
            error: "x".to_string(),
        };
        assert!(filter.matches(&mine));
        assert!(!filter.matches(&other));
        assert!(!filter.matches(&PipelineEvent::RecordingTick { elapsed_seconds: 1 }));
    }
}
