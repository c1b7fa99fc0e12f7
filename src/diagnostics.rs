use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One diagnostics entry. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub session_id: Option<String>,
    pub step: String,
    pub message: String,
    pub context: Value,
}

/// Where an event happened and the identifiers needed to investigate it later
#[derive(Debug, Clone, Default)]
pub struct DiagnosticContext {
    pub session_id: Option<String>,
    pub step: String,
    pub fields: Map<String, Value>,
}

impl DiagnosticContext {
    pub fn new(step: &str) -> Self {
        Self {
            session_id: None,
            step: step.to_string(),
            fields: Map::new(),
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// Fire-and-forget diagnostics interface injected into every component.
///
/// Implementations must never block or fail.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, severity: Severity, message: &str, context: DiagnosticContext);

    fn log_info(&self, message: &str, context: DiagnosticContext) {
        self.record(Severity::Info, message, context);
    }

    fn log_warning(&self, message: &str, context: DiagnosticContext) {
        self.record(Severity::Warning, message, context);
    }

    fn log_error(&self, message: &str, context: DiagnosticContext) {
        self.record(Severity::Error, message, context);
    }
}

enum PersistCommand {
    Snapshot(Vec<DiagnosticEvent>),
    Flush(oneshot::Sender<()>),
}

/// Capped ring buffer of diagnostic events, optionally persisted to a JSON file
pub struct DiagnosticsRing {
    capacity: usize,
    events: Mutex<VecDeque<DiagnosticEvent>>,
    persist_tx: Option<mpsc::UnboundedSender<PersistCommand>>,
}

impl DiagnosticsRing {
    /// Ring kept only in memory
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            persist_tx: None,
        }
    }

    /// Ring backed by a JSON file. Existing entries are loaded first.
    ///
    /// Must be called inside a tokio runtime; writes happen on a background task.
    pub async fn persistent<P: AsRef<Path>>(path: P, capacity: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let capacity = capacity.max(1);

        let mut loaded = load_events(&path).await;
        while loaded.len() > capacity {
            loaded.pop_front();
        }
        debug!(
            "Loaded {} diagnostic events from {}",
            loaded.len(),
            path.display()
        );

        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_worker(persist_rx, path));

        Self {
            capacity,
            events: Mutex::new(loaded),
            persist_tx: Some(persist_tx),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Snapshot of all retained events, oldest first
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn events_for_session(&self, session_id: &str) -> Vec<DiagnosticEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.persist(Vec::new());
    }

    /// Wait until every queued write has reached disk
    pub async fn flush(&self) {
        if let Some(tx) = &self.persist_tx {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(PersistCommand::Flush(done_tx)).is_ok() {
                let _ = done_rx.await;
            }
        }
    }

    fn persist(&self, snapshot: Vec<DiagnosticEvent>) {
        if let Some(tx) = &self.persist_tx {
            if tx.send(PersistCommand::Snapshot(snapshot)).is_err() {
                warn!("Diagnostics writer stopped; event kept in memory only");
            }
        }
    }
}

impl DiagnosticsSink for DiagnosticsRing {
    fn record(&self, severity: Severity, message: &str, context: DiagnosticContext) {
        let event = DiagnosticEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            session_id: context.session_id,
            step: context.step,
            message: message.to_string(),
            context: Value::Object(context.fields),
        };

        let session = event.session_id.as_deref().unwrap_or("-");
        match severity {
            Severity::Info => info!(step = %event.step, session = %session, "{}", message),
            Severity::Warning => warn!(step = %event.step, session = %session, "{}", message),
            Severity::Error => error!(step = %event.step, session = %session, "{}", message),
        }

        let snapshot = {
            let mut events = self.events.lock();
            events.push_back(event);
            while events.len() > self.capacity {
                events.pop_front();
            }
            self.persist_tx
                .as_ref()
                .map(|_| events.iter().cloned().collect::<Vec<_>>())
        };

        if let Some(snapshot) = snapshot {
            self.persist(snapshot);
        }
    }
}

impl<T: DiagnosticsSink + ?Sized> DiagnosticsSink for Arc<T> {
    fn record(&self, severity: Severity, message: &str, context: DiagnosticContext) {
        (**self).record(severity, message, context);
    }
}

async fn load_events(path: &PathBuf) -> VecDeque<DiagnosticEvent> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if !content.trim().is_empty() => {
            match serde_json::from_str::<Vec<DiagnosticEvent>>(&content) {
                Ok(events) => events.into(),
                Err(e) => {
                    warn!(
                        "Ignoring unreadable diagnostics file {}: {}",
                        path.display(),
                        e
                    );
                    VecDeque::new()
                }
            }
        }
        Ok(_) => VecDeque::new(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
        Err(e) => {
            warn!("Failed to read diagnostics file {}: {}", path.display(), e);
            VecDeque::new()
        }
    }
}

async fn persist_worker(mut rx: mpsc::UnboundedReceiver<PersistCommand>, path: PathBuf) {
    while let Some(command) = rx.recv().await {
        match command {
            PersistCommand::Snapshot(mut snapshot) => {
                // Only the newest snapshot matters
                while let Ok(next) = rx.try_recv() {
                    match next {
                        PersistCommand::Snapshot(newer) => snapshot = newer,
                        PersistCommand::Flush(done) => {
                            write_snapshot(&path, &snapshot).await;
                            let _ = done.send(());
                        }
                    }
                }
                write_snapshot(&path, &snapshot).await;
            }
            PersistCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn write_snapshot(path: &Path, snapshot: &[DiagnosticEvent]) {
    let json = match serde_json::to_string_pretty(snapshot) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize diagnostics: {}", e);
            return;
        }
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("Failed to create diagnostics directory: {}", e);
                return;
            }
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    if let Err(e) = tokio::fs::write(&tmp_path, json).await {
        warn!("Failed to write diagnostics file: {}", e);
        return;
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        warn!("Failed to replace diagnostics file: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_caps_at_capacity() {
        let ring = DiagnosticsRing::in_memory(50);
        for i in 0..75 {
            ring.log_info(
                &format!("event {}", i),
                DiagnosticContext::new("test").field("index", i),
            );
        }

        let events = ring.events();
        assert_eq!(events.len(), 50);
        assert_eq!(events.first().unwrap().message, "event 25");
        assert_eq!(events.last().unwrap().message, "event 74");
    }

    #[test]
    fn test_context_is_captured() {
        let ring = DiagnosticsRing::in_memory(10);
        ring.log_error(
            "transfer failed",
            DiagnosticContext::new("upload")
                .session("abc-1")
                .field("attempt", 2),
        );

        let events = ring.events_for_session("abc-1");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Error);
        assert_eq!(events[0].step, "upload");
        assert_eq!(events[0].context["attempt"], 2);
        assert_eq!(ring.count(Severity::Error), 1);
        assert_eq!(ring.count(Severity::Info), 0);
    }

    #[tokio::test]
    async fn test_persistent_ring_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diag").join("events.json");

        let ring = DiagnosticsRing::persistent(&path, 3).await;
        for i in 0..5 {
            ring.log_warning(&format!("w{}", i), DiagnosticContext::new("test"));
        }
        ring.flush().await;

        let reloaded = DiagnosticsRing::persistent(&path, 3).await;
        let messages: Vec<String> = reloaded.events().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["w2", "w3", "w4"]);
    }

    #[tokio::test]
    async fn test_persistent_ring_ignores_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let ring = DiagnosticsRing::persistent(&path, 5).await;
        assert!(ring.is_empty());
    }
}
