use crate::diagnostics::{DiagnosticContext, DiagnosticsSink};
use crate::identifier::{SessionIdentifier, ValidityWindow};
use crate::upload::{RecordStatus, RemoteSessionRecord, SessionRecordStore};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Session status as reported to the capture flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Pending,
    Expired,
    Completed,
    Removed,
    Invalid,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Pending => "pending",
            SessionStatus::Expired => "expired",
            SessionStatus::Completed => "completed",
            SessionStatus::Removed => "removed",
            SessionStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Prompt and display names shown for a valid session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub prompt_text: Option<String>,
    pub asker_name: Option<String>,
    pub storyteller_name: Option<String>,
    pub full_user_id: Option<String>,
}

impl From<&RemoteSessionRecord> for SessionData {
    fn from(record: &RemoteSessionRecord) -> Self {
        Self {
            prompt_text: record.prompt_text.clone(),
            asker_name: record.asker_name.clone(),
            storyteller_name: record.storyteller_name.clone(),
            full_user_id: record.user_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub status: SessionStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_data: Option<SessionData>,
}

impl ValidationOutcome {
    pub fn valid(status: SessionStatus, session_data: Option<SessionData>) -> Self {
        Self {
            is_valid: true,
            status,
            message: "Ready to record".to_string(),
            session_data,
        }
    }

    pub fn invalid(status: SessionStatus, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            status,
            message: message.into(),
            session_data: None,
        }
    }
}

/// Session-validation entry point consulted before the capture flow starts
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate(&self, raw_identifier: &str) -> ValidationOutcome;
}

/// Validates links against the identifier rules and the session record store
pub struct RecordBackedValidator {
    records: Arc<dyn SessionRecordStore>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    window: ValidityWindow,
    clock: Option<i64>,
}

impl RecordBackedValidator {
    pub fn new(records: Arc<dyn SessionRecordStore>, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            records,
            diagnostics,
            window: ValidityWindow::default(),
            clock: None,
        }
    }

    pub fn with_window(mut self, window: ValidityWindow) -> Self {
        self.window = window;
        self
    }

    /// Evaluate every link at a fixed epoch-seconds time
    pub fn at_time(mut self, now: i64) -> Self {
        self.clock = Some(now);
        self
    }

    fn now(&self) -> i64 {
        self.clock.unwrap_or_else(|| Utc::now().timestamp())
    }

    fn outcome_for_record(record: &RemoteSessionRecord) -> ValidationOutcome {
        let data = Some(SessionData::from(record));
        match record.status {
            RecordStatus::Active => ValidationOutcome::valid(SessionStatus::Active, data),
            RecordStatus::Pending => ValidationOutcome::valid(SessionStatus::Pending, data),
            // A failed or interrupted attempt can be recorded again
            RecordStatus::Recording | RecordStatus::Uploading | RecordStatus::Failed => {
                ValidationOutcome::valid(SessionStatus::Active, data)
            }
            RecordStatus::ReadyForTranscription | RecordStatus::Completed => {
                ValidationOutcome::invalid(
                    SessionStatus::Completed,
                    "This story has already been recorded. Thank you!",
                )
            }
            RecordStatus::Expired => {
                ValidationOutcome::invalid(SessionStatus::Expired, "This recording link has expired")
            }
            RecordStatus::Removed => ValidationOutcome::invalid(
                SessionStatus::Removed,
                "This recording link is no longer available",
            ),
        }
    }
}

#[async_trait]
impl SessionValidator for RecordBackedValidator {
    async fn validate(&self, raw_identifier: &str) -> ValidationOutcome {
        let identifier = match SessionIdentifier::parse(raw_identifier) {
            Ok(identifier) => identifier,
            Err(e) => {
                self.diagnostics.log_warning(
                    &format!("Invalid link: {}", e),
                    DiagnosticContext::new("validation").field("identifier", raw_identifier),
                );
                return ValidationOutcome::invalid(SessionStatus::Invalid, "This link is invalid");
            }
        };
        let session_id = identifier.session_id();

        let now = self.now();
        if !identifier.is_within(now, &self.window) {
            self.diagnostics.log_warning(
                "Link outside validity window",
                DiagnosticContext::new("validation")
                    .session(session_id)
                    .field("age_seconds", identifier.age_seconds(now)),
            );
            return ValidationOutcome::invalid(SessionStatus::Expired, "This recording link has expired");
        }

        let outcome = match self.records.get(&session_id).await {
            Ok(Some(record)) => Self::outcome_for_record(&record),
            Ok(None) => ValidationOutcome::invalid(SessionStatus::Invalid, "This recording link was not found"),
            Err(e) => {
                self.diagnostics.log_error(
                    &format!("Session lookup failed: {}", e),
                    DiagnosticContext::new("validation").session(session_id.clone()),
                );
                ValidationOutcome::invalid(SessionStatus::Invalid, "This recording link could not be checked")
            }
        };

        debug!("Session {} validated as {}", session_id, outcome.status);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticsRing;
    use crate::upload::MemoryRecordStore;

    const RAW_ID: &str = "ab12xyz-q1w2e3-us3rXXXX-st9rXXXX-1700000000";

    fn validator(record: Option<RemoteSessionRecord>) -> RecordBackedValidator {
        let store = MemoryRecordStore::new();
        if let Some(record) = record {
            store.insert(record);
        }
        RecordBackedValidator::new(Arc::new(store), Arc::new(DiagnosticsRing::in_memory(10)))
            .at_time(1_700_000_100)
    }

    #[tokio::test]
    async fn test_active_record_is_valid_with_data() {
        let record = RemoteSessionRecord::new(RAW_ID, RecordStatus::Active)
            .with_prompt("What was your first car?", "Jordan", "Riley")
            .with_user_id("us3rXXXX-full");

        let outcome = validator(Some(record)).validate(RAW_ID).await;

        assert!(outcome.is_valid);
        assert_eq!(outcome.status, SessionStatus::Active);
        let data = outcome.session_data.unwrap();
        assert_eq!(data.prompt_text.as_deref(), Some("What was your first car?"));
        assert_eq!(data.full_user_id.as_deref(), Some("us3rXXXX-full"));
    }

    #[tokio::test]
    async fn test_pending_record_is_valid() {
        let outcome = validator(Some(RemoteSessionRecord::new(RAW_ID, RecordStatus::Pending)))
            .validate(RAW_ID)
            .await;
        assert!(outcome.is_valid);
        assert_eq!(outcome.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn test_finished_and_removed_records_are_terminal() {
        for (status, expected) in [
            (RecordStatus::ReadyForTranscription, SessionStatus::Completed),
            (RecordStatus::Completed, SessionStatus::Completed),
            (RecordStatus::Expired, SessionStatus::Expired),
            (RecordStatus::Removed, SessionStatus::Removed),
        ] {
            let outcome = validator(Some(RemoteSessionRecord::new(RAW_ID, status)))
                .validate(RAW_ID)
                .await;
            assert!(!outcome.is_valid, "{:?}", status);
            assert_eq!(outcome.status, expected);
            assert!(outcome.session_data.is_none());
        }
    }

    #[tokio::test]
    async fn test_malformed_and_missing() {
        let v = validator(None);
        assert_eq!(v.validate("not-a-link").await.status, SessionStatus::Invalid);
        assert_eq!(v.validate(RAW_ID).await.status, SessionStatus::Invalid);
    }

    #[tokio::test]
    async fn test_out_of_window_is_expired() {
        let record = RemoteSessionRecord::new(RAW_ID, RecordStatus::Active);
        let v = validator(Some(record)).at_time(1_700_000_000 + 366 * 24 * 3600);

        let outcome = v.validate(RAW_ID).await;
        assert!(!outcome.is_valid);
        assert_eq!(outcome.status, SessionStatus::Expired);
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_value(ValidationOutcome::invalid(SessionStatus::Removed, "gone")).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["status"], "removed");
        assert!(json.get("sessionData").is_none());
    }
}
