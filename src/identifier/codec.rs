use crate::config::IdentifierConfig;
use crate::error::FormatError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const PART_COUNT: usize = 5;
const DELIMITER: char = '-';

/// Composite identifier carried by a recording link.
///
/// Encoded as `{random}-{promptId}-{userId}-{storytellerId}-{issuedAt}`.
/// The raw string exactly as received is the session id that keys the
/// remote record; it is never rebuilt from the parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentifier {
    pub random: String,
    pub prompt_id: String,
    /// Shortened owner id; prefer the record's full user id for storage paths
    pub user_id: String,
    pub storyteller_id: String,
    /// Epoch seconds
    pub issued_at: i64,
    #[serde(rename = "sessionId")]
    raw: String,
}

/// Accepted age range for an identifier's `issued_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub max_age_seconds: i64,
    pub max_future_seconds: i64,
}

impl Default for ValidityWindow {
    fn default() -> Self {
        Self {
            max_age_seconds: 365 * 24 * 3600,
            max_future_seconds: 3600,
        }
    }
}

impl From<&IdentifierConfig> for ValidityWindow {
    fn from(config: &IdentifierConfig) -> Self {
        Self {
            max_age_seconds: config.max_age().as_secs() as i64,
            max_future_seconds: config.max_future_skew().as_secs() as i64,
        }
    }
}

impl ValidityWindow {
    pub fn contains(&self, issued_at: i64, now: i64) -> bool {
        issued_at >= now.saturating_sub(self.max_age_seconds)
            && issued_at <= now.saturating_add(self.max_future_seconds)
    }
}

impl SessionIdentifier {
    /// Parse the raw link identifier. Structure only; time bounds are not checked.
    pub fn parse(raw: &str) -> Result<Self, FormatError> {
        let parts: Vec<&str> = raw.trim().split(DELIMITER).collect();
        if parts.len() != PART_COUNT {
            return Err(FormatError::PartCount { found: parts.len() });
        }

        if let Some(index) = parts.iter().position(|p| p.is_empty()) {
            return Err(FormatError::EmptyPart { index });
        }

        let timestamp = parts[4];
        let issued_at = if timestamp.bytes().all(|b| b.is_ascii_digit()) {
            timestamp.parse::<i64>().ok().filter(|t| *t > 0)
        } else {
            None
        };
        let issued_at = issued_at.ok_or_else(|| FormatError::InvalidTimestamp {
            value: timestamp.to_string(),
        })?;

        Ok(Self {
            random: parts[0].to_string(),
            prompt_id: parts[1].to_string(),
            user_id: parts[2].to_string(),
            storyteller_id: parts[3].to_string(),
            issued_at,
            raw: raw.to_string(),
        })
    }

    /// Structural and time-window check against the current clock. Never fails.
    pub fn validate(raw: &str) -> bool {
        Self::validate_at(raw, Utc::now().timestamp(), &ValidityWindow::default())
    }

    pub fn validate_at(raw: &str, now: i64, window: &ValidityWindow) -> bool {
        match Self::parse(raw) {
            Ok(identifier) => identifier.is_within(now, window),
            Err(_) => false,
        }
    }

    pub fn is_within(&self, now: i64, window: &ValidityWindow) -> bool {
        window.contains(self.issued_at, now)
    }

    /// Session id: the identifier string as received
    pub fn session_id(&self) -> String {
        self.raw.clone()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn issued_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.issued_at, 0)
    }

    pub fn expires_at(&self, window: &ValidityWindow) -> Option<DateTime<Utc>> {
        self.issued_at
            .checked_add(window.max_age_seconds)
            .and_then(|t| DateTime::from_timestamp(t, 0))
    }

    /// Seconds since issue; negative for links issued in the future
    pub fn age_seconds(&self, now: i64) -> i64 {
        now.saturating_sub(self.issued_at)
    }
}

impl fmt::Display for SessionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for SessionIdentifier {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
