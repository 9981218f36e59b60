//! Website documents and their refresh lifecycle.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::DomainError;

const MAX_DOCUMENT_ID_LEN: usize = 64;

/// Identifier of a website document, e.g. `bylaws`.
///
/// Lowercase ASCII letters, digits and hyphens only, so it can be embedded in
/// cache keys and storage paths unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        if raw.is_empty() {
            return Err(DomainError::validation("document id is empty"));
        }
        if raw.len() > MAX_DOCUMENT_ID_LEN {
            return Err(DomainError::validation(format!(
                "document id exceeds {MAX_DOCUMENT_ID_LEN} characters"
            )));
        }
        if raw.starts_with('-') || raw.ends_with('-') {
            return Err(DomainError::validation(
                "document id must not start or end with `-`",
            ));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(DomainError::validation(format!(
                "document id contains `{bad}`"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentId> for String {
    fn from(value: DocumentId) -> Self {
        value.0
    }
}

/// A document published on the website from an external source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteDocument {
    pub id: DocumentId,
    pub title: String,
    /// Name the document source knows it by.
    pub source_name: String,
    /// Storage container holding the published copy.
    pub container: String,
    /// Object name inside `container`.
    pub blob_name: String,
    pub content_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshStatus {
    Idle,
    Retrieving,
    Uploading,
    Completed,
    Failed,
}

impl RefreshStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshStatus::Idle => "Idle",
            RefreshStatus::Retrieving => "Retrieving",
            RefreshStatus::Uploading => "Uploading",
            RefreshStatus::Completed => "Completed",
            RefreshStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RefreshStatus::Completed | RefreshStatus::Failed)
    }
}

impl fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Scheduled,
    User,
}

impl TriggeredBy {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggeredBy::Scheduled => "scheduled",
            TriggeredBy::User => "user",
        }
    }
}

/// Last known refresh state of a document, overwritten on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRefreshJobState {
    pub document_id: DocumentId,
    pub status: RefreshStatus,
    pub error_message: Option<String>,
    pub job_id: String,
    pub triggered_by: TriggeredBy,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DocumentRefreshJobState {
    pub fn started(
        document_id: DocumentId,
        job_id: impl Into<String>,
        triggered_by: TriggeredBy,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            document_id,
            status: RefreshStatus::Idle,
            error_message: None,
            job_id: job_id.into(),
            triggered_by,
            started_at: now,
            updated_at: now,
        }
    }

    /// Move to `status`. Only `Failed` keeps an error message.
    pub fn transition(
        &mut self,
        status: RefreshStatus,
        error_message: Option<String>,
        now: OffsetDateTime,
    ) {
        self.status = status;
        self.error_message = match status {
            RefreshStatus::Failed => error_message,
            _ => None,
        };
        self.updated_at = now;
    }

    pub fn event(&self) -> RefreshStatusEvent {
        RefreshStatusEvent {
            status: self.status,
            error_message: self.error_message.clone(),
        }
    }
}

/// What observers see for each transition: `{"status": .., "errorMessage": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatusEvent {
    pub status: RefreshStatus,
    pub error_message: Option<String>,
}

impl RefreshStatusEvent {
    pub fn new(status: RefreshStatus) -> Self {
        Self {
            status,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: RefreshStatus::Failed,
            error_message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn document_ids_accept_slugs() {
        assert!(DocumentId::parse("bylaws").is_ok());
        assert!(DocumentId::parse("tournament-rules-2025").is_ok());
    }

    #[test]
    fn document_ids_reject_unsafe_input() {
        for raw in ["", "Bylaws", "../etc", "by laws", "-bylaws", "bylaws-", "a:b"] {
            assert!(DocumentId::parse(raw).is_err(), "{raw:?} should be rejected");
        }
        assert!(DocumentId::parse(&"a".repeat(65)).is_err());
    }

    #[test]
    fn document_id_deserialization_validates() {
        let parsed: Result<DocumentId, _> = serde_json::from_str("\"bylaws\"");
        assert!(parsed.is_ok());
        let parsed: Result<DocumentId, _> = serde_json::from_str("\"../bylaws\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn status_event_wire_format() {
        let event = RefreshStatusEvent::new(RefreshStatus::Uploading);
        assert_eq!(
            serde_json::to_string(&event).expect("serialize"),
            r#"{"status":"Uploading","errorMessage":null}"#
        );

        let failed = RefreshStatusEvent::failed("source returned 502");
        assert_eq!(
            serde_json::to_string(&failed).expect("serialize"),
            r#"{"status":"Failed","errorMessage":"source returned 502"}"#
        );
    }

    #[test]
    fn transitions_clear_stale_errors() {
        let t0 = datetime!(2025-03-01 10:00 UTC);
        let t1 = datetime!(2025-03-01 10:01 UTC);
        let id = DocumentId::parse("bylaws").expect("id");
        let mut state = DocumentRefreshJobState::started(id, "job-1", TriggeredBy::User, t0);

        state.transition(RefreshStatus::Failed, Some("boom".to_string()), t1);
        assert_eq!(state.event(), RefreshStatusEvent::failed("boom"));

        state.transition(RefreshStatus::Retrieving, Some("ignored".to_string()), t1);
        assert_eq!(state.error_message, None);
        assert_eq!(state.started_at, t0);
        assert_eq!(state.updated_at, t1);
    }

    #[test]
    fn state_round_trips_through_json() {
        let now = datetime!(2025-03-01 10:00 UTC);
        let id = DocumentId::parse("bylaws").expect("id");
        let state = DocumentRefreshJobState::started(id, "job-1", TriggeredBy::Scheduled, now);

        let json = serde_json::to_string(&state).expect("serialize");
        assert!(json.contains(r#""triggered_by":"scheduled""#));
        assert!(json.contains("2025-03-01T10:00:00Z"));
        let back: DocumentRefreshJobState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, state);
    }

    #[test]
    fn terminal_statuses() {
        assert!(RefreshStatus::Completed.is_terminal());
        assert!(RefreshStatus::Failed.is_terminal());
        assert!(!RefreshStatus::Uploading.is_terminal());
    }
}
