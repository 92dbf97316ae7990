//! Data models exchanged with the talentsync backend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// --- Identifiers ---

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Int(n) => n.to_string(),
        }
    }
}

/// Accept ids the backend sends either as strings or as integers.
pub fn id_from_str_or_int<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

pub fn opt_id_from_str_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

// --- Messaging ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(deserialize_with = "id_from_str_or_int")]
    pub id: String,
    #[serde(deserialize_with = "id_from_str_or_int")]
    pub conversation_id: String,
    #[serde(default, deserialize_with = "opt_id_from_str_or_int")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}

// --- Badge counts ---

/// Authoritative unread counters. `total` is aggregated server-side and is
/// never recomputed from the other fields.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BadgeCounts {
    pub messages: u64,
    pub applications: u64,
    pub jobs: u64,
    pub ratings: u64,
    pub total: u64,
}

// --- Notifications ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "id_from_str_or_int")]
    pub id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// --- Document analysis ---

/// Lifecycle of the background document-analysis job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// No analysis job exists for the subject.
    #[default]
    #[serde(rename = "none")]
    Idle,
    Pending,
    Parsing,
    Completed,
    Failed,
    Confirmed,
    Rejected,
}

impl AnalysisStatus {
    /// The job is still being worked on server-side.
    pub fn is_in_progress(self) -> bool {
        matches!(self, AnalysisStatus::Pending | AnalysisStatus::Parsing)
    }

    /// Passive observation never leaves these states on its own.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AnalysisStatus::Idle | AnalysisStatus::Confirmed | AnalysisStatus::Rejected
        )
    }

    /// Extracted fields are waiting for a confirm or reject decision.
    pub fn awaits_review(self) -> bool {
        self == AnalysisStatus::Completed
    }

    pub fn can_rerun(self) -> bool {
        matches!(self, AnalysisStatus::Failed | AnalysisStatus::Idle)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Idle => "none",
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Parsing => "parsing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
            AnalysisStatus::Confirmed => "confirmed",
            AnalysisStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile fields extracted from an uploaded document, keyed by field name.
pub type ExtractedFields = BTreeMap<String, serde_json::Value>;

/// Which extracted fields the user chose to commit to their profile.
pub type FieldSelection = BTreeMap<String, bool>;

/// A complete server-asserted snapshot of the analysis job. Every write to
/// the local job-status cache replaces the previous snapshot wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    #[serde(default)]
    pub status: AnalysisStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_fields: Option<ExtractedFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub fn with_status(status: AnalysisStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmAnalysisRequest {
    pub selected_fields: FieldSelection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_accepts_numeric_id() {
        let n: Notification =
            serde_json::from_str(r#"{"id":42,"title":"Hi","createdAt":null}"#).unwrap();
        assert_eq!(n.id, "42");
        assert!(!n.read);
    }

    #[test]
    fn analysis_status_none_maps_to_idle() {
        let job: AnalysisJob = serde_json::from_str(r#"{"status":"none"}"#).unwrap();
        assert_eq!(job.status, AnalysisStatus::Idle);
        assert_eq!(serde_json::to_string(&AnalysisStatus::Idle).unwrap(), "\"none\"");
    }

    #[test]
    fn status_classification() {
        assert!(AnalysisStatus::Pending.is_in_progress());
        assert!(AnalysisStatus::Parsing.is_in_progress());
        assert!(!AnalysisStatus::Completed.is_in_progress());
        assert!(AnalysisStatus::Confirmed.is_terminal());
        assert!(AnalysisStatus::Rejected.is_terminal());
        assert!(!AnalysisStatus::Failed.is_terminal());
        assert!(AnalysisStatus::Failed.can_rerun());
        assert!(!AnalysisStatus::Completed.can_rerun());
    }
}
