use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cycle::{MomentumEvent, MomentumState};

/// Errors raised by the momentum engine and its analyzers.
#[derive(Debug, thiserror::Error)]
pub enum MomentumError {
    /// Event not legal from the current state. State is unchanged.
    #[error("event '{event}' is not legal from state '{state}'")]
    InvalidTransition {
        state: MomentumState,
        event: MomentumEvent,
    },
    /// Snapshot older than the last one analyzed for the user. Not fatal.
    #[error(
        "snapshot from {snapshot_at} is older than last analyzed snapshot {last_analyzed_at} for user {user_id}"
    )]
    StaleSnapshot {
        user_id: Uuid,
        snapshot_at: DateTime<Utc>,
        last_analyzed_at: DateTime<Utc>,
    },
    /// Out-of-range or missing field; rejected at ingestion, never clamped.
    #[error("snapshot {snapshot_id} has malformed field '{field}' (expected {expected})")]
    MalformedSnapshot {
        snapshot_id: Uuid,
        field: &'static str,
        value: Option<f64>,
        expected: String,
    },
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
    /// A state-change listener failed. Never rolls back the transition.
    #[error("state-change listener '{listener}' failed: {message}")]
    HookFailure { listener: String, message: String },
    /// An external collaborator (snapshot source, task queue, notifier) failed.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to encode cycle: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode cycle: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("unsupported cycle record version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("storage error: {0}")]
    Storage(String),
    /// The stored cycle moved on since this copy was loaded.
    #[error("cycle for user {user_id} was modified concurrently (expected revision {expected}, found {found})")]
    Conflict {
        user_id: Uuid,
        expected: u64,
        found: u64,
    },
}

impl MomentumError {
    pub fn collaborator(collaborator: &'static str, err: impl std::fmt::Display) -> Self {
        MomentumError::Collaborator {
            collaborator,
            message: err.to_string(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        MomentumError::Persistence(PersistenceError::Storage(err.to_string()))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            MomentumError::Persistence(PersistenceError::Conflict { .. })
        )
    }

    /// Machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            MomentumError::InvalidTransition { .. } => codes::INVALID_TRANSITION,
            MomentumError::StaleSnapshot { .. } => codes::STALE_SNAPSHOT,
            MomentumError::MalformedSnapshot { .. } => codes::MALFORMED_SNAPSHOT,
            MomentumError::Persistence(_) => codes::PERSISTENCE_FAILURE,
            MomentumError::HookFailure { .. } => codes::HOOK_FAILURE,
            MomentumError::Collaborator { .. } => codes::COLLABORATOR_FAILURE,
        }
    }

    /// Structured report for callers that surface errors as JSON.
    pub fn report(&self) -> ErrorReport {
        let (field, received, docs_hint) = match self {
            MomentumError::InvalidTransition { state, event } => (
                Some("event".to_string()),
                Some(serde_json::json!({ "state": state, "event": event })),
                Some(
                    "Read the current state first; only events listed for that state are accepted."
                        .to_string(),
                ),
            ),
            MomentumError::MalformedSnapshot { field, value, .. } => (
                Some((*field).to_string()),
                value.map(|v| serde_json::json!(v)),
                Some("Snapshot producers must clamp signals to their documented ranges.".to_string()),
            ),
            MomentumError::StaleSnapshot { snapshot_at, .. } => (
                Some("timestamp".to_string()),
                Some(serde_json::json!(snapshot_at)),
                None,
            ),
            _ => (None, None, None),
        };
        ErrorReport {
            error: self.code().to_string(),
            message: self.to_string(),
            field,
            received,
            docs_hint,
        }
    }
}

/// Structured error output, designed to be read by agents as well as humans.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    /// Machine-readable error code (e.g. "invalid_transition")
    pub error: String,
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the engine
pub mod codes {
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const STALE_SNAPSHOT: &str = "stale_snapshot";
    pub const MALFORMED_SNAPSHOT: &str = "malformed_snapshot";
    pub const PERSISTENCE_FAILURE: &str = "persistence_failure";
    pub const HOOK_FAILURE: &str = "hook_failure";
    pub const COLLABORATOR_FAILURE: &str = "collaborator_failure";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_report_names_state_and_event() {
        let err = MomentumError::InvalidTransition {
            state: MomentumState::Idle,
            event: MomentumEvent::RewardEmitted,
        };
        let report = err.report();
        assert_eq!(report.error, codes::INVALID_TRANSITION);
        assert_eq!(report.field.as_deref(), Some("event"));
        let received = report.received.unwrap();
        assert_eq!(received["state"], "idle");
        assert_eq!(received["event"]["type"], "reward_emitted");
    }

    #[test]
    fn persistence_errors_share_one_code() {
        let err: MomentumError = PersistenceError::UnsupportedVersion {
            found: 9,
            supported: 1,
        }
        .into();
        assert_eq!(err.code(), codes::PERSISTENCE_FAILURE);
        assert_eq!(MomentumError::storage("disk full").code(), codes::PERSISTENCE_FAILURE);
    }

    #[test]
    fn conflict_is_a_persistence_failure() {
        let err: MomentumError = PersistenceError::Conflict {
            user_id: Uuid::now_v7(),
            expected: 2,
            found: 4,
        }
        .into();
        assert!(err.is_conflict());
        assert_eq!(err.code(), codes::PERSISTENCE_FAILURE);
        assert!(!MomentumError::storage("disk full").is_conflict());
    }
}
