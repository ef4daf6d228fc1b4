use ulid::Ulid;

use crate::model::{AddOnKind, Ms, StatusId};
use crate::time::format_instant;

/// What a `NotFound` failed to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Facility(Ulid),
    Status(StatusId),
    Reservation(Ulid),
    AddOn(AddOnKind, Ulid),
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Missing),
    InvalidInterval { start: Ms, end: Ms },
    /// Overlaps (cleaning buffer included) with the given reservation.
    Conflict(Ulid),
    ValidationFailed(String),
    /// Could not get exclusive access to a timeline in time. Safe to retry.
    Contention(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Contention(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidInterval { .. } => "invalid_interval",
            EngineError::Conflict(_) => "conflict",
            EngineError::ValidationFailed(_) => "validation_failed",
            EngineError::Contention(_) => "contention",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Missing::Facility(id) => write!(f, "facility {id}"),
            Missing::Status(id) => write!(f, "status {id}"),
            Missing::Reservation(id) => write!(f, "reservation {id}"),
            Missing::AddOn(kind, id) => write!(f, "{} {id}", kind.label()),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::InvalidInterval { start, end } => write!(
                f,
                "end {} must be after start {}",
                format_instant(*end),
                format_instant(*start)
            ),
            EngineError::Conflict(id) => write!(f, "overlaps reservation {id} (cleaning buffer included)"),
            EngineError::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            EngineError::Contention(msg) => write!(f, "contention: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contention_is_retryable() {
        assert!(EngineError::Contention("lock timeout").is_retryable());
        assert!(!EngineError::Conflict(Ulid::new()).is_retryable());
        assert!(!EngineError::WalError("disk full".into()).is_retryable());
    }

    #[test]
    fn messages_name_the_missing_entity() {
        let id = Ulid::new();
        let e = EngineError::NotFound(Missing::AddOn(AddOnKind::Massage, id));
        assert_eq!(e.to_string(), format!("not found: massage {id}"));
        let e = EngineError::NotFound(Missing::Status(7));
        assert_eq!(e.to_string(), "not found: status 7");
    }

    #[test]
    fn invalid_interval_renders_instants() {
        let e = EngineError::InvalidInterval { start: 3_600_000, end: 0 };
        assert_eq!(
            e.to_string(),
            "end 1970-01-01T00:00:00.000Z must be after start 1970-01-01T01:00:00.000Z"
        );
    }
}
