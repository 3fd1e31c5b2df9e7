//! Crate-level error types for validation, dispatch, and storage.
//!
//! The four lifecycle errors ([`ValidationError`], [`ConflictError`],
//! [`IllegalTransitionError`], [`NotFoundError`]) are what `validate` and
//! `apply` return. [`LeadError`] wraps them so callers can propagate a single
//! type with `?`. Storage and actor failures live in separate types so that a
//! rejected event is never confused with a broken disk.

use uuid::Uuid;

use crate::event::EventKind;
use crate::lead::LeadStatus;

/// A payload or envelope field failed a structural check.
///
/// `field` is the dotted wire path of the offending field, e.g.
/// `"factors.need"` or `"contact.email"`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Dotted path of the rejected field.
    pub field: &'static str,
    /// Human-readable description of the violated rule.
    pub reason: String,
}

impl ValidationError {
    pub(crate) fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// The event disagrees with the aggregate it is being applied to.
///
/// Raised for stale optimistic-concurrency expectations and for duplicate
/// or misrouted events. The producer should re-read the aggregate and
/// resubmit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConflictError {
    /// `LeadStatusChanged.previousStatus` no longer matches the lead.
    #[error("lead {lead_id}: expected status {expected}, but lead is {actual}")]
    StaleStatus {
        lead_id: Uuid,
        expected: LeadStatus,
        actual: LeadStatus,
    },

    /// `LeadCreated` for a lead id that already exists.
    #[error("lead {lead_id} already exists")]
    AlreadyExists { lead_id: Uuid },

    /// The event names a different lead than the aggregate it was given.
    #[error("event targets lead {expected}, but aggregate is lead {actual}")]
    LeadMismatch { expected: Uuid, actual: Uuid },
}

/// The state machine has no edge for this event from the current status.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("lead {lead_id}: {event} cannot move a lead from {from} to {to}")]
pub struct IllegalTransitionError {
    pub lead_id: Uuid,
    pub event: EventKind,
    pub from: LeadStatus,
    pub to: LeadStatus,
}

/// An event other than `LeadCreated` referenced a lead with no aggregate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("lead {lead_id} not found")]
pub struct NotFoundError {
    pub lead_id: Uuid,
}

/// Any rejection produced by `validate` or `apply`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LeadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransitionError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),
}

impl LeadError {
    /// Stable machine-readable category, suitable for an API error body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::IllegalTransition(_) => "illegal_transition",
            Self::NotFound(_) => "not_found",
        }
    }

    /// HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Conflict(_) | Self::IllegalTransition(_) => 409,
            Self::NotFound(_) => 404,
        }
    }
}

/// Error returned by repositories and the event log.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Disk I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot or log line could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The persisted history could not be folded back into an aggregate.
    #[error("corrupt history for lead {lead_id}: {source}")]
    CorruptHistory {
        lead_id: Uuid,
        #[source]
        source: LeadError,
    },
}

/// Error returned when submitting an event through a
/// [`LeadStore`](crate::LeadStore).
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The event was rejected by validation or the state machine.
    #[error(transparent)]
    Rejected(#[from] LeadError),

    /// Loading or persisting the aggregate failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The actor owning this lead has exited.
    #[error("lead actor is no longer running")]
    ActorGone,
}

impl SubmitError {
    /// The lifecycle rejection, if this error is one.
    pub fn rejection(&self) -> Option<&LeadError> {
        match self {
            Self::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_field() {
        let err = ValidationError::new("factors.need", "must be within [0, 10]");
        assert_eq!(err.to_string(), "invalid factors.need: must be within [0, 10]");
    }

    #[test]
    fn stale_status_reports_expected_and_actual() {
        let lead_id = Uuid::nil();
        let err = ConflictError::StaleStatus {
            lead_id,
            expected: LeadStatus::Engaged,
            actual: LeadStatus::Negotiation,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected status engaged"), "got: {msg}");
        assert!(msg.contains("lead is negotiation"), "got: {msg}");
    }

    #[test]
    fn illegal_transition_reports_states() {
        let err = IllegalTransitionError {
            lead_id: Uuid::nil(),
            event: EventKind::DealClosed,
            from: LeadStatus::ClosedWon,
            to: LeadStatus::ClosedWon,
        };
        assert!(
            err.to_string()
                .contains("DealClosed cannot move a lead from closed_won to closed_won")
        );
    }

    #[test]
    fn lead_error_maps_to_http_status() {
        let lead_id = Uuid::nil();
        let cases: Vec<(LeadError, u16, &str)> = vec![
            (ValidationError::new("x", "y").into(), 400, "validation"),
            (
                ConflictError::AlreadyExists { lead_id }.into(),
                409,
                "conflict",
            ),
            (
                IllegalTransitionError {
                    lead_id,
                    event: EventKind::LeadEngaged,
                    from: LeadStatus::New,
                    to: LeadStatus::Engaged,
                }
                .into(),
                409,
                "illegal_transition",
            ),
            (NotFoundError { lead_id }.into(), 404, "not_found"),
        ];
        for (err, status, kind) in cases {
            assert_eq!(err.http_status(), status, "{err}");
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn lead_error_display_is_transparent() {
        let err: LeadError = NotFoundError {
            lead_id: Uuid::nil(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "lead 00000000-0000-0000-0000-000000000000 not found"
        );
    }

    #[test]
    fn submit_error_exposes_rejection() {
        let err = SubmitError::from(LeadError::from(NotFoundError {
            lead_id: Uuid::nil(),
        }));
        assert_eq!(err.rejection().map(LeadError::http_status), Some(404));
        assert!(SubmitError::ActorGone.rejection().is_none());
    }

    #[test]
    fn store_error_io_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = StoreError::from(io_err);
        assert!(err.to_string().contains("access denied"));
    }

    // Errors cross the actor channel, so they must be `Send + Sync`.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<LeadError>();
            assert_send_sync::<StoreError>();
            assert_send_sync::<SubmitError>();
        }
    };
}
