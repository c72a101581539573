use crate::model::{BookingId, BookingStatus, UserId};

use super::transitions::Transition;

/// Failure reported by an external collaborator (verification store, listing
/// catalog). Always surfaces to callers as `Unavailable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store unavailable: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The requested interval overlaps an active hold.
    SlotConflict { conflicting: BookingId },
    /// Verification gate refused; `field` names whose verification is missing.
    NotEligible { user: UserId, field: &'static str },
    Forbidden { user: UserId },
    InvalidTransition {
        from: BookingStatus,
        transition: Transition,
        reason: &'static str,
    },
    NotFound { field: &'static str, id: String },
    InvalidRequest {
        field: &'static str,
        reason: &'static str,
    },
    /// Infrastructure failure. Callers retry with backoff; nothing was applied.
    Unavailable(String),
}

/// Stable, wire-facing classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SlotConflict,
    NotEligible,
    Forbidden,
    InvalidTransition,
    NotFound,
    InvalidRequest,
    Unavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SlotConflict => "slot_conflict",
            ErrorKind::NotEligible => "not_eligible",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unavailable => "unavailable",
        }
    }

    /// Whether retrying the identical request can ever succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Unavailable)
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SlotConflict { .. } => ErrorKind::SlotConflict,
            EngineError::NotEligible { .. } => ErrorKind::NotEligible,
            EngineError::Forbidden { .. } => ErrorKind::Forbidden,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            EngineError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// The request field a client should look at to recover.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            EngineError::SlotConflict { .. } => Some("slot"),
            EngineError::NotEligible { field, .. } => Some(*field),
            EngineError::Forbidden { .. } => Some("caller"),
            EngineError::InvalidTransition { .. } => Some("status"),
            EngineError::NotFound { field, .. } => Some(*field),
            EngineError::InvalidRequest { field, .. } => Some(*field),
            EngineError::Unavailable(_) => None,
        }
    }

    pub(crate) fn booking_not_found(id: BookingId) -> Self {
        EngineError::NotFound {
            field: "booking",
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: &'static str) -> Self {
        EngineError::InvalidRequest { field, reason }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SlotConflict { conflicting } => {
                write!(f, "slot conflicts with booking: {conflicting}")
            }
            EngineError::NotEligible { user, field } => {
                write!(f, "{field} {user} is not verified for this operation")
            }
            EngineError::Forbidden { user } => {
                write!(f, "user {user} may not act on this booking")
            }
            EngineError::InvalidTransition {
                from,
                transition,
                reason,
            } => write!(f, "cannot {transition} a {from} booking: {reason}"),
            EngineError::NotFound { field, id } => write!(f, "{field} not found: {id}"),
            EngineError::InvalidRequest { field, reason } => {
                write!(f, "invalid {field}: {reason}")
            }
            EngineError::Unavailable(e) => write!(f, "unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Unavailable(e.0)
    }
}
