use ulid::Ulid;

use crate::model::AppointmentStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Booking-time conflict. Retryable: re-query availability and resubmit.
    SlotUnavailable { conflict_with: Ulid },
    /// Illegal status change. Caller logic error, not retryable.
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed time, duration, or missing required transition fields.
    Validation(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SlotUnavailable { conflict_with } => {
                write!(f, "slot unavailable: conflicts with appointment {conflict_with}")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "validation: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
