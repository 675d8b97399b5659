use ulid::Ulid;

use crate::model::{Role, Status};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input: bad interval, empty required field.
    Validation(&'static str),
    NotFound(Ulid),
    AlreadyExists(String),
    /// Submission overlaps an active booking of the same hall.
    Conflict(Ulid),
    /// Final approval lost the slot to a booking confirmed in the meantime.
    /// The earlier sign-offs on `booking_id` are void.
    ConfirmationConflict { booking_id: Ulid, conflicting: Ulid },
    Unauthorized { required: Role, actual: Role },
    /// Booking is terminal or has moved past what the caller expected.
    InvalidState { id: Ulid, status: Status },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(name) => write!(f, "already exists: {name}"),
            EngineError::Conflict(id) => {
                write!(f, "hall already requested for an overlapping time by booking {id}")
            }
            EngineError::ConfirmationConflict {
                booking_id,
                conflicting,
            } => write!(
                f,
                "booking {booking_id} lost its slot: booking {conflicting} was confirmed for an overlapping time"
            ),
            EngineError::Unauthorized { required, actual } => {
                write!(f, "action requires the {required} role, caller is {actual}")
            }
            EngineError::InvalidState { id, status } => {
                write!(f, "booking {id} is {status}; action no longer applies")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
