//! Frame payloads exchanged with clients.
//!
//! Every frame is `[u32 big-endian length][JSON]`. The first client frame is
//! a `hello`; each later request gets exactly one response frame, with
//! `notification` frames for watched halls interleaved between them.

use std::fmt;
use std::io;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_FRAME_LEN;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Must be the first frame on a connection.
    Hello {
        organization: String,
        password: String,
        actor: Actor,
    },
    RegisterHall {
        name: String,
        #[serde(default = "default_capacity")]
        capacity: u32,
        #[serde(default)]
        location: String,
        #[serde(default)]
        amenities: Vec<String>,
    },
    ListHalls,
    Submit {
        hall_id: Ulid,
        start: Ms,
        end: Ms,
        title: String,
        #[serde(default)]
        description: String,
    },
    Amend {
        booking_id: Ulid,
        title: String,
        #[serde(default)]
        description: String,
    },
    Approve {
        booking_id: Ulid,
        #[serde(default)]
        expected_status: Option<Status>,
    },
    Reject {
        booking_id: Ulid,
        reason: String,
        #[serde(default)]
        expected_status: Option<Status>,
    },
    Get {
        booking_id: Ulid,
    },
    List,
    Queue,
    History,
    Schedule {
        hall_id: Ulid,
        start: Ms,
        end: Ms,
    },
    Watch {
        hall_id: Ulid,
    },
    Unwatch {
        hall_id: Ulid,
    },
}

fn default_capacity() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Welcome { organization: String, actor: Actor },
    Hall { hall: Hall },
    Halls { halls: Vec<Hall> },
    Booking { booking: Booking },
    Bookings { bookings: Vec<Booking> },
    Schedule { entries: Vec<ScheduleEntry> },
    Ok,
    Error { code: ErrorCode, message: String },
    Notification { hall_id: Ulid, event: Event },
}

/// Machine-readable error class carried in `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    AlreadyExists,
    Conflict,
    ConfirmationConflict,
    Unauthorized,
    InvalidState,
    LimitExceeded,
    Internal,
    /// Undecodable frame or a request out of sequence.
    Protocol,
    /// Bad password or hello.
    Auth,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Validation => "validation",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::Conflict => "conflict",
            ErrorCode::ConfirmationConflict => "confirmation_conflict",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::LimitExceeded => "limit_exceeded",
            ErrorCode::Internal => "internal",
            ErrorCode::Protocol => "protocol",
            ErrorCode::Auth => "auth",
        }
    }
}

impl From<&EngineError> for ErrorCode {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::Validation(_) => ErrorCode::Validation,
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            EngineError::Conflict(_) => ErrorCode::Conflict,
            EngineError::ConfirmationConflict { .. } => ErrorCode::ConfirmationConflict,
            EngineError::Unauthorized { .. } => ErrorCode::Unauthorized,
            EngineError::InvalidState { .. } => ErrorCode::InvalidState,
            EngineError::LimitExceeded(_) => ErrorCode::LimitExceeded,
            EngineError::WalError(_) => ErrorCode::Internal,
        }
    }
}

impl Response {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    /// WAL failures are logged server-side; clients only see a generic message.
    pub fn from_engine_error(e: &EngineError) -> Self {
        let code = ErrorCode::from(e);
        let message = match code {
            ErrorCode::Internal => "internal error".to_string(),
            _ => e.to_string(),
        };
        Response::Error { code, message }
    }
}

#[derive(Debug)]
pub enum ProtocolError {
    Io(io::Error),
    Json(serde_json::Error),
    /// Peer closed before completing the handshake.
    ConnectionClosed,
    /// First frame was not a `hello`.
    HandshakeRequired,
    Auth(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Io(e) => write!(f, "io error: {e}"),
            ProtocolError::Json(e) => write!(f, "invalid frame: {e}"),
            ProtocolError::ConnectionClosed => write!(f, "connection closed"),
            ProtocolError::HandshakeRequired => write!(f, "expected hello as first frame"),
            ProtocolError::Auth(msg) => write!(f, "authentication failed: {msg}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Io(e) => Some(e),
            ProtocolError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        ProtocolError::Io(e)
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e)
    }
}

/// Length-delimited framing shared by the server and clients.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(msg)?))
}

pub fn decode<'a, T: Deserialize<'a>>(frame: &'a [u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(frame)?)
}
