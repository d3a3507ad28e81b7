use std::fmt;
use std::io;

use thiserror::Error;

pub type Result<T, E = JdwpError> = std::result::Result<T, E>;

/// Failures that end a debug session.
///
/// None of these are answered on the wire: they propagate to whoever owns the
/// connection, which is expected to log them and terminate.
#[derive(Debug, Error)]
pub enum JdwpError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("handshake failed: debugger did not send `JDWP-Handshake`")]
    HandshakeFailed,

    #[error("debugger disconnected")]
    Disconnected,

    #[error("buffer underflow: need {needed} bytes at offset {offset}, readable limit is {limit}")]
    BufferUnderflow {
        needed: usize,
        offset: usize,
        limit: usize,
    },

    #[error("malformed modified-UTF data at offset {offset}")]
    MalformedUtf { offset: usize },

    #[error("invalid id size: {0} (expected 1, 2, 4 or 8)")]
    InvalidIdSize(usize),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A JDWP error code carried in the header of a reply packet.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    pub const NONE: Self = Self(0);
    pub const INVALID_THREAD: Self = Self(10);
    pub const INVALID_THREAD_GROUP: Self = Self(11);
    pub const THREAD_NOT_SUSPENDED: Self = Self(13);
    pub const INVALID_OBJECT: Self = Self(20);
    pub const INVALID_CLASS: Self = Self(21);
    pub const INVALID_METHODID: Self = Self(23);
    pub const INVALID_LOCATION: Self = Self(24);
    pub const INVALID_FIELDID: Self = Self(25);
    pub const INVALID_FRAMEID: Self = Self(30);
    pub const NOT_FOUND: Self = Self(41);
    pub const SCHEMA_CHANGE_NOT_IMPLEMENTED: Self = Self(64);
    pub const NOT_IMPLEMENTED: Self = Self(99);
    pub const ABSENT_INFORMATION: Self = Self(101);
    pub const INVALID_EVENT_TYPE: Self = Self(102);
    pub const ILLEGAL_ARGUMENT: Self = Self(103);
    pub const VM_DEAD: Self = Self(112);
    pub const INTERNAL: Self = Self(113);
    pub const INVALID_TAG: Self = Self(500);
    pub const INVALID_STRING: Self = Self(506);

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "NONE",
            10 => "INVALID_THREAD",
            11 => "INVALID_THREAD_GROUP",
            13 => "THREAD_NOT_SUSPENDED",
            20 => "INVALID_OBJECT",
            21 => "INVALID_CLASS",
            23 => "INVALID_METHODID",
            24 => "INVALID_LOCATION",
            25 => "INVALID_FIELDID",
            30 => "INVALID_FRAMEID",
            41 => "NOT_FOUND",
            64 => "SCHEMA_CHANGE_NOT_IMPLEMENTED",
            99 => "NOT_IMPLEMENTED",
            101 => "ABSENT_INFORMATION",
            102 => "INVALID_EVENT_TYPE",
            103 => "ILLEGAL_ARGUMENT",
            112 => "VM_DEAD",
            113 => "INTERNAL",
            500 => "INVALID_TAG",
            506 => "INVALID_STRING",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Outcome of a failed command: either answered with an error reply, or fatal.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command rejected with {0}")]
    Reply(ErrorCode),

    #[error(transparent)]
    Fatal(JdwpError),
}

impl From<ErrorCode> for CommandError {
    fn from(code: ErrorCode) -> Self {
        Self::Reply(code)
    }
}

impl From<JdwpError> for CommandError {
    fn from(err: JdwpError) -> Self {
        match err {
            // A short command body is the debugger's mistake; framing is still intact.
            JdwpError::BufferUnderflow { .. } => Self::Reply(ErrorCode::ILLEGAL_ARGUMENT),
            other => Self::Fatal(other),
        }
    }
}
