//! Error taxonomy for the streaming pipeline.
//!
//! Four families, each with a different recovery story:
//!
//! - [`FormatError`]: the container is corrupt. Fatal for the sequence, the
//!   stream is torn down because a misread length prefix poisons everything after it.
//! - [`TransportError`]: a range request failed. Retried by the scheduler, then
//!   reported per request id; never halts the other requests.
//! - [`DecodeError`]: one chunk could not be turned into a mesh. The frame is
//!   dropped and logged.
//! - [`StreamError`]: what the orchestrator surfaces to its caller.
//!
//! Starvation (the frame cache running dry) is not an error and has no variant.

use thiserror::Error;

/// Corrupt or unexpected container layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("file header truncated: {available} bytes, need {needed}")]
    TruncatedHeader { available: usize, needed: usize },

    #[error("record payload truncated at offset {offset}: {available} bytes, need {needed}")]
    TruncatedRecord {
        offset: u64,
        available: usize,
        needed: usize,
    },

    #[error("record at offset {offset} declares {declared} bytes but only {available} remain in range")]
    RecordOverrun {
        offset: u64,
        declared: u32,
        available: usize,
    },

    #[error("expected record type {expected} at offset {offset}, found {found}")]
    UnexpectedRecord { offset: u64, expected: u8, found: u8 },

    #[error("invalid bloc index: {0}")]
    InvalidBlocIndex(String),

    #[error("invalid sequence info: {0}")]
    InvalidSequence(String),

    #[error("negative pointer {value} in file header field '{field}'")]
    NegativePointer { field: &'static str, value: i32 },
}

/// A single range request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("range {start}..{end} outside source of {len} bytes")]
    OutOfBounds { start: u64, end: u64, len: u64 },
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// One chunk failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed chunk payload: {0}")]
    Malformed(String),

    #[error("unsupported chunk type {record_type} (codec {codec})")]
    Unsupported { record_type: u8, codec: u16 },

    #[error("frame {frame} exceeds sequence limits: {detail}")]
    LimitExceeded { frame: u32, detail: String },

    #[error("decoder panicked: {0}")]
    Panicked(String),
}

/// Errors surfaced by [`crate::core::stream::Stream`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("structural read failed: {0}")]
    Transport(#[from] TransportError),

    #[error("stream is not open")]
    NotOpen,

    #[error("no renderer attached")]
    NoRenderer,

    #[error("stream was destroyed")]
    Destroyed,

    #[error("open did not complete within {0:?}")]
    OpenTimeout(std::time::Duration),
}

pub type StreamResult<T> = Result<T, StreamError>;
