//! Crate-wide error type.
//!
//! Decode errors and I/O errors are surfaced to the immediate caller; the
//! ingest loop and the workers log them and move on, so none of these is
//! fatal to the broker as a whole.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Topic log, meta file or socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A command, message or meta record was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The `type` field of a request is outside `0..=2`.
    #[error("unexpected command type: {0}")]
    UnknownCommandType(u64),

    /// A consume request carried neither `body` nor `consumer_name`.
    #[error("consume request is missing a consumer name")]
    MissingConsumerName,

    /// Topic or consumer name that cannot be used as part of a file name.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl BrokerError {
    /// True for the "peer went away" family of I/O errors, which the
    /// transport treats as normal control flow rather than a failure.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            BrokerError::Io(e) => is_closed_kind(e.kind()),
            _ => false,
        }
    }
}

pub(crate) fn is_closed_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
