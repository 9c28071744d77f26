//! Error types for the relayq-spool crate.

use std::io;

use thiserror::Error;

use crate::MessageId;

/// Top-level spool error type.
///
/// Every queue operation returns this error, split into I/O, serialization,
/// validation and logical failures.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Message not found in spool.
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    /// Spool directory validation failed.
    #[error("Spool validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal error (lock poisoning, capacity, injected faults).
    #[error("Internal error: {0}")]
    Internal(String),

    /// Message already exists in spool.
    #[error("Message already exists: {0}")]
    AlreadyExists(MessageId),
}

impl SpoolError {
    /// Returns `true` if the message is simply gone, e.g. removed by a concurrent sweep.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if a stored entry could not be decoded.
    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Message content is not valid UTF-8.
    #[error("Corrupted message data: {0}")]
    Corrupted(String),
}

/// Spool directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Spool path is not a directory.
    #[error("Spool path is not a directory: {0}")]
    NotDirectory(String),

    /// Invalid spool configuration.
    #[error("Invalid spool configuration: {0}")]
    InvalidConfiguration(String),
}

/// Specialized `Result` type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;

impl<T> From<std::sync::PoisonError<T>> for SpoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
