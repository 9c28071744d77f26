//! Error types for the ingestion side of relayq-smtp.

use relayq_spool::SpoolError;
use thiserror::Error;

/// Why a `MAIL` or `RCPT` argument could not be turned into an address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The `FROM:` / `TO:` keyword is missing.
    #[error("expected {0}<address>")]
    MissingKeyword(&'static str),

    /// Nothing remained once angle brackets were removed.
    #[error("empty address")]
    EmptyAddress,
}

/// Errors that fail a transaction at the end of body collection.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The client ended the body without sending any lines.
    #[error("empty message body")]
    EmptyBody,

    /// The queue refused the message.
    #[error("{0}")]
    Spool(#[from] SpoolError),
}

impl CommitError {
    /// Returns `true` if the client may retry the same transaction.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Spool(_))
    }
}
