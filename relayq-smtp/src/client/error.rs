use std::io;

use thiserror::Error;

/// Errors raised while talking to a remote SMTP server.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something that is not an SMTP reply
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// A success code other than the one the command calls for
    #[error("Unexpected SMTP status code: {code} - {message}")]
    UnexpectedResponse { code: u16, message: String },

    /// The server rejected the command with a 4xx or 5xx reply
    #[error("SMTP error: {code} - {message}")]
    SmtpError { code: u16, message: String },

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// The reply code, when the error came from a server reply.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedResponse { code, .. } | Self::SmtpError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// A 5xx reply: retrying the same message will not help.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.code(), Some(500..=599))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
