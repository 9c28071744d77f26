//! Typed errors for delivery attempts.
//!
//! Every variant counts as a failed attempt against the message. The
//! category only changes how the failure is logged:
//! - Permanent: the upstream refused with a 5xx
//! - Temporary: 4xx replies, network trouble, timeouts
//! - System: configuration or internal problems

use relayq_smtp::client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

#[derive(Debug, Error)]
pub enum PermanentError {
    /// The upstream rejected the message or one of its envelope addresses
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The upstream would not upgrade to TLS
    #[error("TLS required: {0}")]
    TlsRequired(String),
}

#[derive(Debug, Error)]
pub enum TemporaryError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
}

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Spool error: {0}")]
    Spool(#[from] relayq_spool::SpoolError),

    #[error("Dispatch worker not initialized: {0}")]
    NotInitialized(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Short label for log fields
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Permanent(_) => "permanent",
            Self::Temporary(_) => "temporary",
            Self::System(_) => "system",
        }
    }
}

/// 4xx replies and transport trouble are temporary, 5xx replies permanent,
/// and anything that points at a protocol violation is a system error.
impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message } if (400..500).contains(&code) => {
                Self::Temporary(TemporaryError::SmtpTemporary(format!("{code} {message}")))
            }

            ClientError::SmtpError { code, message } if (500..600).contains(&code) => {
                Self::Permanent(PermanentError::MessageRejected(format!("{code} {message}")))
            }

            ClientError::SmtpError { code, message }
            | ClientError::UnexpectedResponse { code, message } => Self::System(
                SystemError::Internal(format!("Unexpected SMTP response: {code} {message}")),
            ),

            ClientError::Io(e) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("I/O error: {e}")))
            }

            ClientError::ConnectionClosed => Self::Temporary(TemporaryError::ConnectionFailed(
                "Connection closed unexpectedly".to_string(),
            )),

            ClientError::TlsError(msg) => Self::Temporary(TemporaryError::TlsHandshakeFailed(msg)),

            ClientError::ParseError(msg) => Self::System(SystemError::Internal(format!(
                "SMTP protocol parse error: {msg}"
            ))),

            ClientError::Utf8Error(e) => {
                Self::System(SystemError::Internal(format!("UTF-8 decoding error: {e}")))
            }
        }
    }
}

impl From<relayq_spool::SpoolError> for DeliveryError {
    fn from(error: relayq_spool::SpoolError) -> Self {
        Self::System(SystemError::Spool(error))
    }
}
