//! Error types shared by the ingestion side of the relay.

use std::io;

use thiserror::Error;

/// Errors that can occur during session handling.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Protocol error occurred during session.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection error occurred.
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// Session was cancelled (e.g., client disconnected).
    #[error("Session cancelled")]
    Cancelled,

    /// Shutdown signal received.
    #[error("Shutdown requested")]
    Shutdown,

    /// Session timed out.
    #[error("Session timed out after {0} seconds")]
    Timeout(u64),
}

impl SessionError {
    /// Returns `true` if the error indicates a graceful shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown | Self::Cancelled)
    }

    /// Returns `true` if the error is a client-side issue.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Timeout(_))
    }
}

/// Errors that can occur in the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to socket address. The relay cannot run without its listener.
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),
}

impl ListenerError {
    /// Returns `true` if the listener cannot continue.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::BindFailed { .. })
    }
}
