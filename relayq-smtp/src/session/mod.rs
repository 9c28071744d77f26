use std::{net::SocketAddr, sync::Arc, time::Duration};

use relayq_common::{Signal, error::SessionError, incoming, internal, status::Status, tracing};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use relayq_common::traits::fsm::FiniteStateMachine;

use crate::{
    session_state::SessionState, state::State,
    transaction_handler::TransactionHandler,
};

mod io;

/// Deadlines applied to every ingestion connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SessionTimeouts {
    /// Longest wait for the next line from the client.
    ///
    /// Default: 300 seconds
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,

    /// Maximum total connection duration.
    ///
    /// Default: 1800 seconds
    #[serde(default = "default_connection_secs")]
    pub connection_secs: u64,
}

const fn default_command_secs() -> u64 {
    300
}

const fn default_connection_secs() -> u64 {
    1800
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            command_secs: default_command_secs(),
            connection_secs: default_connection_secs(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub handler: Arc<dyn TransactionHandler>,
    pub banner: String,
    pub timeouts: SessionTimeouts,
}

impl SessionConfig {
    #[must_use]
    pub fn builder(handler: Arc<dyn TransactionHandler>) -> SessionConfigBuilder {
        SessionConfigBuilder {
            handler,
            banner: String::new(),
            timeouts: SessionTimeouts::default(),
        }
    }
}

/// Builder for `SessionConfig`
#[derive(Debug)]
pub struct SessionConfigBuilder {
    handler: Arc<dyn TransactionHandler>,
    banner: String,
    timeouts: SessionTimeouts,
}

impl SessionConfigBuilder {
    /// Set the name the server announces itself as
    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            handler: self.handler,
            banner: self.banner,
            timeouts: self.timeouts,
        }
    }
}

/// One client connection, from greeting to close.
pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    peer: SocketAddr,
    connection: BufReader<Stream>,
    state: State,
    context: SessionState,
    handler: Arc<dyn TransactionHandler>,
    timeouts: SessionTimeouts,
    start_time: std::time::Instant,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn create(stream: Stream, peer: SocketAddr, config: SessionConfig) -> Self {
        let banner = if config.banner.is_empty() {
            std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
        } else {
            config.banner
        };

        Self {
            peer,
            connection: BufReader::new(stream),
            state: State::default(),
            context: SessionState::new(banner),
            handler: config.handler,
            timeouts: config.timeouts,
            start_time: std::time::Instant::now(),
        }
    }

    /// Drive the connection until the client quits, disconnects, times out,
    /// or a shutdown is signalled.
    ///
    /// # Errors
    /// Returns `SessionError` on I/O failure or when a deadline passes.
    #[tracing::instrument(level = "trace", skip_all, fields(peer = ?self.peer))]
    pub async fn run(
        mut self,
        mut signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        internal!("Connected");

        let result = self.run_inner(&mut signal).await;

        internal!("Connection closed");
        result
    }

    async fn run_inner(
        &mut self,
        signal: &mut tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        let greeting = format!("{} {} ready", Status::ServiceReady, self.context.banner);
        self.send(&greeting).await?;

        loop {
            let connection_duration = self.start_time.elapsed();
            if connection_duration >= Duration::from_secs(self.timeouts.connection_secs) {
                tracing::warn!(
                    peer = ?self.peer,
                    duration_secs = connection_duration.as_secs(),
                    max_secs = self.timeouts.connection_secs,
                    "Connection exceeded maximum lifetime, closing"
                );
                self.close_with(Status::Unavailable, "Connection lifetime exceeded")
                    .await;
                return Err(SessionError::Timeout(self.timeouts.connection_secs));
            }

            let timeout_secs = self.timeouts.command_secs;

            let line = tokio::select! {
                _ = signal.recv() => {
                    self.close_with(Status::Unavailable, "Server shutting down").await;
                    return Ok(());
                }
                result = tokio::time::timeout(Duration::from_secs(timeout_secs), self.receive()) => {
                    if let Ok(line) = result {
                        line?
                    } else {
                        tracing::warn!(
                            peer = ?self.peer,
                            state = %self.state,
                            timeout_secs,
                            "Client connection timed out"
                        );
                        self.close_with(Status::Unavailable, "Idle timeout, closing connection")
                            .await;
                        return Err(SessionError::Timeout(timeout_secs));
                    }
                }
            };

            // The client closed its side; any open transaction is abandoned
            let Some(line) = line else {
                return Ok(());
            };

            if self.handle_line(line).await? {
                return Ok(());
            }
        }
    }

    /// Returns `true` once the connection should close.
    async fn handle_line(&mut self, line: String) -> Result<bool, SessionError> {
        if !self.state.is_collecting() {
            incoming!("{line}");
        }

        let state = std::mem::take(&mut self.state);
        let mut state = state.transition(line, &mut self.context);

        if let State::PostDot(transaction) = state {
            state = self.handler.commit(transaction, &mut self.context).await;
        }
        self.state = state;

        if let Some(reply) = self.context.take_reply() {
            self.send(&reply).await?;
        }

        Ok(self.state.should_close())
    }
}
