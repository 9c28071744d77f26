use std::{net::SocketAddr, sync::Arc};

use futures_util::future::join_all;
use relayq_common::{Signal, error::ListenerError, internal, tracing};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::broadcast::error::RecvError};

use crate::{
    session::{Session, SessionConfig, SessionTimeouts},
    transaction_handler::TransactionHandler,
};

/// The ingestion endpoint: where to listen and how sessions behave.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Listener {
    #[serde(default = "default_socket")]
    pub socket: SocketAddr,
    /// Name used in the greeting and HELO replies. Falls back to `HOSTNAME`.
    #[serde(default)]
    pub banner: String,
    #[serde(default)]
    pub timeouts: SessionTimeouts,
}

fn default_socket() -> SocketAddr {
    SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 1025))
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            banner: String::new(),
            timeouts: SessionTimeouts::default(),
        }
    }
}

impl From<SocketAddr> for Listener {
    fn from(socket: SocketAddr) -> Self {
        Self {
            socket,
            ..Self::default()
        }
    }
}

impl Listener {
    /// Bind the configured socket
    ///
    /// # Errors
    /// `ListenerError::BindFailed` when the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, ListenerError> {
        TcpListener::bind(self.socket)
            .await
            .map_err(|source| ListenerError::BindFailed {
                address: self.socket.to_string(),
                source,
            })
    }

    /// Bind and accept connections until shutdown.
    ///
    /// # Errors
    /// Fails only when the socket cannot be bound.
    pub async fn serve(
        &self,
        handler: Arc<dyn TransactionHandler>,
        shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ListenerError> {
        let listener = self.bind().await?;
        self.serve_on(listener, handler, shutdown).await
    }

    /// Accept connections on an already bound socket, one task per client.
    ///
    /// On shutdown every session is told to close, and this returns once
    /// they all have.
    ///
    /// # Errors
    /// Currently never fails; accept errors are logged and skipped.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        handler: Arc<dyn TransactionHandler>,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ListenerError> {
        let address = listener.local_addr().unwrap_or(self.socket);
        internal!(level = INFO, "Listening for mail on {address}");

        let mut sessions = Vec::default();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(RecvError::Closed)) {
                        internal!(level = INFO, "Listener {address} received shutdown signal, finishing sessions ...");
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(connection) => connection,
                        Err(err) => {
                            let err = ListenerError::from(err);
                            internal!(level = WARN, "{err}");
                            continue;
                        }
                    };
                    tracing::debug!(%peer, "Connection received on {address}");

                    let config = SessionConfig::builder(Arc::clone(&handler))
                        .with_banner(self.banner.clone())
                        .with_timeouts(self.timeouts)
                        .build();
                    let session = Session::create(stream, peer, config);
                    let signal = shutdown.resubscribe();

                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = session.run(signal).await {
                            internal!(level = ERROR, "Error: {err}");
                        }
                    }));

                    sessions.retain(|session| !session.is_finished());
                }
            }
        }

        Ok(())
    }
}
