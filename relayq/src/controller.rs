use std::sync::{Arc, LazyLock};

use relayq_common::{Signal, internal, logging, tracing};
use relayq_delivery::{DispatchWorker, SmtpTransport, Upstream};
use relayq_smtp::{Listener, SpoolTransactionHandler, TransactionHandler};
use relayq_spool::SpoolConfig;
use serde::Deserialize;
use tokio::{net::TcpListener, sync::broadcast};

/// The whole relay, as described by its configuration file
#[derive(Debug, Default, Deserialize)]
pub struct Relay {
    #[serde(default)]
    pub smtp: Listener,
    #[serde(default)]
    pub spool: SpoolConfig,
    #[serde(default)]
    pub delivery: DispatchWorker,
    #[serde(default)]
    pub upstream: Upstream,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| anyhow::anyhow!("Failed to broadcast shutdown: {e}"))?;

    // Components drain on their own; a second CTRL+C stops waiting for them
    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "Forced shutdown");

    Ok(())
}

impl Relay {
    /// Run the relay until a shutdown signal has been handled
    ///
    /// # Errors
    /// If the spool cannot be opened or the listener cannot bind.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        internal!("Relay running");

        let ret = tokio::select! {
            r = self.serve(SHUTDOWN_BROADCAST.clone()) => r,
            r = shutdown() => r,
        };

        internal!(level = INFO, "Shut down");

        ret
    }

    /// Bind the configured socket and serve until `signal` carries a shutdown
    ///
    /// # Errors
    /// If the spool cannot be opened or the listener cannot bind.
    pub async fn serve(self, signal: broadcast::Sender<Signal>) -> anyhow::Result<()> {
        let listener = self.smtp.bind().await?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound socket
    ///
    /// The listener and the dispatch worker run side by side and both drain
    /// before this returns.
    ///
    /// # Errors
    /// If the spool cannot be opened.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        signal: broadcast::Sender<Signal>,
    ) -> anyhow::Result<()> {
        let Self {
            smtp,
            spool,
            mut delivery,
            upstream,
        } = self;

        internal!("Opening spool {spool:?}");
        let spool = spool.into_backing_store()?;

        if upstream.host.is_empty() {
            tracing::warn!("No upstream host configured, every delivery attempt will fail");
        }

        let handler: Arc<dyn TransactionHandler> = Arc::new(
            SpoolTransactionHandler::new(Arc::clone(&spool))
                .with_fixed_sender(upstream.fixed_sender().map(str::to_string)),
        );

        delivery.init(spool, Arc::new(SmtpTransport::new(upstream)));

        let (ingestion, dispatch) = tokio::join!(
            smtp.serve_on(listener, handler, signal.subscribe()),
            delivery.serve(signal.subscribe()),
        );

        ingestion?;
        dispatch?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use relayq_delivery::EncryptionMode;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let relay: Relay = ron::from_str("()").unwrap();

        assert_eq!(relay.smtp, Listener::default());
        assert_eq!(relay.spool, SpoolConfig::default());
        assert_eq!(relay.upstream, Upstream::default());
        assert_eq!(relay.delivery.batch_size, 10);
    }

    #[test]
    fn full_document() {
        let relay: Relay = ron::from_str(
            r#"Relay(
                smtp: (
                    socket: "127.0.0.1:2525",
                    banner: "relay.example.com",
                    timeouts: (command_secs: 60),
                ),
                spool: Memory(capacity: Some(100)),
                delivery: (
                    queue_interval_secs: 10,
                    max_failures: 3,
                    max_age_secs: 3600,
                ),
                upstream: (
                    host: "smtp.example.com",
                    port: 465,
                    username: "relay",
                    password: "secret",
                    from: "noreply@example.com",
                    encryption: ssl,
                ),
            )"#,
        )
        .unwrap();

        assert_eq!(relay.smtp.socket.port(), 2525);
        assert_eq!(relay.smtp.timeouts.command_secs, 60);
        assert_eq!(relay.spool, SpoolConfig::Memory { capacity: Some(100) });
        assert_eq!(relay.delivery.queue_interval_secs, 10);
        assert_eq!(relay.delivery.max_failures, 3);
        assert_eq!(relay.delivery.sweep_interval_secs, 43_200);
        assert_eq!(relay.upstream.encryption, EncryptionMode::Implicit);
        assert_eq!(relay.upstream.fixed_sender(), Some("noreply@example.com"));
    }
}
