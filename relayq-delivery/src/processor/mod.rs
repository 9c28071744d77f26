//! Dispatch worker orchestration

mod dispatch;
mod sweep;

use std::{sync::Arc, time::Duration};

use relayq_common::{Signal, internal, tracing};
use relayq_spool::BackingStore;
use serde::Deserialize;
use tokio::time::MissedTickBehavior;

pub use dispatch::DispatchSummary;

use crate::{error::DeliveryError, error::SystemError, transport::Transport};

const fn default_queue_interval() -> u64 {
    30
}

const fn default_batch_size() -> usize {
    10
}

const fn default_max_failures() -> u32 {
    5
}

const fn default_max_age() -> u64 {
    72 * 60 * 60
}

const fn default_sweep_interval() -> u64 {
    12 * 60 * 60
}

const fn default_attempt_timeout() -> u64 {
    300
}

/// Drains the queue towards the upstream and evicts what cannot be delivered.
///
/// Two loops share one task: a dispatch tick every `queue_interval_secs` and
/// an eviction sweep every `sweep_interval_secs`. Both run once immediately
/// on start.
#[derive(Debug, Deserialize)]
pub struct DispatchWorker {
    /// How often pending messages are fetched and attempted
    ///
    /// Default: 30 seconds
    #[serde(default = "default_queue_interval")]
    pub queue_interval_secs: u64,

    /// Messages attempted per tick, oldest first
    ///
    /// Default: 10
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failed attempts after which a message is abandoned
    ///
    /// Default: 5
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Messages older than this are evicted by the sweep
    ///
    /// Default: 259200 seconds (72 hours)
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,

    /// Default: 43200 seconds (12 hours)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Upper bound on a single delivery attempt, all steps included
    ///
    /// Default: 300 seconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    #[serde(skip)]
    pub(crate) spool: Option<Arc<dyn BackingStore>>,

    #[serde(skip)]
    pub(crate) transport: Option<Arc<dyn Transport>>,
}

impl Default for DispatchWorker {
    fn default() -> Self {
        Self {
            queue_interval_secs: default_queue_interval(),
            batch_size: default_batch_size(),
            max_failures: default_max_failures(),
            max_age_secs: default_max_age(),
            sweep_interval_secs: default_sweep_interval(),
            attempt_timeout_secs: default_attempt_timeout(),
            spool: None,
            transport: None,
        }
    }
}

impl DispatchWorker {
    /// Attach the queue to drain and the transport to deliver through
    pub fn init(&mut self, spool: Arc<dyn BackingStore>, transport: Arc<dyn Transport>) {
        internal!("Initialising dispatch worker ...");
        self.spool = Some(spool);
        self.transport = Some(transport);
    }

    fn spool(&self) -> Result<&Arc<dyn BackingStore>, DeliveryError> {
        self.spool.as_ref().ok_or_else(|| {
            SystemError::NotInitialized("no spool attached, call init() first".to_string()).into()
        })
    }

    fn transport(&self) -> Result<&Arc<dyn Transport>, DeliveryError> {
        self.transport.as_ref().ok_or_else(|| {
            SystemError::NotInitialized("no transport attached, call init() first".to_string())
                .into()
        })
    }

    /// Run both loops until shutdown.
    ///
    /// A tick that is already running finishes before the shutdown is seen;
    /// in-flight attempts are not cut short.
    ///
    /// # Errors
    /// Only when the worker was never initialised.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        self.spool()?;
        self.transport()?;

        internal!(
            level = INFO,
            "Dispatch worker starting: every {}s, batch {}, give up after {} failures",
            self.queue_interval_secs,
            self.batch_size,
            self.max_failures
        );

        let mut queue_timer =
            tokio::time::interval(Duration::from_secs(self.queue_interval_secs.max(1)));
        queue_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sweep_timer =
            tokio::time::interval(Duration::from_secs(self.sweep_interval_secs.max(1)));
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            internal!(level = INFO, "Dispatch worker received shutdown signal");
                            break;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(err) => {
                            tracing::error!("Dispatch worker shutdown channel error: {err}");
                            break;
                        }
                    }
                }

                _ = sweep_timer.tick() => {
                    match self.sweep().await {
                        Ok(count) => tracing::debug!(count, "Sweep complete"),
                        Err(err) => tracing::error!("Error sweeping spool: {err}"),
                    }
                }

                _ = queue_timer.tick() => {
                    if let Err(err) = self.dispatch().await {
                        tracing::error!("Error dispatching queue: {err}");
                    }
                }
            }
        }

        internal!("Dispatch worker shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_from_empty_document() {
        let worker: DispatchWorker = ron::from_str("()").unwrap();

        assert_eq!(worker.queue_interval_secs, 30);
        assert_eq!(worker.batch_size, 10);
        assert_eq!(worker.max_failures, 5);
        assert_eq!(worker.max_age_secs, 259_200);
        assert_eq!(worker.sweep_interval_secs, 43_200);
        assert_eq!(worker.attempt_timeout_secs, 300);
    }

    #[tokio::test]
    async fn uninitialised_worker_refuses_to_run() {
        let worker = DispatchWorker::default();
        let (_tx, rx) = tokio::sync::broadcast::channel(1);

        let err = worker.serve(rx).await.unwrap_err();
        assert!(err.is_system());
        assert!(worker.dispatch().await.is_err());
    }
}
