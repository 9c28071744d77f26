//! One dispatch tick: fetch a batch and attempt each message in turn.

use std::time::Duration;

use relayq_common::tracing;
use relayq_spool::QueuedMessage;

use super::DispatchWorker;
use crate::error::{DeliveryError, TemporaryError};

/// What a single tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Failed attempts that reached the give-up threshold and were deleted
    pub abandoned: usize,
}

enum Outcome {
    Delivered,
    Failed,
    Abandoned,
}

impl DispatchWorker {
    /// Attempt up to `batch_size` pending messages, oldest first.
    ///
    /// Attempts run one after another; a failure never stops the rest of the
    /// batch.
    ///
    /// # Errors
    /// If the worker is not initialised or the batch cannot be fetched.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn dispatch(&self) -> Result<DispatchSummary, DeliveryError> {
        let spool = self.spool()?;
        self.transport()?;

        let batch = spool.fetch_pending(self.batch_size).await?;
        let mut summary = DispatchSummary::default();

        if batch.is_empty() {
            tracing::debug!("No pending messages");
            return Ok(summary);
        }

        tracing::info!(count = batch.len(), "Dispatching pending messages");

        for message in &batch {
            summary.attempted += 1;
            match self.attempt(message).await {
                Outcome::Delivered => summary.delivered += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Abandoned => {
                    summary.failed += 1;
                    summary.abandoned += 1;
                }
            }
        }

        tracing::info!(
            attempted = summary.attempted,
            delivered = summary.delivered,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "Dispatch tick complete"
        );

        Ok(summary)
    }

    async fn attempt(&self, message: &QueuedMessage) -> Outcome {
        let (Ok(spool), Ok(transport)) = (self.spool(), self.transport()) else {
            return Outcome::Failed;
        };

        tracing::info!(
            id = %message.id,
            from = %message.envelope_from,
            to = ?message.envelope_recipients,
            subject = %message.subject,
            failures = message.failure_count,
            "Delivering message"
        );

        let limit = Duration::from_secs(self.attempt_timeout_secs);
        let result = tokio::time::timeout(limit, transport.deliver(message))
            .await
            .unwrap_or_else(|_| {
                Err(TemporaryError::Timeout(format!(
                    "delivery attempt exceeded {}s",
                    self.attempt_timeout_secs
                ))
                .into())
            });

        match result {
            Ok(()) => {
                // Delivered; a failed delete means a later tick may send it again
                if let Err(err) = spool.delete(&message.id).await {
                    tracing::error!(id = %message.id, "Error deleting delivered message: {err}");
                } else {
                    tracing::info!(id = %message.id, "Message delivered and removed from queue");
                }
                Outcome::Delivered
            }
            Err(err) => {
                tracing::warn!(
                    id = %message.id,
                    to = ?message.envelope_recipients,
                    category = err.category(),
                    "Delivery failed: {err}"
                );

                let failures = match spool.increment_failure(&message.id, &err.to_string()).await {
                    Ok(count) => count,
                    Err(store_err) => {
                        tracing::error!(
                            id = %message.id,
                            "Error recording delivery failure: {store_err}"
                        );
                        message.failure_count.saturating_add(1)
                    }
                };

                if failures < self.max_failures {
                    return Outcome::Failed;
                }

                tracing::warn!(
                    id = %message.id,
                    failures,
                    "Too many failed attempts, abandoning message"
                );
                if let Err(err) = spool.delete(&message.id).await {
                    tracing::error!(id = %message.id, "Error deleting abandoned message: {err}");
                }
                Outcome::Abandoned
            }
        }
    }
}
