use std::time::Duration;

use relayq_common::tracing;

use super::DispatchWorker;
use crate::error::DeliveryError;

impl DispatchWorker {
    /// Evict every message that reached `max_failures` or is older than
    /// `max_age_secs`, returning how many were removed.
    ///
    /// # Errors
    /// If the worker is not initialised or the store fails.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn sweep(&self) -> Result<usize, DeliveryError> {
        let removed = self
            .spool()?
            .sweep(Duration::from_secs(self.max_age_secs), self.max_failures)
            .await?;

        if removed > 0 {
            tracing::info!(removed, "Evicted expired or exhausted messages");
        }

        Ok(removed)
    }
}
