use std::time::Duration;

use crate::{MessageId, NewMessage, QueuedMessage, Result};

/// The queue of messages awaiting delivery.
///
/// Every method is individually atomic with respect to the others. No
/// cross-call transactions are offered: a message fetched by one task may be
/// deleted by another before the first acts on it.
#[async_trait::async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Persist a submission and assign its identifier.
    async fn insert(&self, message: NewMessage) -> Result<MessageId>;

    /// Up to `limit` messages, oldest first.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<QueuedMessage>>;

    /// Record a failed delivery attempt, returning the new failure count.
    async fn increment_failure(&self, id: &MessageId, reason: &str) -> Result<u32>;

    /// Remove a message. Removing an id that is already gone succeeds.
    async fn delete(&self, id: &MessageId) -> Result<()>;

    /// Remove every message with at least `max_failures` failures, then every
    /// message older than `max_age`. Returns how many were removed.
    async fn sweep(&self, max_age: Duration, max_failures: u32) -> Result<usize>;

    async fn read(&self, id: &MessageId) -> Result<QueuedMessage>;

    /// Identifiers of every queued message, oldest first.
    async fn list(&self) -> Result<Vec<MessageId>>;
}
