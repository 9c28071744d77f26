use std::{
    sync::{Arc, RwLock},
    time::{Duration, SystemTime},
};

use ahash::AHashMap;
use async_trait::async_trait;

use crate::{MessageId, NewMessage, QueuedMessage, SpoolError, r#trait::BackingStore};

pub(crate) struct Inner {
    pub(crate) messages: AHashMap<MessageId, QueuedMessage>,
    generator: ulid::Generator,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            messages: AHashMap::new(),
            generator: ulid::Generator::new(),
        }
    }
}

impl Inner {
    /// Monotonic within a millisecond, so ids follow insertion order.
    pub(crate) fn next_id(&mut self) -> crate::Result<MessageId> {
        self.generator
            .generate()
            .map(MessageId::new)
            .map_err(|e| SpoolError::Internal(format!("Unable to generate message id: {e}")))
    }
}

/// In-memory backing store implementation
///
/// Messages live in a map behind an `RwLock` and are lost on restart. Useful
/// for tests and for relays that accept losing the queue on restart.
///
/// # Capacity Management
/// An optional capacity bounds the queue. Once reached, inserts fail until
/// deliveries or sweeps make room.
#[derive(Clone, Default)]
pub struct MemoryBackingStore {
    pub(crate) inner: Arc<RwLock<Inner>>,
    /// Maximum number of messages to store (None = unlimited)
    capacity: Option<usize>,
}

impl std::fmt::Debug for MemoryBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackingStore")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl MemoryBackingStore {
    /// Create a new empty memory-backed store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new memory-backed store with a capacity limit
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Get the current number of messages in the store
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .messages
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Place an already-formed record into the store, keeping its id and
    /// timestamps. Used to restore a queue, or to seed aged messages.
    pub fn import(&self, message: QueuedMessage) -> crate::Result<()> {
        let mut inner = self.inner.write()?;

        if inner.messages.contains_key(&message.id) {
            return Err(SpoolError::AlreadyExists(message.id));
        }

        inner.messages.insert(message.id, message);
        Ok(())
    }
}

/// Oldest first, with the id breaking ties inside a millisecond.
pub(crate) fn oldest_first(messages: &mut [QueuedMessage]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn insert(&self, message: NewMessage) -> crate::Result<MessageId> {
        let mut inner = self.inner.write()?;

        if let Some(cap) = self.capacity
            && inner.messages.len() >= cap
        {
            return Err(SpoolError::Internal(format!(
                "Memory spool capacity exceeded: {}/{cap} messages",
                inner.messages.len()
            )));
        }

        let id = inner.next_id()?;
        inner
            .messages
            .insert(id, message.into_queued(id, SystemTime::now()));

        Ok(id)
    }

    async fn fetch_pending(&self, limit: usize) -> crate::Result<Vec<QueuedMessage>> {
        let mut pending: Vec<_> = self.inner.read()?.messages.values().cloned().collect();
        oldest_first(&mut pending);
        pending.truncate(limit);

        Ok(pending)
    }

    async fn increment_failure(&self, id: &MessageId, reason: &str) -> crate::Result<u32> {
        self.inner
            .write()?
            .messages
            .get_mut(id)
            .map(|message| message.record_failure(reason))
            .ok_or(SpoolError::NotFound(*id))
    }

    async fn delete(&self, id: &MessageId) -> crate::Result<()> {
        self.inner.write()?.messages.remove(id);
        Ok(())
    }

    async fn sweep(&self, max_age: Duration, max_failures: u32) -> crate::Result<usize> {
        let now = SystemTime::now();
        let mut inner = self.inner.write()?;

        let before = inner.messages.len();
        inner
            .messages
            .retain(|_, message| !message.is_exhausted(max_failures));
        let exhausted = before - inner.messages.len();

        inner
            .messages
            .retain(|_, message| !message.is_expired(now, max_age));
        let expired = before - exhausted - inner.messages.len();

        tracing::debug!(exhausted, expired, "Swept memory spool");

        Ok(exhausted + expired)
    }

    async fn read(&self, id: &MessageId) -> crate::Result<QueuedMessage> {
        self.inner
            .read()?
            .messages
            .get(id)
            .cloned()
            .ok_or(SpoolError::NotFound(*id))
    }

    async fn list(&self) -> crate::Result<Vec<MessageId>> {
        let mut messages: Vec<_> = self.inner.read()?.messages.values().cloned().collect();
        oldest_first(&mut messages);

        Ok(messages.into_iter().map(|message| message.id).collect())
    }
}
