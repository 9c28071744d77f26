use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::MessageId;

/// A completed submission, as handed to the queue by an ingestion session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Envelope sender after any relay-wide override
    pub sender: String,
    /// The sender the client declared, kept when an override replaced it
    pub declared_sender: Option<String>,
    /// Ordered, non-empty recipient list
    pub recipients: Vec<String>,
    /// Advisory subject, used for logging only
    pub subject: String,
    /// The body as submitted, lines joined with CRLF
    pub content: String,
}

impl NewMessage {
    /// Stamp this submission with its queue identity
    #[must_use]
    pub fn into_queued(self, id: MessageId, created_at: SystemTime) -> QueuedMessage {
        QueuedMessage {
            id,
            envelope_from: self.sender,
            declared_from: self.declared_sender,
            envelope_recipients: self.recipients,
            subject: self.subject,
            content: self.content,
            created_at,
            failure_count: 0,
            last_error: None,
        }
    }
}

/// A message waiting in the queue for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub envelope_from: String,
    pub declared_from: Option<String>,
    pub envelope_recipients: Vec<String>,
    pub subject: String,
    /// Stored separately from the metadata by the file backend
    #[serde(skip)]
    pub content: String,
    pub created_at: SystemTime,
    /// Number of failed delivery attempts, never decremented
    pub failure_count: u32,
    /// Description of the most recent failed attempt
    pub last_error: Option<String>,
}

impl QueuedMessage {
    /// Whether this message has been queued for strictly longer than `max_age`
    #[must_use]
    pub fn is_expired(&self, now: SystemTime, max_age: Duration) -> bool {
        now.duration_since(self.created_at)
            .is_ok_and(|age| age > max_age)
    }

    /// Whether this message has reached the give-up threshold
    #[must_use]
    pub const fn is_exhausted(&self, max_failures: u32) -> bool {
        self.failure_count >= max_failures
    }

    /// Record a failed attempt and return the new failure count
    pub fn record_failure(&mut self, reason: &str) -> u32 {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_error = Some(reason.to_string());
        self.failure_count
    }
}
