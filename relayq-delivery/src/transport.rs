use std::sync::Arc;

use async_trait::async_trait;
use relayq_spool::QueuedMessage;

use crate::{
    compose::compose,
    error::{DeliveryError, SystemError},
    smtp_transaction::SmtpTransaction,
    upstream::Upstream,
};

/// Hands one queued message to its next hop.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Attempt delivery to every envelope recipient as a single transaction.
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), DeliveryError>;
}

/// Delivers over SMTP to the configured upstream relay.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    upstream: Arc<Upstream>,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(upstream: Upstream) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }

    #[must_use]
    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), DeliveryError> {
        if self.upstream.host.is_empty() {
            return Err(SystemError::Configuration("no upstream host configured".to_string()).into());
        }

        let sender = self.upstream.sender_for(message);
        let content = compose(message, sender, chrono::Local::now().fixed_offset());

        SmtpTransaction::new(
            &self.upstream,
            sender,
            &message.envelope_recipients,
            &content,
        )
        .execute()
        .await
    }
}
