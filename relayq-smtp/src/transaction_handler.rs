//! Committing completed transactions to the queue.
//!
//! The FSM stops at [`PostDot`] once the body terminator arrives. The session
//! then hands that state to a [`TransactionHandler`], which decides the reply
//! and the state the session continues in.

use std::sync::Arc;

use async_trait::async_trait;
use relayq_common::{internal, status::Status};
use relayq_spool::{BackingStore, MessageId, NewMessage};

use crate::{
    error::CommitError,
    session_state::SessionState,
    state::{Greeted, PostDot, RecipientSet, State},
};

/// Recorded when the body carries no `Subject:` line
pub const NO_SUBJECT: &str = "(no subject)";

#[async_trait]
pub trait TransactionHandler: Send + Sync + std::fmt::Debug {
    /// Commit a finished transaction, leaving the reply in `ctx`.
    ///
    /// On success, or when the body was empty, the session returns to
    /// `Greeted`. If the queue refuses the message the envelope is kept so the
    /// client can send `DATA` again.
    async fn commit(&self, transaction: PostDot, ctx: &mut SessionState) -> State;
}

/// Writes transactions into a [`BackingStore`]
#[derive(Debug, Clone)]
pub struct SpoolTransactionHandler {
    spool: Arc<dyn BackingStore>,
    fixed_sender: Option<String>,
}

impl SpoolTransactionHandler {
    #[must_use]
    pub fn new(spool: Arc<dyn BackingStore>) -> Self {
        Self {
            spool,
            fixed_sender: None,
        }
    }

    /// Record every message as sent by `sender`, whatever the client declared
    #[must_use]
    pub fn with_fixed_sender(mut self, sender: Option<String>) -> Self {
        self.fixed_sender = sender.filter(|sender| !sender.is_empty());
        self
    }

    /// Build the queue record for a transaction
    pub fn prepare(&self, transaction: &PostDot) -> Result<NewMessage, CommitError> {
        if transaction.lines.is_empty() {
            return Err(CommitError::EmptyBody);
        }

        let declared = &transaction.envelope.sender;
        let (sender, declared_sender) = match &self.fixed_sender {
            Some(fixed) => {
                tracing::debug!(declared = %declared, fixed = %fixed, "Overriding envelope sender");
                (fixed.clone(), Some(declared.clone()))
            }
            None => (declared.clone(), None),
        };

        Ok(NewMessage {
            sender,
            declared_sender,
            recipients: transaction.envelope.recipients.clone(),
            subject: subject_of(&transaction.lines),
            content: transaction.lines.join("\r\n"),
        })
    }

    async fn store(&self, transaction: &PostDot) -> Result<MessageId, CommitError> {
        let message = self.prepare(transaction)?;
        Ok(self.spool.insert(message).await?)
    }
}

#[async_trait]
impl TransactionHandler for SpoolTransactionHandler {
    async fn commit(&self, transaction: PostDot, ctx: &mut SessionState) -> State {
        match self.store(&transaction).await {
            Ok(id) => {
                internal!(
                    level = INFO,
                    "Queued message {id} for {} recipient(s)",
                    transaction.envelope.recipients.len()
                );
                ctx.reply(Status::Ok, format!("Ok: queued as {id}"));
                State::Greeted(Greeted { id: transaction.id })
            }
            Err(err) => {
                internal!(level = WARN, "Transaction failed: {err}");
                ctx.reply(Status::TransactionFailed, format!("Transaction failed: {err}"));

                if err.is_retryable() {
                    State::RecipientSet(RecipientSet {
                        id: transaction.id,
                        envelope: transaction.envelope,
                    })
                } else {
                    State::Greeted(Greeted { id: transaction.id })
                }
            }
        }
    }
}

/// The trimmed value of the first `Subject:` line, matched case-insensitively.
/// A missing or blank subject becomes [`NO_SUBJECT`].
#[must_use]
pub fn subject_of(lines: &[String]) -> String {
    lines
        .iter()
        .find_map(|line| {
            line.get(..8)
                .filter(|key| key.eq_ignore_ascii_case("subject:"))
                .map(|_| line[8..].trim())
        })
        .filter(|subject| !subject.is_empty())
        .map_or_else(|| NO_SUBJECT.to_string(), str::to_string)
}
