//! A single delivery attempt against the upstream relay.
//!
//! The three encryption modes differ only in how the connection is opened:
//! - `None`: plain TCP
//! - `StartTls`: plain TCP, then EHLO, STARTTLS and EHLO again
//! - `Implicit`: TLS before the greeting
//!
//! Authentication, envelope and data follow the same path for all of them.

use std::{future::Future, time::Duration};

use relayq_common::tracing;
use relayq_smtp::client::{ClientError, SmtpClient};

use crate::{
    error::{DeliveryError, PermanentError, TemporaryError},
    types::EncryptionMode,
    upstream::Upstream,
};

/// Bound one protocol step by `secs`, converting client errors.
async fn timed<T>(
    step: &'static str,
    secs: u64,
    future: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, DeliveryError> {
    tokio::time::timeout(Duration::from_secs(secs), future)
        .await
        .map_err(|_| TemporaryError::Timeout(format!("{step} timed out after {secs}s")))?
        .map_err(DeliveryError::from)
}

/// Everything needed to hand one message to the upstream
pub struct SmtpTransaction<'a> {
    upstream: &'a Upstream,
    sender: &'a str,
    recipients: &'a [String],
    content: &'a str,
}

impl<'a> SmtpTransaction<'a> {
    #[must_use]
    pub const fn new(
        upstream: &'a Upstream,
        sender: &'a str,
        recipients: &'a [String],
        content: &'a str,
    ) -> Self {
        Self {
            upstream,
            sender,
            recipients,
            content,
        }
    }

    /// Run the whole exchange, from connecting to QUIT.
    ///
    /// # Errors
    /// The first step that fails aborts the attempt with its error.
    #[tracing::instrument(
        level = "debug",
        skip(self),
        fields(server = %self.upstream.address(), mode = %self.upstream.encryption),
        err
    )]
    pub async fn execute(self) -> Result<(), DeliveryError> {
        if self.upstream.accept_invalid_certs && self.upstream.encryption != EncryptionMode::None {
            tracing::warn!(
                server = %self.upstream.address(),
                "TLS certificate validation is disabled for this connection"
            );
        }

        let mut client = self.connect().await?;
        self.handshake(&mut client).await?;
        self.authenticate(&mut client).await?;
        self.send_envelope(&mut client).await?;
        self.send_message_data(&mut client).await?;

        // The message is already accepted, so a failed QUIT is only logged
        let quit_secs = self.upstream.timeouts.quit_secs;
        match tokio::time::timeout(Duration::from_secs(quit_secs), client.quit()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::debug!("QUIT failed after delivery: {err}"),
            Err(_) => tracing::debug!("QUIT timed out after {quit_secs}s"),
        }

        Ok(())
    }

    async fn connect(&self) -> Result<SmtpClient, DeliveryError> {
        let address = self.upstream.address();
        let server_name = self.upstream.server_name();
        let accept_invalid_certs = self.upstream.accept_invalid_certs;
        let timeouts = &self.upstream.timeouts;

        let client = match self.upstream.encryption {
            EncryptionMode::None | EncryptionMode::StartTls => {
                timed(
                    "connect",
                    timeouts.connect_secs,
                    SmtpClient::connect(&address, server_name),
                )
                .await
            }
            EncryptionMode::Implicit => {
                timed(
                    "connect",
                    timeouts.connect_secs,
                    SmtpClient::connect_tls(&address, server_name, accept_invalid_certs),
                )
                .await
            }
        }
        .map_err(|err| match err {
            DeliveryError::Temporary(TemporaryError::ConnectionFailed(reason)) => {
                TemporaryError::ConnectionFailed(format!("{address}: {reason}")).into()
            }
            other => other,
        })?;

        Ok(client.accept_invalid_certs(accept_invalid_certs))
    }

    async fn handshake(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        let helo = &self.upstream.helo_name;
        let timeouts = &self.upstream.timeouts;

        timed("greeting", timeouts.ehlo_secs, client.read_greeting()).await?;
        timed("EHLO", timeouts.ehlo_secs, client.ehlo(helo)).await?;

        if self.upstream.encryption == EncryptionMode::StartTls {
            timed("STARTTLS", timeouts.starttls_secs, client.starttls())
                .await
                .map_err(|err| match err {
                    DeliveryError::Permanent(PermanentError::MessageRejected(reason)) => {
                        PermanentError::TlsRequired(reason).into()
                    }
                    other => other,
                })?;

            timed("EHLO", timeouts.ehlo_secs, client.ehlo(helo)).await?;
        }

        Ok(())
    }

    async fn authenticate(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        let Some((username, password)) = self.upstream.credentials() else {
            return Ok(());
        };

        timed(
            "AUTH",
            self.upstream.timeouts.auth_secs,
            client.auth_plain(username, password),
        )
        .await
        .map_err(|err| match err {
            DeliveryError::Permanent(PermanentError::MessageRejected(reason)) => {
                PermanentError::AuthenticationFailed(reason).into()
            }
            other => other,
        })?;

        Ok(())
    }

    async fn send_envelope(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        let timeouts = &self.upstream.timeouts;

        timed(
            "MAIL FROM",
            timeouts.mail_from_secs,
            client.mail_from(self.sender),
        )
        .await?;

        for recipient in self.recipients {
            timed("RCPT TO", timeouts.rcpt_to_secs, client.rcpt_to(recipient)).await?;
        }

        Ok(())
    }

    async fn send_message_data(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        let data_secs = self.upstream.timeouts.data_secs;

        timed("DATA", data_secs, client.data()).await?;
        timed("message data", data_secs, client.send_data(self.content)).await?;

        Ok(())
    }
}
