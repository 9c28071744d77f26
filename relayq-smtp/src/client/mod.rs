//! Outbound SMTP client used to hand queued mail to the upstream server.
//!
//! Supports plain TCP, implicit TLS and the STARTTLS upgrade, plus
//! `AUTH PLAIN`. Responses may span several lines.
//!
//! ```no_run
//! use relayq_smtp::client::SmtpClient;
//!
//! # async fn example() -> Result<(), relayq_smtp::client::ClientError> {
//! let mut client = SmtpClient::connect("smtp.example.com:587", "smtp.example.com").await?;
//! client.read_greeting().await?;
//! client.ehlo("relay.local").await?;
//! client.starttls().await?;
//! client.ehlo("relay.local").await?;
//! client.auth_plain("user", "secret").await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
