use core::fmt::{self, Debug, Formatter};

use relayq_spool::QueuedMessage;
use serde::Deserialize;

use crate::types::{EncryptionMode, SmtpTimeouts};

const fn default_port() -> u16 {
    587
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

/// The relay every queued message is handed to.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Upstream {
    /// An empty host fails every delivery attempt as a configuration error
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Authentication is skipped when empty
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Fixed relay-wide sender, replacing whatever clients declare
    #[serde(default)]
    pub from: String,

    #[serde(default)]
    pub encryption: EncryptionMode,

    /// Name sent in EHLO
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// Skip certificate verification. Only for testing against self-signed
    /// certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            from: String::new(),
            encryption: EncryptionMode::default(),
            helo_name: default_helo_name(),
            accept_invalid_certs: false,
            timeouts: SmtpTimeouts::default(),
        }
    }
}

impl Debug for Upstream {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Upstream")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .field("encryption", &self.encryption)
            .field("helo_name", &self.helo_name)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl Upstream {
    /// `host:port`, bracketing IPv6 literals
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The host name TLS certificates are checked against
    #[must_use]
    pub fn server_name(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        (!self.username.is_empty()).then_some((self.username.as_str(), self.password.as_str()))
    }

    #[must_use]
    pub fn fixed_sender(&self) -> Option<&str> {
        (!self.from.is_empty()).then_some(self.from.as_str())
    }

    /// The sender used on the wire: the fixed sender when configured,
    /// otherwise the message's own envelope sender.
    #[must_use]
    pub fn sender_for<'a>(&'a self, message: &'a QueuedMessage) -> &'a str {
        self.fixed_sender().unwrap_or(&message.envelope_from)
    }
}
