//! Configuration types for the upstream connection

use core::fmt::{self, Display, Formatter};

use serde::Deserialize;

/// How the connection to the upstream relay is protected.
///
/// All three modes share the same envelope and data exchange once the
/// connection is established; they differ only in the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum EncryptionMode {
    /// Plain TCP throughout
    #[serde(alias = "none", alias = "plain")]
    None,

    /// Connect in plain text, then upgrade with `STARTTLS`
    #[default]
    #[serde(alias = "tls", alias = "starttls", alias = "explicit-upgrade")]
    StartTls,

    /// TLS from the first byte
    #[serde(alias = "ssl", alias = "implicit")]
    Implicit,
}

impl Display for EncryptionMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::None => "none",
            Self::StartTls => "starttls",
            Self::Implicit => "implicit",
        })
    }
}

/// SMTP operation timeout configuration
///
/// Every step of a delivery is bounded separately so a stalled upstream is
/// detected at the step where it stalls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SmtpTimeouts {
    /// Connection establishment, including an implicit TLS handshake
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Greeting and EHLO
    ///
    /// Default: 30 seconds
    #[serde(default = "default_ehlo_timeout")]
    pub ehlo_secs: u64,

    /// STARTTLS command and TLS upgrade
    ///
    /// Default: 30 seconds
    #[serde(default = "default_starttls_timeout")]
    pub starttls_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "default_auth_timeout")]
    pub auth_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "default_mail_from_timeout")]
    pub mail_from_secs: u64,

    /// Applied to each recipient separately
    ///
    /// Default: 30 seconds
    #[serde(default = "default_rcpt_to_timeout")]
    pub rcpt_to_secs: u64,

    /// DATA command and message transmission
    ///
    /// Default: 120 seconds
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            ehlo_secs: default_ehlo_timeout(),
            starttls_secs: default_starttls_timeout(),
            auth_secs: default_auth_timeout(),
            mail_from_secs: default_mail_from_timeout(),
            rcpt_to_secs: default_rcpt_to_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_ehlo_timeout() -> u64 {
    30
}

const fn default_starttls_timeout() -> u64 {
    30
}

const fn default_auth_timeout() -> u64 {
    30
}

const fn default_mail_from_timeout() -> u64 {
    30
}

const fn default_rcpt_to_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn encryption_aliases() {
        assert_eq!(ron::from_str::<EncryptionMode>("None").unwrap(), EncryptionMode::None);
        assert_eq!(ron::from_str::<EncryptionMode>("tls").unwrap(), EncryptionMode::StartTls);
        assert_eq!(ron::from_str::<EncryptionMode>("ssl").unwrap(), EncryptionMode::Implicit);
        assert_eq!(EncryptionMode::default(), EncryptionMode::StartTls);
    }

    #[test]
    fn partial_timeouts() {
        let timeouts: SmtpTimeouts = ron::from_str("(data_secs: 600)").unwrap();

        assert_eq!(timeouts.data_secs, 600);
        assert_eq!(timeouts.connect_secs, 30);
        assert_eq!(timeouts.quit_secs, 10);
    }
}
