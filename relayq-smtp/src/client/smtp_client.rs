use std::sync::Arc;

use base64::Engine;
use relayq_common::{incoming, internal, outgoing, tracing};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

const READ_CHUNK: usize = 4096;

/// Replies larger than this are treated as a protocol violation.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        match self {
            Self::Plain(stream) => Ok(Self::Tls(Box::new(
                handshake(stream, domain, accept_invalid_certs).await?,
            ))),
            Self::Tls(_) => Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            )),
        }
    }
}

fn connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        roots
            .add(cert)
            .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
    }
    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Some certificates could not be loaded");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn handshake(
    stream: TcpStream,
    domain: &str,
    accept_invalid_certs: bool,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(domain.to_string())
        .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

    connector(accept_invalid_certs)?
        .connect(server_name, stream)
        .await
        .map_err(|e| ClientError::TlsError(e.to_string()))
}

/// Accepts any certificate. Only installed when `accept_invalid_certs` is set.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// One connection to a remote SMTP server.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    server_domain: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    /// Open a plain TCP connection. The greeting is not read.
    ///
    /// # Errors
    /// If the connection cannot be established.
    pub async fn connect(addr: &str, server_domain: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: Vec::with_capacity(READ_CHUNK),
            server_domain: server_domain.into(),
            accept_invalid_certs: false,
        })
    }

    /// Open a connection that is TLS from the first byte (port 465 style).
    ///
    /// # Errors
    /// If the connection or the TLS handshake fails.
    pub async fn connect_tls(
        addr: &str,
        server_domain: impl Into<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let server_domain = server_domain.into();
        let stream = TcpStream::connect(addr).await?;
        let stream = handshake(stream, &server_domain, accept_invalid_certs).await?;

        Ok(Self {
            connection: Some(ClientConnection::Tls(Box::new(stream))),
            buffer: Vec::with_capacity(READ_CHUNK),
            server_domain,
            accept_invalid_certs,
        })
    }

    /// Skip certificate verification on a later STARTTLS.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// # Errors
    /// If reading fails or the greeting is not a 220.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await?.expect_code(220)
    }

    /// # Errors
    /// If the connection is gone or the write fails.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        outgoing!("{command}");
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(format!("{command}\r\n").as_bytes())
            .await
    }

    /// Send a command and read its reply, whatever the code.
    ///
    /// # Errors
    /// If sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// # Errors
    /// On I/O failure or an error reply.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await?.into_result()
    }

    /// Upgrade the connection after a 220 reply to STARTTLS.
    ///
    /// # Errors
    /// On a refusal, or when the handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?.expect_code(220)?;

        let connection = self
            .connection
            .take()
            .ok_or(ClientError::ConnectionClosed)?;
        self.connection = Some(
            connection
                .upgrade_to_tls(&self.server_domain, self.accept_invalid_certs)
                .await?,
        );
        // Anything buffered before the handshake must not be trusted
        self.buffer.clear();

        Ok(response)
    }

    /// `AUTH PLAIN` with an initial response. Requires a 235.
    ///
    /// # Errors
    /// On I/O failure or when the credentials are refused.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("\0{username}\0{password}"));

        // Keep the credentials out of the traffic log
        internal!("AUTH PLAIN <redacted>");
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(format!("AUTH PLAIN {token}\r\n").as_bytes())
            .await?;

        self.read_response().await?.expect_code(235)
    }

    /// # Errors
    /// On I/O failure or an error reply.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>"))
            .await?
            .into_result()
    }

    /// # Errors
    /// On I/O failure or an error reply.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await?.into_result()
    }

    /// # Errors
    /// On I/O failure or anything but a 354.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await?.expect_code(354)
    }

    /// Send the message body and the terminating dot.
    ///
    /// Line endings are normalised to CRLF and lines starting with a dot are
    /// escaped by doubling it.
    ///
    /// # Errors
    /// On I/O failure or an error reply.
    pub async fn send_data(&mut self, content: &str) -> Result<Response> {
        let payload = encode_data(content);

        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(payload.as_bytes())
            .await?;
        outgoing!(level = DEBUG, "<{} bytes of message data>", payload.len());

        self.read_response().await?.into_result()
    }

    /// # Errors
    /// If sending or reading fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Read one complete, possibly multi-line, reply.
    ///
    /// # Errors
    /// If reading fails or the reply is malformed.
    pub async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse_response(&self.buffer)? {
                self.buffer.drain(..consumed);
                incoming!("{response}");
                return Ok(response);
            }

            if self.buffer.len() >= MAX_BUFFER_SIZE {
                return Err(ClientError::ParseError(format!(
                    "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                )));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?
                .read(&mut chunk)
                .await?;
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Dot-stuff `content` and append the end-of-data marker.
///
/// Every line of `content` is sent, so a trailing line break yields a
/// trailing blank line.
fn encode_data(content: &str) -> String {
    let mut payload = String::with_capacity(content.len() + 16);
    for line in content.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            payload.push('.');
        }
        payload.push_str(line);
        payload.push_str("\r\n");
    }
    payload.push_str(".\r\n");

    payload
}
