//! Scripted SMTP server for delivery tests
//!
//! Replies are configurable per command; everything received is recorded so
//! tests can assert on the exact exchange.
#![allow(dead_code)] // Not every test uses every knob

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
    task::JoinHandle,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};

/// What the server saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    StartTls,
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Body lines as received, still dot-stuffed, joined with CRLF
    MessageContent(String),
    Quit,
    /// A TLS handshake completed; everything after arrived encrypted
    TlsEstablished,
    Other(String),
}

/// How the server offers encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tls {
    StartTls,
    Implicit,
}

/// What ended a plaintext exchange
enum Outcome {
    Closed,
    Upgrade,
}

/// Acceptor with a fresh self-signed certificate for `localhost`
fn self_signed_acceptor() -> std::io::Result<TlsAcceptor> {
    let key_pair = rcgen::KeyPair::generate().map_err(std::io::Error::other)?;
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .and_then(|params| params.self_signed(&key_pair))
        .map_err(std::io::Error::other)?;

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .map_err(std::io::Error::other)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    capabilities: Vec<String>,
    starttls: Reply,
    auth: Reply,
    mail_from: Reply,
    rcpt_to: Vec<(String, Reply)>,
    data: Reply,
    data_end: Reply,
    /// Stop answering once this many commands were read
    hang_after: Option<usize>,
    tls: Option<Tls>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.test ESMTP"),
            capabilities: vec!["mock.test".to_string(), "AUTH PLAIN".to_string()],
            starttls: Reply::new(454, "TLS not available"),
            auth: Reply::new(235, "Authentication successful"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Vec::new(),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "OK: queued"),
            hang_after: None,
            tls: None,
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<SmtpCommand>>>,
    task: JoinHandle<()>,
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.lock().await.clone()
    }

    /// Bodies of every completed DATA exchange
    pub async fn messages(&self) -> Vec<String> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    async fn handle_client(
        stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<Mutex<Vec<SmtpCommand>>>,
        acceptor: Option<TlsAcceptor>,
    ) -> std::io::Result<()> {
        if script.tls == Some(Tls::Implicit) {
            let acceptor = acceptor.ok_or_else(|| std::io::Error::other("no TLS acceptor"))?;
            let stream = acceptor.accept(stream).await?;
            commands.lock().await.push(SmtpCommand::TlsEstablished);

            let mut stream = BufReader::new(stream);
            stream.write_all(&script.greeting.to_bytes()).await?;
            Self::converse(&mut stream, &script, &commands).await?;
            return Ok(());
        }

        let mut stream = BufReader::new(stream);
        stream.write_all(&script.greeting.to_bytes()).await?;

        if let Outcome::Upgrade = Self::converse(&mut stream, &script, &commands).await? {
            let acceptor = acceptor.ok_or_else(|| std::io::Error::other("no TLS acceptor"))?;
            let stream = acceptor.accept(stream.into_inner()).await?;
            commands.lock().await.push(SmtpCommand::TlsEstablished);

            let mut stream = BufReader::new(stream);
            Self::converse(&mut stream, &script, &commands).await?;
        }

        Ok(())
    }

    /// Answer commands until the client leaves, or until a STARTTLS is
    /// accepted on a connection that is not yet encrypted.
    async fn converse<S>(
        stream: &mut BufReader<S>,
        script: &Script,
        commands: &Mutex<Vec<SmtpCommand>>,
    ) -> std::io::Result<Outcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut line = String::new();
        let mut count = 0;

        loop {
            line.clear();
            if stream.read_line(&mut line).await? == 0 {
                return Ok(Outcome::Closed);
            }

            count += 1;
            if script.hang_after.is_some_and(|limit| count > limit) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(Outcome::Closed);
            }

            let command_line = line.trim_end().to_string();
            let (verb, argument) = command_line
                .split_once(' ')
                .map_or((command_line.as_str(), ""), |(verb, arg)| (verb, arg));

            let (command, reply) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => {
                    let mut reply = String::new();
                    let last = script.capabilities.len() - 1;
                    for (i, capability) in script.capabilities.iter().enumerate() {
                        let separator = if i == last { ' ' } else { '-' };
                        reply.push_str(&format!("250{separator}{capability}\r\n"));
                    }
                    (SmtpCommand::Ehlo(argument.to_string()), reply.into_bytes())
                }
                "STARTTLS" => (SmtpCommand::StartTls, script.starttls.to_bytes()),
                "AUTH" => (SmtpCommand::Auth(argument.to_string()), script.auth.to_bytes()),
                "MAIL" => (
                    SmtpCommand::MailFrom(argument.to_string()),
                    script.mail_from.to_bytes(),
                ),
                "RCPT" => {
                    let reply = script
                        .rcpt_to
                        .iter()
                        .find(|(address, _)| argument.contains(address.as_str()))
                        .map_or_else(|| Reply::new(250, "OK"), |(_, reply)| reply.clone());
                    (SmtpCommand::RcptTo(argument.to_string()), reply.to_bytes())
                }
                "DATA" => (SmtpCommand::Data, script.data.to_bytes()),
                "QUIT" => {
                    commands.lock().await.push(SmtpCommand::Quit);
                    stream.write_all(b"221 Bye\r\n").await?;
                    stream.flush().await?;
                    return Ok(Outcome::Closed);
                }
                _ => (
                    SmtpCommand::Other(command_line.clone()),
                    b"500 Unknown command\r\n".to_vec(),
                ),
            };

            let collect_body = command == SmtpCommand::Data && script.data.code == 354;
            let upgrade = command == SmtpCommand::StartTls
                && script.tls == Some(Tls::StartTls)
                && script.starttls.code == 220;
            commands.lock().await.push(command);
            stream.write_all(&reply).await?;
            stream.flush().await?;

            if upgrade {
                return Ok(Outcome::Upgrade);
            }

            if collect_body {
                let mut body = Vec::new();
                loop {
                    line.clear();
                    if stream.read_line(&mut line).await? == 0 {
                        return Ok(Outcome::Closed);
                    }
                    let content = line.trim_end_matches(['\r', '\n']);
                    if content == "." {
                        break;
                    }
                    body.push(content.to_string());
                }

                commands
                    .lock()
                    .await
                    .push(SmtpCommand::MessageContent(body.join("\r\n")));
                stream.write_all(&script.data_end.to_bytes()).await?;
                stream.flush().await?;
            }
        }
    }
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.greeting = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.starttls = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.auth = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.mail_from = Reply::new(code, message);
        self
    }

    /// Reply to `RCPT TO` for an address containing `address`
    #[must_use]
    pub fn with_rcpt_to_response(
        mut self,
        address: impl Into<String>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        self.script
            .rcpt_to
            .push((address.into(), Reply::new(code, message)));
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.data_end = Reply::new(code, message);
        self
    }

    /// Accept `STARTTLS` and upgrade with a self-signed certificate
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.script.tls = Some(Tls::StartTls);
        self.script.starttls = Reply::new(220, "Ready to start TLS");
        self.script.capabilities.push("STARTTLS".to_string());
        self
    }

    /// Speak TLS from the first byte, with a self-signed certificate
    #[must_use]
    pub fn with_implicit_tls(mut self) -> Self {
        self.script.tls = Some(Tls::Implicit);
        self
    }

    /// Go silent after `count` commands
    #[must_use]
    pub const fn hang_after(mut self, count: usize) -> Self {
        self.script.hang_after = Some(count);
        self
    }

    /// Bind to a random local port and start serving
    ///
    /// # Errors
    /// If the port cannot be bound
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let acceptor = match self.script.tls {
            Some(_) => Some(self_signed_acceptor()?),
            None => None,
        };
        let script = Arc::new(self.script);
        let commands = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let commands = Arc::clone(&commands);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let script = Arc::clone(&script);
                    let commands = Arc::clone(&commands);
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        if let Err(err) =
                            MockSmtpServer::handle_client(stream, script, commands, acceptor).await
                        {
                            tracing::debug!("Mock server client error: {err}");
                        }
                    });
                }
            })
        };

        Ok(MockSmtpServer {
            addr,
            commands,
            task,
        })
    }
}
