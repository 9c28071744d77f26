use core::fmt::{self, Display, Formatter};

use relayq_common::status::Status;

use crate::{
    command::{Command, parse_path},
    session_state::SessionState,
};

const BAD_SEQUENCE: &str = "Bad sequence of commands";

/// Sender and recipients of the transaction in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    /// Never empty: an envelope only exists once a recipient was accepted
    pub recipients: Vec<String>,
}

/// Client connected, not yet identified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect;

/// After a successful HELO/EHLO, or a completed / reset transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeted {
    pub id: String,
}

/// After MAIL FROM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderSet {
    pub id: String,
    pub sender: String,
}

/// After at least one RCPT TO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientSet {
    pub id: String,
    pub envelope: Envelope,
}

/// After DATA, accumulating body lines until the lone dot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectingBody {
    pub id: String,
    pub envelope: Envelope,
    pub lines: Vec<String>,
}

/// Body terminated, waiting for the transaction to be committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDot {
    pub id: String,
    pub envelope: Envelope,
    pub lines: Vec<String>,
}

/// Client quit; the connection is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Connect(Connect),
    Greeted(Greeted),
    SenderSet(SenderSet),
    RecipientSet(RecipientSet),
    CollectingBody(CollectingBody),
    PostDot(PostDot),
    Closed(Closed),
}

impl Default for State {
    fn default() -> Self {
        Self::Connect(Connect)
    }
}

impl Display for State {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Connect(_) => "Connect",
            Self::Greeted(_) => "Greeted",
            Self::SenderSet(_) => "SenderSet",
            Self::RecipientSet(_) => "RecipientSet",
            Self::CollectingBody(_) => "CollectingBody",
            Self::PostDot(_) => "PostDot",
            Self::Closed(_) => "Closed",
        })
    }
}

impl State {
    /// Feed one line of client input, without its terminator.
    ///
    /// While collecting a body the line is content; otherwise it is a command.
    #[must_use]
    pub fn transition_line(self, line: String, ctx: &mut SessionState) -> Self {
        match self {
            Self::CollectingBody(body) => Self::body_line(body, line),
            state => state.transition_protocol(Command::from(line.as_str()), ctx),
        }
    }

    fn body_line(mut body: CollectingBody, line: String) -> Self {
        if line == "." {
            return Self::PostDot(PostDot {
                id: body.id,
                envelope: body.envelope,
                lines: body.lines,
            });
        }

        body.lines.push(match line.strip_prefix('.') {
            Some(unstuffed) => unstuffed.to_string(),
            None => line,
        });
        Self::CollectingBody(body)
    }

    /// Apply a command. Sequencing is checked before argument syntax, so a
    /// malformed `RCPT` with no sender is a sequencing error.
    #[must_use]
    pub fn transition_protocol(self, command: Command, ctx: &mut SessionState) -> Self {
        match (self, command) {
            // Terminal and transient states ignore input
            (state @ (Self::Closed(_) | Self::PostDot(_) | Self::CollectingBody(_)), _) => state,

            (_, Command::Quit) => {
                ctx.reply(Status::GoodBye, "Bye");
                Self::Closed(Closed)
            }

            (state, Command::Helo(helo)) => {
                let id = helo.identity();
                if id.is_empty() {
                    ctx.reply(Status::SyntaxError, format!("Syntax error: expected {helo} <hostname>"));
                    return state;
                }

                ctx.reply(Status::Ok, format!("{} says hello to {id}", ctx.banner));
                Self::Greeted(Greeted { id: id.to_string() })
            }

            (state @ Self::Connect(_), Command::Mail(_)) => {
                ctx.reply(Status::InvalidCommandSequence, BAD_SEQUENCE);
                state
            }

            (
                state @ (Self::Greeted(_) | Self::SenderSet(_) | Self::RecipientSet(_)),
                Command::Mail(args),
            ) => match parse_path("FROM:", &args) {
                Ok(sender) => {
                    ctx.reply(Status::Ok, "Ok");
                    Self::SenderSet(SenderSet {
                        id: state.into_id(),
                        sender,
                    })
                }
                Err(err) => {
                    ctx.reply(Status::SyntaxError, format!("Syntax error: {err}"));
                    state
                }
            },

            (state @ (Self::Connect(_) | Self::Greeted(_)), Command::Rcpt(_)) => {
                ctx.reply(Status::InvalidCommandSequence, BAD_SEQUENCE);
                state
            }

            (state @ (Self::SenderSet(_) | Self::RecipientSet(_)), Command::Rcpt(args)) => {
                match parse_path("TO:", &args) {
                    Ok(recipient) => {
                        ctx.reply(Status::Ok, "Ok");
                        match state {
                            Self::SenderSet(SenderSet { id, sender }) => {
                                Self::RecipientSet(RecipientSet {
                                    id,
                                    envelope: Envelope {
                                        sender,
                                        recipients: vec![recipient],
                                    },
                                })
                            }
                            Self::RecipientSet(mut rcpt) => {
                                rcpt.envelope.recipients.push(recipient);
                                Self::RecipientSet(rcpt)
                            }
                            other => other,
                        }
                    }
                    Err(err) => {
                        ctx.reply(Status::SyntaxError, format!("Syntax error: {err}"));
                        state
                    }
                }
            }

            (Self::RecipientSet(RecipientSet { id, envelope }), Command::Data) => {
                ctx.reply(
                    Status::StartMailInput,
                    "Start mail input; end with <CRLF>.<CRLF>",
                );
                Self::CollectingBody(CollectingBody {
                    id,
                    envelope,
                    lines: Vec::new(),
                })
            }

            (state, Command::Data) => {
                ctx.reply(Status::InvalidCommandSequence, BAD_SEQUENCE);
                state
            }

            (state, Command::Rset) => {
                ctx.reply(Status::Ok, "Ok");
                state.reset()
            }

            (state, Command::Noop) => {
                ctx.reply(Status::Ok, "Ok");
                state
            }

            (state, Command::Invalid(_)) => {
                ctx.reply(Status::Unrecognised, "Command unrecognized");
                state
            }
        }
    }

    /// Drop any transaction, keeping the client's identity.
    ///
    /// A client that never greeted stays in `Connect`.
    #[must_use]
    pub fn reset(self) -> Self {
        match self {
            Self::Connect(_) => Self::Connect(Connect),
            Self::Closed(_) => Self::Closed(Closed),
            state => Self::Greeted(Greeted {
                id: state.into_id(),
            }),
        }
    }

    fn into_id(self) -> String {
        match self {
            Self::Greeted(Greeted { id })
            | Self::SenderSet(SenderSet { id, .. })
            | Self::RecipientSet(RecipientSet { id, .. })
            | Self::CollectingBody(CollectingBody { id, .. })
            | Self::PostDot(PostDot { id, .. }) => id,
            Self::Connect(_) | Self::Closed(_) => String::new(),
        }
    }

    /// The accepted envelope, once at least one recipient exists
    #[must_use]
    pub const fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::RecipientSet(RecipientSet { envelope, .. })
            | Self::CollectingBody(CollectingBody { envelope, .. })
            | Self::PostDot(PostDot { envelope, .. }) => Some(envelope),
            _ => None,
        }
    }

    /// Check if this state should close the connection
    #[must_use]
    pub const fn should_close(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    #[must_use]
    pub const fn is_collecting(&self) -> bool {
        matches!(self, Self::CollectingBody(_))
    }
}
