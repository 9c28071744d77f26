use core::fmt::{self, Display, Formatter};

use crate::error::PathError;

#[derive(PartialEq, PartialOrd, Eq, Hash, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl HeloVariant {
    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Self::Ehlo(id) | Self::Helo(id) => id,
        }
    }
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
        })
    }
}

/// One line of client input outside of body collection.
///
/// `Mail` and `Rcpt` keep their raw argument: whether a malformed argument is
/// a syntax error or a sequencing error depends on the session state.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    Mail(String),
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
    Invalid(String),
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(v) => write!(fmt, "{v} {}", v.identity()),
            Self::Mail(args) => write!(fmt, "MAIL {args}"),
            Self::Rcpt(args) => write!(fmt, "RCPT {args}"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::Invalid(s) => fmt.write_str(s),
        }
    }
}

impl Command {
    /// The verb is everything up to the first space, matched case-insensitively.
    fn try_parse(command: &str) -> Result<Self, Self> {
        let trimmed = command.trim();
        let (verb, args) = trimmed
            .split_once(' ')
            .map_or((trimmed, ""), |(verb, args)| (verb, args.trim()));

        if verb.eq_ignore_ascii_case("EHLO") {
            Ok(Self::Helo(HeloVariant::Ehlo(args.to_string())))
        } else if verb.eq_ignore_ascii_case("HELO") {
            Ok(Self::Helo(HeloVariant::Helo(args.to_string())))
        } else if verb.eq_ignore_ascii_case("MAIL") {
            Ok(Self::Mail(args.to_string()))
        } else if verb.eq_ignore_ascii_case("RCPT") {
            Ok(Self::Rcpt(args.to_string()))
        } else if verb.eq_ignore_ascii_case("DATA") {
            Ok(Self::Data)
        } else if verb.eq_ignore_ascii_case("RSET") {
            Ok(Self::Rset)
        } else if verb.eq_ignore_ascii_case("NOOP") {
            Ok(Self::Noop)
        } else if verb.eq_ignore_ascii_case("QUIT") {
            Ok(Self::Quit)
        } else {
            Err(Self::Invalid(command.to_owned()))
        }
    }
}

impl From<&str> for Command {
    fn from(command: &str) -> Self {
        Self::try_parse(command).unwrap_or_else(|invalid| invalid)
    }
}

/// Extract the address from a `FROM:<addr>` or `TO:<addr>` argument.
///
/// The keyword is matched case-insensitively. Surrounding angle brackets are
/// removed and the address is lower-cased. Anything after the first
/// whitespace following the address (ESMTP parameters) is ignored.
pub fn parse_path(keyword: &'static str, argument: &str) -> Result<String, PathError> {
    let rest = argument
        .get(..keyword.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(keyword))
        .map(|_| &argument[keyword.len()..])
        .ok_or(PathError::MissingKeyword(keyword))?;

    let address = rest
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c| c == '<' || c == '>');

    if address.is_empty() {
        return Err(PathError::EmptyAddress);
    }

    Ok(address.to_lowercase())
}
