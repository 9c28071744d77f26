use core::fmt::{self, Display, Formatter};

use super::error::{ClientError, Result};

/// One line of a reply: `250-first`, or `250 last`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// A space after the code marks the final line, a dash a continuation
    pub is_last: bool,
    pub message: String,
}

/// A complete reply, possibly spanning several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.is_temporary_error() || self.is_permanent_error()
    }

    /// Turn an error reply into `ClientError::SmtpError`.
    ///
    /// # Errors
    /// When the reply is a 4xx or 5xx.
    pub fn into_result(self) -> Result<Self> {
        if self.is_error() {
            Err(ClientError::SmtpError {
                code: self.code,
                message: self.message(),
            })
        } else {
            Ok(self)
        }
    }

    /// Require exactly `code`; other errors keep their class, anything else
    /// is `UnexpectedResponse`.
    ///
    /// # Errors
    /// When the reply code differs from `code`.
    pub fn expect_code(self, code: u16) -> Result<Self> {
        if self.code == code {
            return Ok(self);
        }

        let response = self.into_result()?;
        Err(ClientError::UnexpectedResponse {
            code: response.code,
            message: response.message(),
        })
    }

    /// Parse one reply line, without its terminator.
    ///
    /// # Errors
    /// `ClientError::ParseError` if the line does not start with a 3-digit code.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| ClientError::ParseError(format!("Invalid status code: '{line}'")))?
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{line}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(*c)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parse a complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when
    /// more data is needed.
    ///
    /// # Errors
    /// `ClientError::ParseError` on a malformed line or mixed codes.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(std::str::from_utf8(raw)?)?;

            match code {
                Some(code) if code != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(Some((Self::new(line.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

impl Display for Response {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} {}", self.code, self.lines.join(" "))
    }
}
