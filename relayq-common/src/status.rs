use core::fmt::{self, Display, Formatter};

/// Reply codes used on the submission protocol.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    ServiceReady,
    GoodBye,
    AuthSucceeded,
    Ok,
    StartMailInput,
    Unavailable,
    ActionUnavailable,
    Unrecognised,
    SyntaxError,
    InvalidCommandSequence,
    TransactionFailed,
    Unknown(u32),
}

impl Status {
    /// Checks if the status is a permanent rejection
    #[must_use]
    pub fn is_permanent(self) -> bool {
        u32::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    #[must_use]
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u32::from(self))
    }

    /// Checks if the status is a positive completion or intermediate reply
    #[must_use]
    pub fn is_success(self) -> bool {
        (200..400).contains(&u32::from(self))
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            220 => Self::ServiceReady,
            221 => Self::GoodBye,
            235 => Self::AuthSucceeded,
            250 => Self::Ok,
            354 => Self::StartMailInput,
            421 => Self::Unavailable,
            451 => Self::ActionUnavailable,
            500 => Self::Unrecognised,
            501 => Self::SyntaxError,
            503 => Self::InvalidCommandSequence,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::AuthSucceeded => 235,
            Status::Ok => 250,
            Status::StartMailInput => 354,
            Status::Unavailable => 421,
            Status::ActionUnavailable => 451,
            Status::Unrecognised => 500,
            Status::SyntaxError => 501,
            Status::InvalidCommandSequence => 503,
            Status::TransactionFailed => 554,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::Status;

    #[test]
    fn status() {
        assert!(Status::TransactionFailed.is_permanent());
        assert!(!Status::TransactionFailed.is_temporary());

        assert!(Status::Unavailable.is_temporary());
        assert!(!Status::Unavailable.is_permanent());

        assert!(Status::StartMailInput.is_success());
        assert!(!Status::SyntaxError.is_success());

        assert_eq!(Status::from(503), Status::InvalidCommandSequence);
        assert_eq!(u32::from(Status::InvalidCommandSequence), 503);
        assert_eq!(Status::from(252), Status::Unknown(252));
        assert_eq!(Status::Ok.to_string(), "250");
    }
}
