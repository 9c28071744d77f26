//! Protocol context threaded through the FSM.

use std::{borrow::Cow, sync::Arc};

use relayq_common::status::Status;

/// What the FSM needs besides the state itself: the server's name for
/// replies, and the slot where a transition leaves its reply.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub banner: Arc<str>,
    pub response: Option<(Status, Cow<'static, str>)>,
}

impl SessionState {
    #[must_use]
    pub fn new(banner: impl Into<Arc<str>>) -> Self {
        Self {
            banner: banner.into(),
            response: None,
        }
    }

    pub(crate) fn reply(&mut self, status: Status, message: impl Into<Cow<'static, str>>) {
        self.response = Some((status, message.into()));
    }

    /// Take the pending reply formatted as a protocol line, without terminator.
    pub fn take_reply(&mut self) -> Option<String> {
        self.response
            .take()
            .map(|(status, message)| format!("{status} {message}"))
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new("localhost")
    }
}
