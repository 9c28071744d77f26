//! `FiniteStateMachine` implementation for the ingestion protocol.
//!
//! Transitions are pure: they touch only the state value and the reply slot
//! in [`SessionState`]. Committing a finished body is left to the session.

use relayq_common::traits::fsm::FiniteStateMachine;

use crate::{session_state::SessionState, state::State};

impl FiniteStateMachine for State {
    /// One line of client input with its terminator removed
    type Input = String;

    type Context = SessionState;

    fn transition(self, input: Self::Input, context: &mut Self::Context) -> Self {
        self.transition_line(input, context)
    }
}
