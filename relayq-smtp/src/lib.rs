//! SMTP for the relay: the ingestion server that accepts submissions into
//! the queue, and the client used to hand them on upstream.

pub mod client;
pub mod command;
pub mod error;
pub mod fsm;
pub mod listener;
pub mod session;
pub mod session_state;
pub mod state;
pub mod transaction_handler;

pub use listener::Listener;
pub use session::{Session, SessionConfig, SessionTimeouts};
pub use transaction_handler::{SpoolTransactionHandler, TransactionHandler};
