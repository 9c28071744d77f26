//! Draining the queue: the dispatch worker, the eviction sweep, and the
//! transport that hands each message to the upstream relay.

pub mod compose;
pub mod error;
pub mod processor;
pub mod smtp_transaction;
pub mod transport;
pub mod types;
pub mod upstream;

pub use error::{DeliveryError, PermanentError, SystemError, TemporaryError};
pub use processor::{DispatchSummary, DispatchWorker};
pub use transport::{SmtpTransport, Transport};
pub use types::{EncryptionMode, SmtpTimeouts};
pub use upstream::Upstream;
