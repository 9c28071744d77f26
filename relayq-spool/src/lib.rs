pub mod backends;
pub mod config;
pub mod error;
pub mod message;
pub mod r#trait;
pub mod types;

pub use backends::{FileBackingStore, MemoryBackingStore, TestBackingStore};
pub use config::SpoolConfig;
pub use error::{Result, SerializationError, SpoolError, ValidationError};
pub use message::{NewMessage, QueuedMessage};
pub use r#trait::BackingStore;
pub use types::MessageId;
