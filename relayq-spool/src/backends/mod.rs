//! Backing store implementations
//!
//! - `memory`: in-process map, lost on restart
//! - `file`: one directory, two files per message
//! - `test`: memory store with hooks for tests

pub mod file;
pub mod memory;

pub use file::{FileBackingStore, FileBackingStoreBuilder};
pub use memory::MemoryBackingStore;
pub use test::TestBackingStore;
