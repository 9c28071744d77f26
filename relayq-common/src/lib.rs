pub mod error;
pub mod logging;
pub mod status;
pub mod traits;

pub use tracing;

/// Lifecycle notifications broadcast from the controller to every long-running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
