pub mod config;
pub mod controller;

pub use controller::{Relay, SHUTDOWN_BROADCAST};
