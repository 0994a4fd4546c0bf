//! # Configuration Modules
//!
//! This module aggregates the configuration providers used by the receiver.

/// Receiver options: controller endpoint, reconnect pacing and transport policy.
pub mod config_receiver;

pub use config_receiver::{ConfigError, ReceiverOptions};
