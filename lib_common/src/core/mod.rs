//! # Core Engine Module
//!
//! The building blocks the receiver loop is assembled from. Each of them is
//! owned by a single receiver and used from one flow of control.
//!
//! ## Core Components:
//!
//! - **`rate_gate`**: single-permit token bucket that paces reconnects and
//!   slows down after repeated consecutive failures.
//!
//! - **`dispatcher`**: routes decoded messages by kind and forwards `Update`
//!   payloads, in order, to the downstream `ConfigSink`.
//!
//! - **`config_store`**: the default `ConfigSink`, an in-memory routing
//!   snapshot published through a `watch` channel.

#![forbid(unsafe_code)]

/// Reconnect pacing with failure escalation.
pub mod rate_gate;
/// Kind-based message routing to the configuration sink.
pub mod dispatcher;
/// In-memory routing snapshot store.
pub mod config_store;

// --- Public API Re-exports ---
pub use config_store::{ConfigSnapshot, InMemoryConfigStore};
pub use dispatcher::{ConfigSink, Dispatched, MessageDispatcher};
pub use rate_gate::{GateSignal, Permit, RateGate, RateGatePolicy};
