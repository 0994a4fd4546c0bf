//! # Ingestors Module
//!
//! Clients that pull state from an upstream source and keep it flowing into
//! the local process for as long as the process lives.
//!
//! ## Contained Modules:
//! - **`controller_stream`**: the reconnecting receiver for the routing
//!   controller's line-delimited JSON stream. It paces reconnects through a
//!   `RateGate`, decodes one message per line and hands `Update` payloads to a
//!   `ConfigSink` in stream order.

#![forbid(unsafe_code)]

/// Reconnecting receiver for the controller's update stream.
pub mod controller_stream;

pub use controller_stream::{
    ConnectionCycle, ConnectionOutcome, ControllerReceiver, CycleSummary, ReceiverConfig,
    ReceiverState, ReceiverStats, StreamEnd,
};
