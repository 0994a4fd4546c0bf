//! # lib_common
//!
//! Shared library for the controller stream receiver. The receiver keeps a
//! long-lived HTTP connection to a routing controller, decodes the
//! newline-delimited JSON events it streams, applies `Update` events to a
//! local configuration sink and reconnects under a rate gate that backs off
//! harder while the controller stays unreachable.
//!
//! Modules are gated by Cargo features so that binaries only pull in what
//! they use:
//!
//! - **`configs`**: `ReceiverOptions`, validation and JSON file loading.
//! - **`loggers`**: `tracing` subscriber setup (console + rolling JSON file).
//! - **`receiver`**: transport, protocol decoding, dispatch, rate gate,
//!   default config store, receiver loop and background hosting.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;

#[cfg(feature = "receiver")]
pub mod core;
#[cfg(feature = "receiver")]
pub mod error;
#[cfg(feature = "receiver")]
pub mod hosting;
#[cfg(feature = "receiver")]
pub mod ingestors;
#[cfg(feature = "receiver")]
pub mod protocol;
#[cfg(feature = "receiver")]
pub mod retrieve;

// Re-export the types a host process needs to wire a receiver.
#[cfg(feature = "configs")]
pub use configs::{ConfigError, ReceiverOptions};
#[cfg(feature = "receiver")]
pub use crate::core::{ConfigSink, InMemoryConfigStore, RateGate, RateGatePolicy};
#[cfg(feature = "receiver")]
pub use error::{DecodeError, ReceiverError, SinkError, TransportError};
#[cfg(feature = "receiver")]
pub use hosting::{BackgroundHost, BackgroundService};
#[cfg(feature = "receiver")]
pub use ingestors::{ConnectionOutcome, ControllerReceiver, ReceiverConfig};
#[cfg(feature = "receiver")]
pub use retrieve::{HttpTransport, Transport, TransportPolicy};
