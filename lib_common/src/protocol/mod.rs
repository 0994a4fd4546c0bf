//! # Controller Protocol
//!
//! The controller streams one JSON object per line. A blank line is an
//! orderly end-of-stream marker, distinct from the connection closing.
//!
//! - **`message`**: the typed event model (`Message`, `MessageKind`, route
//!   and cluster descriptors).
//! - **`decoder`**: incremental line reader turning a byte stream into
//!   `Frame`s.

/// Typed protocol events.
pub mod message;
/// Incremental newline-delimited JSON decoder.
pub mod decoder;

pub use decoder::{Frame, LineDecoder};
pub use message::{
    ClusterDescriptor, DestinationDescriptor, Message, MessageKind, RouteDescriptor, RouteMatch,
};
