//! # Data Retrieval Module
//!
//! HTTP plumbing for the receiver. The `transport` module opens the
//! controller stream and hands back its body as an incremental byte reader;
//! everything protocol-specific happens elsewhere.
//!
//! No retries happen at this layer. A failed open is reported to the caller,
//! and the receiver loop decides when to try again.

#![forbid(unsafe_code)]

/// Stream transport trait and its `reqwest` implementation.
pub mod transport;

pub use transport::{ByteStream, HttpTransport, Transport, TransportPolicy};
