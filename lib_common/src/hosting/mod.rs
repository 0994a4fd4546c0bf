//! # Hosting Module
//!
//! The start/stop contract between a host process and its long-running
//! services. Services only see a `CancellationToken`, so they can be driven
//! directly from tests without a host.

#![forbid(unsafe_code)]

/// `BackgroundService` trait and the `BackgroundHost` supervisor.
pub mod background;

pub use background::{BackgroundHost, BackgroundService, HostError};
