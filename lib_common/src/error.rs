//! # Receiver Error Taxonomy
//!
//! Every failure a connection cycle can run into is one of these typed
//! errors. Decoder and dispatcher propagate them with `?`; the connection
//! cycle is the single place where they are turned into an outcome for the
//! rate gate.

use thiserror::Error;

/// The connection to the controller could not be opened or was interrupted.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client could not be constructed from the transport policy.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// The request never produced a response (DNS, connect, TLS, timeout).
    #[error("failed to connect to controller: {0}")]
    Connect(#[source] reqwest::Error),

    /// The controller answered with a non-success status.
    #[error("controller responded with status {0}")]
    Status(reqwest::StatusCode),

    /// Reading the response body failed mid-stream.
    #[error("stream read failed: {0}")]
    Read(#[source] std::io::Error),

    /// The caller's cancellation token fired while connecting.
    #[error("connect cancelled")]
    Cancelled,
}

/// A line from the controller was not a valid protocol message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("line {line} is not valid UTF-8")]
    InvalidUtf8 { line: u64 },

    #[error("line {line} exceeds {limit} bytes")]
    LineTooLong { line: u64, limit: usize },

    #[error("line {line} is not a valid message: {source}")]
    Json {
        line: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// The downstream configuration sink refused or failed to apply an update.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("update rejected: {0}")]
    Rejected(String),

    #[error("update cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Anything that ends a connection cycle early.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error(transparent)]
    Transport(TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("sink failed to apply update for '{key}': {source}")]
    Sink {
        key: String,
        #[source]
        source: SinkError,
    },

    /// Shutdown was requested; never counted as a failure.
    #[error("receiver cancelled")]
    Cancelled,
}

impl From<TransportError> for ReceiverError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => ReceiverError::Cancelled,
            other => ReceiverError::Transport(other),
        }
    }
}

/// Returned by the rate gate when cancellation interrupts `acquire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("permit wait cancelled")]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_cancel_maps_to_receiver_cancel() {
        let err: ReceiverError = TransportError::Cancelled.into();
        assert!(matches!(err, ReceiverError::Cancelled));

        let err: ReceiverError = TransportError::Status(reqwest::StatusCode::BAD_GATEWAY).into();
        assert!(matches!(err, ReceiverError::Transport(TransportError::Status(_))));
        assert_eq!(err.to_string(), "controller responded with status 502 Bad Gateway");
    }

    #[test]
    fn sink_error_names_the_key() {
        let err = ReceiverError::Sink {
            key: "default/ingress".to_string(),
            source: SinkError::Rejected("duplicate routeId 'r1'".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "sink failed to apply update for 'default/ingress': update rejected: duplicate routeId 'r1'"
        );
    }
}
