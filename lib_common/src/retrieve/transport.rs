//! # Stream Transport
//!
//! `HttpTransport` wraps a `reqwest::Client` built once from an explicit
//! `TransportPolicy`: no redirects, no proxy, no automatic decompression, no
//! cookie store and a bounded connect timeout. There is no overall request
//! timeout because the response body is a stream that stays open
//! indefinitely.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::redirect::Policy;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::configs::ReceiverOptions;
use crate::error::TransportError;

/// The response body of an open controller stream.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Opens the controller stream.
///
/// Implementations must return as soon as the response headers are in and
/// hand back the body unread, so that decoding can start immediately.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        endpoint: &Url,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError>;
}

/// Client construction policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPolicy {
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self::from_options(&ReceiverOptions::default())
    }
}

impl TransportPolicy {
    pub fn from_options(options: &ReceiverOptions) -> Self {
        Self {
            connect_timeout: Duration::from_secs(options.connect_timeout_secs),
            user_agent: options.user_agent.clone(),
        }
    }
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(policy: &TransportPolicy) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/x-ndjson, application/json"),
        );

        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .no_proxy()
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .connect_timeout(policy.connect_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(policy.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(TransportError::Build)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(
        &self,
        endpoint: &Url,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let request = self.client.get(endpoint.clone());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = request.send() => result.map_err(TransportError::Connect)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        tracing::debug!(%status, endpoint = %endpoint, "controller stream opened");

        let body = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_follows_options() {
        let options = ReceiverOptions {
            connect_timeout_secs: 7,
            user_agent: "receiver-test/1".into(),
            ..Default::default()
        };
        let policy = TransportPolicy::from_options(&options);
        assert_eq!(policy.connect_timeout, Duration::from_secs(7));
        assert_eq!(policy.user_agent, "receiver-test/1");
        assert!(HttpTransport::new(&policy).is_ok());
    }

    #[tokio::test]
    async fn cancelled_before_connect() {
        let transport = HttpTransport::new(&TransportPolicy::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // 192.0.2.0/24 is TEST-NET-1; the select must not even wait on it.
        let url = Url::parse("http://192.0.2.1:9/stream").unwrap();
        let result = transport.open(&url, &cancel).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
