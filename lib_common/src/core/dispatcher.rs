//! # Message Dispatcher
//!
//! Routes decoded messages by kind. Only `Update` touches the downstream
//! sink. The call is awaited before the next message is read, so updates
//! reach the sink one at a time and in stream order. `Heartbeat` and
//! `Remove` are acknowledged without a sink call, and unrecognized kinds are
//! logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ReceiverError, SinkError};
use crate::protocol::message::{ClusterDescriptor, Message, MessageKind, RouteDescriptor};

/// The downstream store that applies accepted updates to live routing state.
#[async_trait]
pub trait ConfigSink: Send + Sync {
    async fn update(
        &self,
        routes: Vec<RouteDescriptor>,
        cluster: ClusterDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError>;
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// An `Update` was applied by the sink.
    Applied,
    /// A known kind that needs no action.
    Ignored(MessageKind),
    /// An unrecognized kind, dropped.
    Dropped(String),
}

pub struct MessageDispatcher {
    sink: Arc<dyn ConfigSink>,
    verbose: bool,
}

impl MessageDispatcher {
    pub fn new(sink: Arc<dyn ConfigSink>) -> Self {
        Self {
            sink,
            verbose: false,
        }
    }

    /// Logs every message kind and key at info level when enabled.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub async fn dispatch(
        &self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<Dispatched, ReceiverError> {
        if self.verbose {
            tracing::info!(kind = %message.kind, key = %message.key, "received message");
        } else {
            tracing::debug!(kind = %message.kind, key = %message.key, "received message");
        }

        match message.kind {
            MessageKind::Update => {
                let Message {
                    key,
                    routes,
                    cluster,
                    ..
                } = message;
                let route_count = routes.len();
                match self.sink.update(routes, cluster, cancel).await {
                    Ok(()) => {
                        tracing::debug!(key = %key, routes = route_count, "update applied");
                        Ok(Dispatched::Applied)
                    }
                    Err(SinkError::Cancelled) if cancel.is_cancelled() => {
                        Err(ReceiverError::Cancelled)
                    }
                    Err(source) => Err(ReceiverError::Sink { key, source }),
                }
            }
            MessageKind::Heartbeat | MessageKind::Remove => {
                tracing::debug!(kind = %message.kind, key = %message.key, "no action for message kind");
                Ok(Dispatched::Ignored(message.kind))
            }
            MessageKind::Unrecognized(raw) => {
                tracing::warn!(kind = %raw, key = %message.key, "dropping message of unrecognized kind");
                Ok(Dispatched::Dropped(raw))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records every call and can be told to fail.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) calls: Mutex<Vec<(Vec<RouteDescriptor>, ClusterDescriptor)>>,
        pub(crate) fail_with: Mutex<Option<String>>,
    }

    impl RecordingSink {
        pub(crate) fn keys(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, cluster)| cluster.cluster_id.clone().unwrap_or_default())
                .collect()
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ConfigSink for RecordingSink {
        async fn update(
            &self,
            routes: Vec<RouteDescriptor>,
            cluster: ClusterDescriptor,
            _cancel: &CancellationToken,
        ) -> Result<(), SinkError> {
            if let Some(reason) = self.fail_with.lock().unwrap().clone() {
                return Err(SinkError::Rejected(reason));
            }
            self.calls.lock().unwrap().push((routes, cluster));
            Ok(())
        }
    }

    fn message(json: &str) -> Message {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn update_reaches_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = MessageDispatcher::new(sink.clone());
        let cancel = CancellationToken::new();

        let outcome = dispatcher
            .dispatch(
                message(r#"{"messageType":"Update","key":"a","routes":[{"routeId":"r1"}],"cluster":{"clusterId":"c1"}}"#),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(outcome, Dispatched::Applied);
        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0[0].route_id, "r1");
        assert_eq!(calls[0].1.cluster_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn non_update_kinds_skip_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = MessageDispatcher::new(sink.clone()).verbose(true);
        let cancel = CancellationToken::new();

        let heartbeat = dispatcher
            .dispatch(message(r#"{"messageType":"Heartbeat"}"#), &cancel)
            .await
            .unwrap();
        let remove = dispatcher
            .dispatch(message(r#"{"messageType":"Remove","key":"gone"}"#), &cancel)
            .await
            .unwrap();
        let unknown = dispatcher
            .dispatch(message(r#"{"messageType":"Resync","key":"x"}"#), &cancel)
            .await
            .unwrap();

        assert_eq!(heartbeat, Dispatched::Ignored(MessageKind::Heartbeat));
        assert_eq!(remove, Dispatched::Ignored(MessageKind::Remove));
        assert_eq!(unknown, Dispatched::Dropped("Resync".into()));
        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test]
    async fn sink_failure_carries_the_key() {
        let sink = Arc::new(RecordingSink::default());
        *sink.fail_with.lock().unwrap() = Some("invalid route".into());
        let dispatcher = MessageDispatcher::new(sink);

        let err = dispatcher
            .dispatch(
                message(r#"{"messageType":"Update","key":"ns/ingress"}"#),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            ReceiverError::Sink { key, source } => {
                assert_eq!(key, "ns/ingress");
                assert!(matches!(source, SinkError::Rejected(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
