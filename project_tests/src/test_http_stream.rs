//! # Controller Stream Integration Tests
//!
//! Runs the real `HttpTransport` and `ControllerReceiver` against an
//! in-process `axum` controller that streams newline-delimited JSON over a
//! chunked HTTP response.

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header::ACCEPT};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use url::Url;

use lib_common::core::MessageDispatcher;
use lib_common::ingestors::{ConnectionCycle, ReceiverState};
use lib_common::{
    ConnectionOutcome, ControllerReceiver, HttpTransport, InMemoryConfigStore, ReceiverConfig,
    ReceiverOptions, Transport, TransportError, TransportPolicy,
};

const FIRST: &str = r#"{"messageType":"Update","key":"edge/first","routes":[{"routeId":"r1","clusterId":"first","match":{"path":"/a/{**rest}"}}],"cluster":{"clusterId":"first","destinations":{"d1":{"address":"http://10.0.0.1:8080"}}}}"#;
const SECOND: &str = r#"{"messageType":"Update","key":"edge/second","routes":[{"routeId":"r2","clusterId":"second"}],"cluster":{"clusterId":"second"}}"#;
const HEARTBEAT: &str = r#"{"messageType":"Heartbeat"}"#;

#[derive(Clone, Copy)]
enum Mode {
    /// First connection: two updates and the end marker. Later: heartbeats forever.
    UpdatesThenHeartbeats,
    /// Heartbeats forever on every connection.
    Endless,
    /// Every connection answers 500.
    Broken,
}

#[derive(Clone)]
struct Controller {
    mode: Mode,
    connections: Arc<AtomicUsize>,
    accept: Arc<Mutex<Option<String>>>,
}

impl Controller {
    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn heartbeats() -> Body {
    let stream = futures_util::stream::unfold((), |()| async {
        sleep(Duration::from_millis(50)).await;
        Some((Ok::<_, std::io::Error>(format!("{HEARTBEAT}\n")), ()))
    });
    Body::from_stream(stream)
}

async fn dispatch(State(controller): State<Controller>, headers: HeaderMap) -> Response {
    let seen = controller.connections.fetch_add(1, Ordering::SeqCst);
    *controller.accept.lock().unwrap() = headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match controller.mode {
        Mode::UpdatesThenHeartbeats if seen == 0 => {
            // Split across chunks so lines straddle read boundaries
            let chunks = vec![
                format!("{HEARTBEAT}\n{}", &FIRST[..40]),
                format!("{}\n{SECOND}\n", &FIRST[40..]),
                "\n".to_string(),
            ];
            Body::from_stream(futures_util::stream::iter(
                chunks.into_iter().map(Ok::<_, std::io::Error>),
            ))
            .into_response()
        }
        Mode::UpdatesThenHeartbeats | Mode::Endless => heartbeats().into_response(),
        Mode::Broken => (StatusCode::INTERNAL_SERVER_ERROR, "controller down").into_response(),
    }
}

async fn spawn_controller(mode: Mode) -> (Url, Controller) {
    let controller = Controller {
        mode,
        connections: Arc::new(AtomicUsize::new(0)),
        accept: Arc::new(Mutex::new(None)),
    };
    let app = Router::new()
        .route("/api/dispatch", get(dispatch))
        .with_state(controller.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let url = Url::parse(&format!("http://{addr}/api/dispatch")).unwrap();
    (url, controller)
}

fn receiver_config(url: &Url) -> ReceiverConfig {
    let options = ReceiverOptions {
        controller_url: url.to_string(),
        connect_timeout_secs: 2,
        ..Default::default()
    };
    let transport = HttpTransport::new(&TransportPolicy::from_options(&options)).unwrap();
    ReceiverConfig::from_options(&options, Arc::new(transport)).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_receiver_applies_streamed_updates_and_stops_on_cancel() {
    let (url, controller) = spawn_controller(Mode::UpdatesThenHeartbeats).await;
    let store = Arc::new(InMemoryConfigStore::new());
    let mut snapshots = store.subscribe();
    let mut receiver = ControllerReceiver::new(receiver_config(&url), store.clone());
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let stats = receiver.run(token).await;
        (receiver, stats)
    });

    timeout(Duration::from_secs(5), snapshots.wait_for(|s| s.generation >= 2))
        .await
        .expect("updates not applied in time")
        .expect("store dropped");

    // The end marker closes the first connection; the gate lets the next one
    // through and it stays open on heartbeats until cancelled.
    wait_until(|| controller.connections() >= 2).await;
    cancel.cancel();

    let (receiver, stats) = timeout(Duration::from_secs(5), task)
        .await
        .expect("receiver must stop promptly")
        .unwrap();

    assert_eq!(receiver.state(), ReceiverState::Stopped);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.updates_applied, 2);
    assert!(stats.messages >= 3);

    let current = store.current();
    assert_eq!(current.generation, 2);
    assert_eq!(current.cluster.cluster_id.as_deref(), Some("second"));
    assert_eq!(current.routes[0].route_id, "r2");

    let accept = controller.accept.lock().unwrap().clone().unwrap_or_default();
    assert!(accept.contains("application/x-ndjson"), "accept was {accept:?}");
}

#[tokio::test]
async fn test_non_success_status_fails_without_decoding() {
    let (url, _controller) = spawn_controller(Mode::Broken).await;
    let transport = HttpTransport::new(&TransportPolicy::default()).unwrap();

    match transport.open(&url, &CancellationToken::new()).await {
        Err(TransportError::Status(status)) => assert_eq!(status.as_u16(), 500),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("a 500 must not yield a stream"),
    }
}

#[tokio::test]
async fn test_connection_refused_is_a_connect_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("http://{addr}/api/dispatch")).unwrap();
    let transport = HttpTransport::new(&TransportPolicy::default()).unwrap();
    let result = transport.open(&url, &CancellationToken::new()).await;
    assert!(matches!(result, Err(TransportError::Connect(_))));
}

#[tokio::test]
async fn test_cancel_interrupts_an_open_stream() {
    let (url, controller) = spawn_controller(Mode::Endless).await;
    let config = receiver_config(&url);
    let dispatcher = MessageDispatcher::new(Arc::new(InMemoryConfigStore::new()));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let outcome = timeout(
        Duration::from_secs(5),
        ConnectionCycle::new(&config, &dispatcher).run(&cancel),
    )
    .await
    .expect("an endless stream must not outlive cancellation");

    assert!(matches!(outcome, ConnectionOutcome::Cancelled));
    assert_eq!(controller.connections(), 1);
}

#[tokio::test]
async fn test_unreachable_controller_escalates_backoff() {
    let (url, controller) = spawn_controller(Mode::Broken).await;
    let mut receiver =
        ControllerReceiver::new(receiver_config(&url), Arc::new(InMemoryConfigStore::new()));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        // Attempts near 0s, 0.5s and 1s; the fourth waits until about 6s.
        sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let stats = receiver.run(cancel).await;

    assert_eq!(controller.connections(), 3);
    assert_eq!(stats.failures, 3);
    assert_eq!(stats.successes, 0);
    assert!(receiver.gate().is_escalated());
}
