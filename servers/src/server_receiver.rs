use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_graceful::Shutdown;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lib_common::loggers::setup_logging;
use lib_common::{
    BackgroundHost, ControllerReceiver, HttpTransport, InMemoryConfigStore, ReceiverConfig,
    TransportPolicy,
};

mod receiver_logic;
use receiver_logic::config;

/// Completes on Ctrl-C, SIGTERM or when the application-stop token fires.
async fn shutdown_signal(app_stop: CancellationToken) {
    let terminate = async {
        #[cfg(unix)]
        {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut term_signal) => {
                    term_signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => info!("SIGTERM received, initiating shutdown."),
        _ = app_stop.cancelled() => warn!("Receiver exited, initiating shutdown."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    // Keeps the non-blocking file writer flushing until main returns.
    let _log_guard = setup_logging(&config.logging_options())?;

    let options = config.receiver_options();
    info!(
        controller = %options.controller_url,
        base_rate = options.base_rate,
        escalated_rate = options.escalated_rate,
        failure_threshold = options.failure_threshold,
        "Starting controller stream receiver"
    );

    let transport = Arc::new(HttpTransport::new(&TransportPolicy::from_options(&options))?);
    let store = Arc::new(InMemoryConfigStore::new());
    let receiver_config = ReceiverConfig::from_options(&options, transport)?;
    let receiver = ControllerReceiver::new(receiver_config, store.clone());

    let app_stop = CancellationToken::new();
    let mut host = BackgroundHost::new(receiver).with_application_stop(app_stop.clone());
    let stop_limit = config.shutdown_timeout();

    let shutdown = Shutdown::new(shutdown_signal(app_stop));

    let mut snapshots = store.subscribe();
    shutdown.spawn_task_fn(move |guard| async move {
        loop {
            tokio::select! {
                _ = guard.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    info!(
                        generation = snapshot.generation,
                        routes = snapshot.routes.len(),
                        cluster = snapshot.cluster.cluster_id.as_deref().unwrap_or(""),
                        "Routing snapshot published"
                    );
                }
            }
        }
    });

    shutdown.spawn_task_fn(move |guard| async move {
        if let Err(e) = host.start() {
            error!("Failed to start {}: {}", host.name(), e);
            return;
        }
        guard.cancelled().await;

        let deadline = CancellationToken::new();
        let timer = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(stop_limit).await;
            timer.cancel();
        });
        if let Err(e) = host.stop(deadline).await {
            error!("Failed to stop {}: {}", host.name(), e);
        }
    });

    match shutdown
        .shutdown_with_limit(stop_limit + Duration::from_secs(1))
        .await
    {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    info!("Bye!");

    Ok(())
}
