//! # Background Service Host
//!
//! `BackgroundHost` spawns a `BackgroundService` on the Tokio runtime and
//! stops it on request:
//!
//! - `start()` spawns `run` with a token owned by the host.
//! - `stop(cancel)` cancels that token and waits for the task. If the
//!   caller's `cancel` fires first the task is aborted.
//! - A service that returns without being asked to (error or not) cancels
//!   the optional application-stop token, so the process goes down with it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A long-running unit of work driven by a cancellation token.
#[async_trait]
pub trait BackgroundService: Send + 'static {
    fn name(&self) -> &str;

    /// Runs until `cancel` fires or the service gives up.
    async fn run(&mut self, cancel: CancellationToken) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("service '{0}' is already started")]
    AlreadyStarted(String),

    #[error("service '{0}' was never started")]
    NotStarted(String),

    #[error("service '{0}' was aborted and cannot be restarted")]
    Aborted(String),

    #[error("service '{name}' panicked")]
    Panicked {
        name: String,
        #[source]
        source: tokio::task::JoinError,
    },
}

struct Running<S> {
    token: CancellationToken,
    handle: JoinHandle<S>,
}

enum Slot<S> {
    Idle(S),
    Running(Running<S>),
    /// The task was aborted or panicked; the service value is gone.
    Aborted,
}

pub struct BackgroundHost<S: BackgroundService> {
    name: String,
    slot: Slot<S>,
    application_stop: Option<CancellationToken>,
}

impl<S: BackgroundService> BackgroundHost<S> {
    pub fn new(service: S) -> Self {
        Self {
            name: service.name().to_string(),
            slot: Slot::Idle(service),
            application_stop: None,
        }
    }

    /// Token cancelled when the service exits on its own.
    pub fn with_application_stop(mut self, token: CancellationToken) -> Self {
        self.application_stop = Some(token);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        matches!(&self.slot, Slot::Running(running) if !running.handle.is_finished())
    }

    pub fn start(&mut self) -> Result<(), HostError> {
        let mut service = match std::mem::replace(&mut self.slot, Slot::Aborted) {
            Slot::Idle(service) => service,
            Slot::Aborted => return Err(HostError::Aborted(self.name.clone())),
            running @ Slot::Running(_) => {
                self.slot = running;
                return Err(HostError::AlreadyStarted(self.name.clone()));
            }
        };

        let token = CancellationToken::new();
        let child = token.clone();
        let application_stop = self.application_stop.clone();
        let name = self.name.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(service = %name, "background service starting");
            let result = service.run(child.clone()).await;
            match &result {
                Ok(()) if child.is_cancelled() => {
                    tracing::info!(service = %name, "background service stopped");
                }
                Ok(()) => tracing::warn!(service = %name, "background service exited unexpectedly"),
                Err(err) => tracing::error!(service = %name, error = %err, "background service failed"),
            }
            if !child.is_cancelled() {
                if let Some(app) = application_stop {
                    app.cancel();
                }
            }
            service
        });

        self.slot = Slot::Running(Running { token, handle });
        Ok(())
    }

    /// Signals the service to stop and waits for it, or aborts it once
    /// `cancel` fires. The service can be started again after a clean stop;
    /// after an abort or a panic `start` returns `HostError::Aborted`.
    pub async fn stop(&mut self, cancel: CancellationToken) -> Result<(), HostError> {
        let Running { token, mut handle } = match std::mem::replace(&mut self.slot, Slot::Aborted) {
            Slot::Running(running) => running,
            other => {
                self.slot = other;
                return Err(HostError::NotStarted(self.name.clone()));
            }
        };

        token.cancel();
        let joined = tokio::select! {
            biased;
            joined = &mut handle => joined,
            _ = cancel.cancelled() => {
                tracing::warn!(service = %self.name, "stop deadline reached, aborting service");
                handle.abort();
                return Ok(());
            }
        };

        match joined {
            Ok(service) => {
                self.slot = Slot::Idle(service);
                Ok(())
            }
            Err(source) if source.is_cancelled() => Ok(()),
            Err(source) => Err(HostError::Panicked {
                name: self.name.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Mode {
        UntilCancelled,
        ReturnImmediately,
        IgnoreCancel,
        Panic,
    }

    struct Scripted {
        mode: Mode,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BackgroundService for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&mut self, cancel: CancellationToken) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::UntilCancelled => cancel.cancelled().await,
                Mode::ReturnImmediately => {}
                Mode::IgnoreCancel => std::future::pending::<()>().await,
                Mode::Panic => panic!("service blew up"),
            }
            Ok(())
        }
    }

    fn scripted(mode: Mode) -> (Scripted, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (Scripted { mode, runs: runs.clone() }, runs)
    }

    #[tokio::test]
    async fn start_then_stop_and_restart() {
        let (service, runs) = scripted(Mode::UntilCancelled);
        let app_stop = CancellationToken::new();
        let mut host = BackgroundHost::new(service).with_application_stop(app_stop.clone());

        host.start().unwrap();
        tokio::task::yield_now().await;
        assert!(host.is_running());
        assert!(matches!(host.start(), Err(HostError::AlreadyStarted(_))));

        host.stop(CancellationToken::new()).await.unwrap();
        assert!(!host.is_running());
        assert!(!app_stop.is_cancelled());

        host.start().unwrap();
        host.stop(CancellationToken::new()).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_before_start_is_an_error() {
        let (service, _) = scripted(Mode::UntilCancelled);
        let mut host = BackgroundHost::new(service);
        assert!(matches!(
            host.stop(CancellationToken::new()).await,
            Err(HostError::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn unexpected_exit_cancels_the_application() {
        let (service, _) = scripted(Mode::ReturnImmediately);
        let app_stop = CancellationToken::new();
        let mut host = BackgroundHost::new(service).with_application_stop(app_stop.clone());

        host.start().unwrap();
        tokio::time::timeout(Duration::from_secs(5), app_stop.cancelled())
            .await
            .expect("application stop token must fire");
    }

    #[tokio::test]
    async fn stubborn_service_is_aborted_at_the_deadline() {
        let (service, _) = scripted(Mode::IgnoreCancel);
        let mut host = BackgroundHost::new(service);
        host.start().unwrap();

        let deadline = CancellationToken::new();
        let trigger = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), host.stop(deadline))
            .await
            .expect("stop must return once the deadline fires")
            .unwrap();
        assert!(!host.is_running());
        assert!(matches!(host.start(), Err(HostError::Aborted(_))));
        assert!(matches!(
            host.stop(CancellationToken::new()).await,
            Err(HostError::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn panicking_service_is_reported() {
        let (service, _) = scripted(Mode::Panic);
        let app_stop = CancellationToken::new();
        let mut host = BackgroundHost::new(service).with_application_stop(app_stop.clone());
        host.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            host.stop(CancellationToken::new()).await,
            Err(HostError::Panicked { .. })
        ));
        assert!(matches!(host.start(), Err(HostError::Aborted(_))));
    }
}
