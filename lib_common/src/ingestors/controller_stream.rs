//! # Controller Stream Ingestor
//!
//! The reconnecting receiver. One `ControllerReceiver` owns a rate gate, a
//! dispatcher and the transport, and repeats the same cycle until it is
//! cancelled:
//!
//! 1. Wait for a permit from the `RateGate` (cancellable).
//! 2. Run one `ConnectionCycle`: open the stream, decode lines, dispatch
//!    messages, until the stream ends or something fails (cancellable).
//! 3. Report `Success`/`Failure` to the gate and go back to 1.
//!
//! Cancellation is not a failure. It stops the loop and is never reported
//! to the gate.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::configs::{ConfigError, ReceiverOptions};
use crate::core::dispatcher::{ConfigSink, Dispatched, MessageDispatcher};
use crate::core::rate_gate::{GateSignal, RateGate, RateGatePolicy};
use crate::error::ReceiverError;
use crate::hosting::BackgroundService;
use crate::protocol::decoder::{Frame, LineDecoder};
use crate::retrieve::transport::Transport;

/// Immutable receiver settings, fixed before the loop starts.
#[derive(Clone)]
pub struct ReceiverConfig {
    pub controller_url: Url,
    pub transport: Arc<dyn Transport>,
    pub gate: RateGatePolicy,
    pub max_line_bytes: usize,
    pub verbose_messages: bool,
}

impl ReceiverConfig {
    /// Validates `options` and pairs them with a transport.
    pub fn from_options(
        options: &ReceiverOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            controller_url: options.controller_url()?,
            transport,
            gate: RateGatePolicy::from_options(options),
            max_line_bytes: options.max_line_bytes,
            verbose_messages: options.verbose_messages,
        })
    }
}

/// How the stream ended on a successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The controller sent the blank-line end marker.
    EndMarker,
    /// The connection closed cleanly at EOF.
    Closed,
}

/// Counters for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub messages: u64,
    pub updates_applied: u64,
    pub end: StreamEnd,
}

/// Result of one connection cycle.
#[derive(Debug)]
pub enum ConnectionOutcome {
    Success(CycleSummary),
    Failure(ReceiverError),
    Cancelled,
}

impl ConnectionOutcome {
    /// The signal for the rate gate; `None` for cancellation.
    pub fn gate_signal(&self) -> Option<GateSignal> {
        match self {
            ConnectionOutcome::Success(_) => Some(GateSignal::Success),
            ConnectionOutcome::Failure(_) => Some(GateSignal::Failure),
            ConnectionOutcome::Cancelled => None,
        }
    }
}

/// One attempt to open the controller stream and consume it.
pub struct ConnectionCycle<'a> {
    config: &'a ReceiverConfig,
    dispatcher: &'a MessageDispatcher,
}

impl<'a> ConnectionCycle<'a> {
    pub fn new(config: &'a ReceiverConfig, dispatcher: &'a MessageDispatcher) -> Self {
        Self { config, dispatcher }
    }

    /// Runs the cycle to completion. Never panics and never returns an error:
    /// every failure is folded into the outcome.
    pub async fn run(self, cancel: &CancellationToken) -> ConnectionOutcome {
        match self.consume(cancel).await {
            Ok(summary) => ConnectionOutcome::Success(summary),
            Err(ReceiverError::Cancelled) => ConnectionOutcome::Cancelled,
            Err(err) if cancel.is_cancelled() => {
                tracing::info!(error = %err, "cycle error during shutdown");
                ConnectionOutcome::Cancelled
            }
            Err(err) => ConnectionOutcome::Failure(err),
        }
    }

    async fn consume(&self, cancel: &CancellationToken) -> Result<CycleSummary, ReceiverError> {
        let stream = self
            .config
            .transport
            .open(&self.config.controller_url, cancel)
            .await?;
        tracing::info!(controller = %self.config.controller_url, "connected, consuming stream");

        // Dropping the decoder drops the body and closes the connection, so
        // returning on cancel is what unblocks a pending read.
        let mut decoder = LineDecoder::new(stream)
            .max_line_bytes(self.config.max_line_bytes)
            .verbose(self.config.verbose_messages);
        let mut messages = 0u64;
        let mut updates_applied = 0u64;

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ReceiverError::Cancelled),
                frame = decoder.next_frame() => frame?,
            };

            let message = match frame {
                Frame::Message(message) => message,
                Frame::EndMarker => {
                    return Ok(CycleSummary {
                        messages,
                        updates_applied,
                        end: StreamEnd::EndMarker,
                    });
                }
                Frame::Closed => {
                    return Ok(CycleSummary {
                        messages,
                        updates_applied,
                        end: StreamEnd::Closed,
                    });
                }
            };

            messages += 1;
            if self.dispatcher.dispatch(message, cancel).await? == Dispatched::Applied {
                updates_applied += 1;
            }
        }
    }
}

/// Lifecycle state of the receiver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Running,
    Stopped,
}

/// Running totals across all cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub cycles: u64,
    pub successes: u64,
    pub failures: u64,
    pub messages: u64,
    pub updates_applied: u64,
}

/// The reconnecting controller stream receiver.
pub struct ControllerReceiver {
    config: ReceiverConfig,
    gate: RateGate,
    dispatcher: MessageDispatcher,
    state: ReceiverState,
    stats: ReceiverStats,
}

impl ControllerReceiver {
    pub fn new(config: ReceiverConfig, sink: Arc<dyn ConfigSink>) -> Self {
        let gate = RateGate::new(config.gate);
        let dispatcher = MessageDispatcher::new(sink).verbose(config.verbose_messages);
        Self {
            config,
            gate,
            dispatcher,
            state: ReceiverState::Stopped,
            stats: ReceiverStats::default(),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    /// Runs until `cancel` fires, then returns the accumulated stats.
    pub async fn run(&mut self, cancel: CancellationToken) -> ReceiverStats {
        self.state = ReceiverState::Running;
        tracing::info!(controller = %self.config.controller_url, "receiver started");

        while self.state == ReceiverState::Running {
            let _permit = match self.gate.acquire(&cancel).await {
                Ok(permit) => permit,
                Err(_) => {
                    self.state = ReceiverState::Stopped;
                    break;
                }
            };

            tracing::info!(controller = %self.config.controller_url, "connecting to controller");
            let outcome = ConnectionCycle::new(&self.config, &self.dispatcher)
                .run(&cancel)
                .await;
            self.record(&outcome);

            match outcome.gate_signal() {
                Some(signal) => self.gate.report(signal),
                None => self.state = ReceiverState::Stopped,
            }
        }

        tracing::info!(
            cycles = self.stats.cycles,
            failures = self.stats.failures,
            updates_applied = self.stats.updates_applied,
            "receiver stopped"
        );
        self.stats
    }

    fn record(&mut self, outcome: &ConnectionOutcome) {
        self.stats.cycles += 1;
        match outcome {
            ConnectionOutcome::Success(summary) => {
                self.stats.successes += 1;
                self.stats.messages += summary.messages;
                self.stats.updates_applied += summary.updates_applied;
                tracing::info!(
                    messages = summary.messages,
                    updates_applied = summary.updates_applied,
                    end = ?summary.end,
                    "stream ended"
                );
            }
            ConnectionOutcome::Failure(err) => {
                self.stats.failures += 1;
                tracing::warn!(
                    error = %err,
                    consecutive_failures = self.gate.consecutive_failures() + 1,
                    "stream failed"
                );
            }
            ConnectionOutcome::Cancelled => {
                tracing::info!("stream closed on shutdown");
            }
        }
    }
}

#[async_trait]
impl BackgroundService for ControllerReceiver {
    fn name(&self) -> &str {
        "controller-receiver"
    }

    async fn run(&mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        ControllerReceiver::run(self, cancel).await;
        Ok(())
    }
}
