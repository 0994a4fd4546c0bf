//! # Reconnect Rate Gate
//!
//! A single-permit token bucket that paces connection attempts.
//!
//! ## Behaviour
//!
//! - The bucket refills continuously at the *current rate* and holds at most
//!   one permit, so idle time never turns into a burst of reconnects.
//! - It starts full: the very first attempt goes through immediately.
//! - Every failed connection cycle increments a consecutive-failure counter.
//!   Once the counter reaches `failure_threshold`, the bucket refills at the
//!   lower `escalated_rate` instead of `base_rate`.
//! - One successful cycle resets the counter and restores `base_rate`.
//!
//! The gate is owned by exactly one receiver loop and is only touched from
//! that loop, so it takes `&mut self` and needs no locking. Its clock is
//! `tokio::time::Instant`, which lets tests drive it with a paused runtime.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::configs::ReceiverOptions;
use crate::error::Cancelled;

/// Burst capacity of the bucket.
const CAPACITY: f64 = 1.0;
/// Float slack so that a sleep computed for exactly one token is enough.
const EPSILON: f64 = 1e-9;
/// Longest single sleep in `acquire`. Tiny rates loop on this instead of
/// overflowing `Duration`.
const MAX_WAIT: Duration = Duration::from_secs(3600);

/// Pacing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateGatePolicy {
    /// Permits per second while the controller is reachable.
    pub base_rate: f64,
    /// Permits per second after `failure_threshold` consecutive failures.
    pub escalated_rate: f64,
    pub failure_threshold: u32,
}

impl Default for RateGatePolicy {
    fn default() -> Self {
        Self::from_options(&ReceiverOptions::default())
    }
}

impl RateGatePolicy {
    pub fn from_options(options: &ReceiverOptions) -> Self {
        Self {
            base_rate: options.base_rate,
            escalated_rate: options.escalated_rate,
            failure_threshold: options.failure_threshold,
        }
    }
}

/// Proof that the gate let one connection attempt through.
#[derive(Debug)]
#[must_use = "a permit authorizes exactly one connection attempt"]
pub struct Permit {
    _private: (),
}

/// Result of a connection cycle as seen by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    Success,
    Failure,
}

#[derive(Debug)]
pub struct RateGate {
    policy: RateGatePolicy,
    tokens: f64,
    last_refill: Instant,
    consecutive_failures: u32,
}

impl RateGate {
    pub fn new(policy: RateGatePolicy) -> Self {
        Self {
            policy,
            tokens: CAPACITY,
            last_refill: Instant::now(),
            consecutive_failures: 0,
        }
    }

    pub fn policy(&self) -> &RateGatePolicy {
        &self.policy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_escalated(&self) -> bool {
        self.consecutive_failures >= self.policy.failure_threshold
    }

    /// The refill rate currently in force, in permits per second.
    pub fn effective_rate(&self) -> f64 {
        if self.is_escalated() {
            self.policy.escalated_rate
        } else {
            self.policy.base_rate
        }
    }

    /// Waits until a permit is available or `cancel` fires.
    ///
    /// Cancellation consumes nothing: the bucket is left as it was.
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<Permit, Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let now = Instant::now();
            self.refill(now);
            if self.tokens + EPSILON >= 1.0 {
                self.tokens = (self.tokens - 1.0).max(0.0);
                return Ok(Permit { _private: () });
            }

            let wait = Duration::try_from_secs_f64((1.0 - self.tokens) / self.effective_rate())
                .map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT));
            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                rate = self.effective_rate(),
                consecutive_failures = self.consecutive_failures,
                "waiting for reconnect permit"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep_until(now + wait) => {}
            }
        }
    }

    /// Feeds the result of a connection cycle back into the gate.
    pub fn report(&mut self, signal: GateSignal) {
        // Credit the time elapsed so far at the rate that was in force.
        self.refill(Instant::now());
        let was_escalated = self.is_escalated();

        match signal {
            GateSignal::Success => self.consecutive_failures = 0,
            GateSignal::Failure => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1)
            }
        }

        if self.is_escalated() && !was_escalated {
            tracing::warn!(
                consecutive_failures = self.consecutive_failures,
                rate = self.policy.escalated_rate,
                "controller unreachable, slowing reconnect attempts"
            );
        } else if was_escalated && !self.is_escalated() {
            tracing::info!(rate = self.policy.base_rate, "controller reachable again, restoring reconnect rate");
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.effective_rate()).min(CAPACITY);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RateGatePolicy {
        RateGatePolicy {
            base_rate: 2.0,
            escalated_rate: 0.2,
            failure_threshold: 3,
        }
    }

    async fn timed_acquire(gate: &mut RateGate) -> Duration {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let _permit = gate.acquire(&cancel).await.unwrap();
        start.elapsed()
    }

    fn close_to(actual: Duration, expected_ms: u64) -> bool {
        let actual = actual.as_millis() as i64;
        (actual - expected_ms as i64).abs() <= 5
    }

    #[tokio::test(start_paused = true)]
    async fn first_permit_is_immediate_then_paced_at_base_rate() {
        let mut gate = RateGate::new(policy());
        assert!(close_to(timed_acquire(&mut gate).await, 0));
        assert!(close_to(timed_acquire(&mut gate).await, 500));
        assert!(close_to(timed_acquire(&mut gate).await, 500));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_does_not_build_a_burst() {
        let mut gate = RateGate::new(policy());
        let _ = timed_acquire(&mut gate).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(close_to(timed_acquire(&mut gate).await, 0));
        assert!(close_to(timed_acquire(&mut gate).await, 500));
    }

    #[tokio::test(start_paused = true)]
    async fn escalates_after_threshold_and_resets_on_success() {
        let mut gate = RateGate::new(policy());
        let _ = timed_acquire(&mut gate).await;

        for n in 1..=2 {
            gate.report(GateSignal::Failure);
            assert_eq!(gate.consecutive_failures(), n);
            assert_eq!(gate.effective_rate(), 2.0);
            assert!(close_to(timed_acquire(&mut gate).await, 500));
        }

        gate.report(GateSignal::Failure);
        assert!(gate.is_escalated());
        assert_eq!(gate.effective_rate(), 0.2);
        assert!(close_to(timed_acquire(&mut gate).await, 5_000));

        // Further failures keep the escalated rate.
        gate.report(GateSignal::Failure);
        assert_eq!(gate.effective_rate(), 0.2);
        assert!(close_to(timed_acquire(&mut gate).await, 5_000));

        gate.report(GateSignal::Success);
        assert_eq!(gate.consecutive_failures(), 0);
        assert_eq!(gate.effective_rate(), 2.0);
        assert!(close_to(timed_acquire(&mut gate).await, 500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_a_pending_wait() {
        let mut gate = RateGate::new(RateGatePolicy {
            base_rate: 0.01,
            escalated_rate: 0.01,
            failure_threshold: 1,
        });
        let cancel = CancellationToken::new();
        let _first = gate.acquire(&cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        assert_eq!(gate.acquire(&cancel).await.unwrap_err(), Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn vanishing_escalated_rate_waits_without_overflow() {
        let options = ReceiverOptions {
            escalated_rate: 1e-20,
            failure_threshold: 1,
            ..Default::default()
        };
        options.validate().unwrap();
        let mut gate = RateGate::new(RateGatePolicy::from_options(&options));
        let cancel = CancellationToken::new();
        let _first = gate.acquire(&cancel).await.unwrap();
        gate.report(GateSignal::Failure);
        assert!(gate.is_escalated());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            // Several capped sleeps elapse before cancellation.
            tokio::time::sleep(MAX_WAIT * 3 + Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        assert_eq!(gate.acquire(&cancel).await.unwrap_err(), Cancelled);
        assert!(start.elapsed() >= MAX_WAIT * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_token_never_grants() {
        let mut gate = RateGate::new(policy());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(gate.acquire(&cancel).await.is_err());
        // The untouched permit is still there for the next caller.
        assert!(close_to(timed_acquire(&mut gate).await, 0));
    }
}
