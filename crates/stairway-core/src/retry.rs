//! C2 — retry rules governing re-invocation of a failing step.
//!
//! Shaped after the bounded-attempts/growing-backoff loop the persistence
//! layer already uses for transient SQL errors (see
//! `stairway_persistence::pg::with_retry`), generalized into a trait so a
//! flight's step can carry its own policy independent of the DAO's.

use std::time::{Duration, Instant};

/// A cancellation signal retry sleeps must honor. The engine core's
/// quiescing flag is the canonical implementor.
pub trait CancellationToken: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// Always-false token for contexts with no cancellation source (tests,
/// standalone use of a retry rule).
pub struct NeverCancelled;

impl CancellationToken for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A step's retry policy. `retry_sleep` blocks for the policy's backoff
/// interval (in slices no longer than ~50ms, so cancellation is observed
/// promptly) and returns `true` iff another attempt should be made.
pub trait RetryRule: Send + Sync {
    fn initialize(&mut self);

    fn retry_sleep(&mut self, cancel: &dyn CancellationToken) -> bool;
}

/// Never retries.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetry;

impl RetryRule for NoRetry {
    fn initialize(&mut self) {}

    fn retry_sleep(&mut self, _cancel: &dyn CancellationToken) -> bool {
        false
    }
}

/// Retry up to `max_count` attempts spaced `interval` apart.
#[derive(Clone, Debug)]
pub struct FixedIntervalRetry {
    interval: Duration,
    max_count: u32,
    attempts: u32,
}

impl FixedIntervalRetry {
    pub fn new(interval: Duration, max_count: u32) -> Self {
        Self { interval, max_count, attempts: 0 }
    }
}

impl RetryRule for FixedIntervalRetry {
    fn initialize(&mut self) {
        self.attempts = 0;
    }

    fn retry_sleep(&mut self, cancel: &dyn CancellationToken) -> bool {
        if self.attempts >= self.max_count {
            return false;
        }
        self.attempts += 1;
        cancellable_sleep(self.interval, cancel);
        true
    }
}

/// Doubles the interval each attempt (capped at `max_interval`); stops once
/// cumulative elapsed time exceeds `max_operation_time`.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffRetry {
    initial_interval: Duration,
    max_interval: Duration,
    max_operation_time: Duration,
    next_interval: Duration,
    started_at: Option<Instant>,
}

impl ExponentialBackoffRetry {
    pub fn new(initial_interval: Duration, max_interval: Duration, max_operation_time: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            max_operation_time,
            next_interval: initial_interval,
            started_at: None,
        }
    }
}

impl RetryRule for ExponentialBackoffRetry {
    fn initialize(&mut self) {
        self.next_interval = self.initial_interval;
        self.started_at = Some(Instant::now());
    }

    fn retry_sleep(&mut self, cancel: &dyn CancellationToken) -> bool {
        let started_at = *self.started_at.get_or_insert_with(Instant::now);
        if started_at.elapsed() > self.max_operation_time {
            return false;
        }
        let sleep_for = self.next_interval;
        self.next_interval = (self.next_interval * 2).min(self.max_interval);
        cancellable_sleep(sleep_for, cancel);
        true
    }
}

/// Sleep in short slices, checking `cancel` between each, so a cancelled
/// retry aborts promptly rather than sleeping the whole interval.
fn cancellable_sleep(total: Duration, cancel: &dyn CancellationToken) {
    const SLICE: Duration = Duration::from_millis(50);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if cancel.is_cancelled() {
            return;
        }
        let slice = remaining.min(SLICE);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}
