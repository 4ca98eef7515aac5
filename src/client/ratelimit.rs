//! Token bucket rate limiter for outbound upstream calls
//!
//! Tokens refill in discrete steps of `tokens_per_interval` every `interval`.
//! Refill is computed lazily from the elapsed clock time on every call, so
//! there is no background timer. Every state transition (refill, then
//! check-and-decrement) happens under one lock acquisition with no await
//! point in between.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::RateLimitExceeded;

/// Millisecond clock used by the limiter
pub trait Clock: Send + Sync + Debug {
    /// Current time in milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> u64;
}

/// Monotonic wall clock
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at the given time
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Mutable bucket state, owned by one limiter
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterState {
    /// Maximum tokens
    pub capacity: u32,
    /// Tokens added per refill step
    pub tokens_per_interval: u32,
    /// Refill step length in milliseconds
    pub interval_ms: u64,
    /// Current tokens, always within `[0, capacity]`
    pub tokens: f64,
    /// Clock time of the last applied refill step
    pub last_refill_at: u64,
}

impl RateLimiterState {
    fn new(config: &RateLimitConfig, now: u64) -> Self {
        Self {
            capacity: config.capacity,
            tokens_per_interval: config.tokens_per_interval,
            interval_ms: config.interval_ms.max(1),
            tokens: config.capacity as f64,
            last_refill_at: now,
        }
    }

    /// Apply every whole refill step that elapsed since `last_refill_at`
    fn refill(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_refill_at);
        let steps = elapsed / self.interval_ms;
        if steps == 0 {
            return;
        }

        let added = steps as f64 * self.tokens_per_interval as f64;
        self.tokens = (self.tokens + added).min(self.capacity as f64);
        self.last_refill_at = now - (elapsed % self.interval_ms);
    }

    fn next_refill_at(&self) -> u64 {
        self.last_refill_at + self.interval_ms
    }

    fn next_refill_in(&self, now: u64) -> u64 {
        self.next_refill_at().saturating_sub(now)
    }
}

/// Token bucket guarding the upstream call volume
///
/// Shared by all concurrent requests of one process.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<RateLimiterState>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter backed by the system clock, starting full
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a limiter backed by the given clock, starting full
    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            state: Mutex::new(RateLimiterState::new(config, now)),
            clock,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RateLimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take `n` tokens if available; never blocks
    pub fn try_consume(&self, n: u32) -> bool {
        self.consume(n).is_ok()
    }

    /// Take `n` tokens or report when the next refill happens
    pub fn consume(&self, n: u32) -> Result<(), RateLimitExceeded> {
        let now = self.clock.now_ms();
        let mut state = self.lock_state();
        state.refill(now);

        let requested = n as f64;
        if state.tokens >= requested {
            state.tokens -= requested;
            Ok(())
        } else {
            Err(RateLimitExceeded {
                remaining_tokens: state.tokens,
                next_refill_in_ms: state.next_refill_in(now),
            })
        }
    }

    /// Tokens currently available, after applying pending refills
    pub fn available_tokens(&self) -> f64 {
        let now = self.clock.now_ms();
        let mut state = self.lock_state();
        state.refill(now);
        state.tokens
    }

    /// Clock time (ms) of the next refill step
    pub fn next_refill_time(&self) -> u64 {
        let now = self.clock.now_ms();
        let mut state = self.lock_state();
        state.refill(now);
        state.next_refill_at()
    }

    /// Milliseconds until the next refill step
    pub fn next_refill_in_ms(&self) -> u64 {
        let now = self.clock.now_ms();
        let mut state = self.lock_state();
        state.refill(now);
        state.next_refill_in(now)
    }

    /// Bucket capacity
    pub fn capacity(&self) -> u32 {
        self.lock_state().capacity
    }

    /// Snapshot of the current state
    pub fn snapshot(&self) -> RateLimiterState {
        self.lock_state().clone()
    }
}
