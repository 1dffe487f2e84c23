//! Retry and backoff helpers
//!
//! `RetryPolicy` drives the bounded retries around SQLite writes when
//! another process holds the lock. `BackoffTracker` keeps per-key
//! exponential cool-downs so a failing redirect host is not hammered.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Bounded exponential retry for transient storage errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given 0-based failed attempt: base * 2^attempt, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Policy without sleeping, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Lock contention and I/O hiccups; everything else is an integrity failure.
pub fn is_transient_sqlite_error(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
        ),
        _ => false,
    }
}

#[derive(Debug, Clone)]
struct BackoffState {
    current_delay: Duration,
    last_error_at: Instant,
    error_count: u32,
}

/// Per-key exponential backoff (e.g. keyed by hostname)
pub struct BackoffTracker {
    states: RwLock<HashMap<String, BackoffState>>,
    min_delay: Duration,
    max_delay: Duration,
    reset_after: Duration,
}

impl BackoffTracker {
    pub fn new(min_delay: Duration, max_delay: Duration, reset_after: Duration) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            min_delay,
            max_delay,
            reset_after,
        }
    }

    pub fn record_success(&self, key: &str) {
        if self.states.write().remove(key).is_some() {
            log::debug!("[backoff] Success for '{}', backoff reset", key);
        }
    }

    /// Record a failure and return the cool-down now in force for `key`
    pub fn record_error(&self, key: &str) -> Duration {
        let mut states = self.states.write();
        let now = Instant::now();
        let state = states.entry(key.to_string()).or_insert(BackoffState {
            current_delay: self.min_delay,
            last_error_at: now,
            error_count: 0,
        });

        if now.duration_since(state.last_error_at) > self.reset_after {
            state.current_delay = self.min_delay;
            state.error_count = 1;
        } else {
            state.error_count += 1;
            if state.error_count > 1 {
                state.current_delay = (state.current_delay * 2).min(self.max_delay);
            }
        }
        state.last_error_at = now;

        log::warn!(
            "[backoff] Error #{} for '{}', cooling down {:?}",
            state.error_count,
            key,
            state.current_delay
        );
        state.current_delay
    }

    pub fn current_delay(&self, key: &str) -> Option<Duration> {
        self.states.read().get(key).map(|s| s.current_delay)
    }

    /// Time left before `key` may be tried again, if it is cooling down
    pub fn remaining_cooldown(&self, key: &str) -> Option<Duration> {
        let states = self.states.read();
        let state = states.get(key)?;
        let ready_at = state.last_error_at + state.current_delay;
        ready_at.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
    }
}

/// Check if an HTTP status code indicates a retryable error
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504 | 520..=524)
}

pub fn is_reqwest_error_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout()
        || err.is_connect()
        || err.is_request()
        || err.status().map(|s| is_retryable_status(s.as_u16())).unwrap_or(false)
}
