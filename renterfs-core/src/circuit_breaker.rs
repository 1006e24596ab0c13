//! Per-host circuit breaker
//!
//! Every host in a host set carries one breaker. Hosts whose breaker is open
//! are skipped when fragments are placed, and the failure counters rank the
//! remaining hosts so that reliable ones are tried first.
//!
//! - Closed → Open: `consecutive_failures >= failure_threshold`
//! - Open → HalfOpen: after `recovery_timeout`, one probe is let through
//! - HalfOpen → Closed on success, HalfOpen → Open on failure

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the host is taken out of rotation
    pub failure_threshold: u64,
    /// How long an open breaker waits before allowing a probe
    pub recovery_timeout: Duration,
    /// Name used in logs, usually the host key
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            name: "host".to_string(),
        }
    }
}

struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerState>,
    consecutive_failures: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            consecutive_failures: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
        }
    }

    /// Whether a request may be sent to the host right now
    ///
    /// An open breaker turns half-open once its recovery timeout has passed.
    pub fn allow_request(&self) -> bool {
        let probe_due = {
            let inner = self.inner.read();
            match (inner.state, inner.opened_at) {
                (CircuitState::Open, Some(t)) => t.elapsed() >= self.config.recovery_timeout,
                (CircuitState::Open, None) => false,
                _ => return true,
            }
        };
        if !probe_due {
            return false;
        }

        let mut inner = self.inner.write();
        if inner.state == CircuitState::Open {
            tracing::debug!(host = %self.config.name, "Probing host after recovery timeout");
            inner.state = CircuitState::HalfOpen;
        }
        true
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);

        let mut inner = self.inner.write();
        if inner.state != CircuitState::Closed {
            tracing::info!(host = %self.config.name, "Host back in rotation");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let count = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

        let mut inner = self.inner.write();
        let trip = match inner.state {
            CircuitState::Closed => count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            tracing::warn!(
                host = %self.config.name,
                failures = count,
                "Host taken out of rotation"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Failures over the lifetime of the breaker, used for ranking
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }
}
