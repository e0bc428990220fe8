//! Resilience patterns shared by the dispatcher, fetcher, and mailer.
//!
//! This module provides:
//! - **Circuit Breaker**: fails fast while an upstream dependency is down
//! - **Recipient Rate Limiter**: per-key hour/day sliding-window quotas
//!
//! ## Circuit Breaker States
//!
//! ```text
//! ┌─────────┐  failures >= threshold  ┌────────┐
//! │ CLOSED  │ ──────────────────────> │  OPEN  │
//! └─────────┘                         └────────┘
//!      ^                                   │
//!      │                                   │ reset timeout elapsed
//!      │                                   v
//!      │      success            ┌─────────────┐
//!      └──────────────────────── │ HALF-OPEN   │
//!                                └─────────────┘
//!                                      │
//!                       failure        │
//!                       ───────────────┘
//! ```
//!
//! One breaker instance is shared per upstream endpoint; the fetcher and the
//! scheduler gate consult the same state.
//!
//! ## Example
//!
//! ```rust,ignore
//! use jobqueue::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     reset_timeout: Duration::from_secs(300),
//! });
//!
//! if breaker.allow() {
//!     match do_work().await {
//!         Ok(_) => breaker.on_success(),
//!         Err(_) => breaker.on_failure(),
//!     }
//! } else {
//!     // Circuit is open, fail fast
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are rejected immediately.
    Open,
    /// Circuit is half-open, testing if the service has recovered.
    HalfOpen,
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Number of accumulated failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long to stay open before admitting a half-open probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(300),
        }
    }
}

/// Point-in-time view of the breaker, for stats and logging.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Thread-safe circuit breaker.
///
/// All transitions run under a single mutex, so concurrent callers observe a
/// serialized state machine. The Open -> HalfOpen transition happens inside
/// `allow()` once the reset timeout has elapsed; the transitioning caller and
/// any callers arriving while half-open are admitted as probes.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Create a circuit breaker with default configuration.
    pub fn default_config() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Get the current state of the circuit breaker.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Check whether a call may proceed.
    ///
    /// Returns `true` while closed or half-open. While open, returns `false`
    /// until the reset timeout elapses; the first call after that transitions
    /// to half-open and is admitted as the probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);

                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!("Circuit breaker HALF-OPEN (probing recovery)");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    ///
    /// Half-open: one success closes the circuit. Closed: the failure count
    /// decays by one per success (floor zero), so isolated failures age out.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.opened_at = None;
                tracing::info!("Circuit breaker CLOSED (recovered)");
            }
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    ///
    /// Opens the circuit once the threshold is reached, or immediately when
    /// the half-open probe fails.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();

        inner.failure_count += 1;

        if inner.state != CircuitState::Open && inner.failure_count >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                failure_count = inner.failure_count,
                "Circuit breaker OPENED"
            );
        }
    }

    /// Snapshot the breaker state for stats endpoints.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            opened_at: inner.opened_at,
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
    }
}

/// Rate limit quota configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum allowed calls per key in any contiguous hour.
    pub max_per_hour: u32,
    /// Maximum allowed calls per key in any 24-hour window.
    pub max_per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_hour: 50,
            max_per_day: 1000,
        }
    }
}

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

/// Per-key sliding-window rate limiter.
///
/// Tracks call timestamps per key in a guarded map; a call is admitted only
/// if both the trailing-hour and trailing-day counts are under their
/// ceilings. Timestamps older than 24h are pruned on access, and `sweep()`
/// drops keys that have gone idle.
pub struct RecipientRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RecipientRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Try to admit a call for the given key.
    ///
    /// Returns `true` and records the call if both windows have room.
    /// A rejected call has no side effects.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(key.to_string()).or_default();

        while let Some(front) = window.front() {
            if now.duration_since(*front) >= DAY {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() as u32 >= self.config.max_per_day {
            return false;
        }

        let hourly = window
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) < HOUR)
            .count() as u32;

        if hourly >= self.config.max_per_hour {
            return false;
        }

        window.push_back(now);
        true
    }

    /// Remaining hourly quota for a key (for stats endpoints).
    pub fn remaining_hourly(&self, key: &str) -> u32 {
        let now = Instant::now();
        let windows = self.windows.lock().unwrap();
        let used = windows
            .get(key)
            .map(|w| {
                w.iter()
                    .rev()
                    .take_while(|t| now.duration_since(**t) < HOUR)
                    .count() as u32
            })
            .unwrap_or(0);
        self.config.max_per_hour.saturating_sub(used)
    }

    /// Drop keys whose entire window has aged out.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();
        windows.retain(|_, w| {
            w.back()
                .map(|t| now.duration_since(*t) < DAY)
                .unwrap_or(false)
        });
    }

    /// Number of tracked keys (for stats endpoints).
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

/// Combined resilience wrapper for processors.
///
/// Bundles the shared circuit breaker with an optional rate limiter so the
/// worker has one check to make before running a job.
pub struct ResilienceLayer {
    /// Circuit breaker for failure protection.
    pub circuit_breaker: CircuitBreaker,
    /// Optional per-key rate limiter.
    pub rate_limiter: Option<RecipientRateLimiter>,
}

impl ResilienceLayer {
    /// Create a new resilience layer with circuit breaker only.
    pub fn new(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            circuit_breaker: CircuitBreaker::new(breaker_config),
            rate_limiter: None,
        }
    }

    /// Create a resilience layer with both circuit breaker and rate limiter.
    pub fn with_rate_limit(breaker_config: CircuitBreakerConfig, limit: RateLimitConfig) -> Self {
        Self {
            circuit_breaker: CircuitBreaker::new(breaker_config),
            rate_limiter: Some(RecipientRateLimiter::new(limit)),
        }
    }

    /// Check if an operation keyed by `key` can proceed.
    pub fn check(&self, key: &str) -> Result<(), ResilienceError> {
        if !self.circuit_breaker.allow() {
            return Err(ResilienceError::CircuitOpen);
        }

        if let Some(ref limiter) = self.rate_limiter {
            if !limiter.allow(key) {
                return Err(ResilienceError::RateLimited);
            }
        }

        Ok(())
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        self.circuit_breaker.on_success();
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        self.circuit_breaker.on_failure();
    }

    /// Get circuit breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }
}

/// Error returned when resilience checks fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResilienceError {
    /// Circuit breaker is open.
    CircuitOpen,
    /// Rate limit exceeded.
    RateLimited,
}

impl std::fmt::Display for ResilienceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen => write!(f, "circuit breaker is open"),
            Self::RateLimited => write!(f, "rate limit exceeded"),
        }
    }
}

impl std::error::Error for ResilienceError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(reset_ms),
        })
    }

    #[test]
    fn test_breaker_initial_state() {
        let breaker = CircuitBreaker::default_config();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let breaker = fast_breaker(3, 60_000);

        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());

        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_breaker_success_decrements_failures_while_closed() {
        let breaker = fast_breaker(3, 60_000);

        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.snapshot().failure_count, 2);

        breaker.on_success();
        assert_eq!(breaker.snapshot().failure_count, 1);

        breaker.on_success();
        breaker.on_success();
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[test]
    fn test_breaker_half_open_after_reset_timeout() {
        let breaker = fast_breaker(1, 10);

        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());

        std::thread::sleep(Duration::from_millis(20));

        // First allow() after the timeout transitions to half-open and admits
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // One success closes the circuit
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[test]
    fn test_breaker_half_open_reopens_on_failure() {
        let breaker = fast_breaker(1, 10);

        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_breaker_open_state_has_opened_at() {
        let breaker = fast_breaker(1, 60_000);
        breaker.on_failure();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert!(snapshot.opened_at.is_some());
    }

    #[test]
    fn test_rate_limiter_hourly_ceiling() {
        let limiter = RecipientRateLimiter::new(RateLimitConfig {
            max_per_hour: 3,
            max_per_day: 100,
        });

        assert!(limiter.allow("ops@example.com"));
        assert!(limiter.allow("ops@example.com"));
        assert!(limiter.allow("ops@example.com"));
        assert!(!limiter.allow("ops@example.com"));

        // Other keys are unaffected
        assert!(limiter.allow("oncall@example.com"));
    }

    #[test]
    fn test_rate_limiter_daily_ceiling() {
        let limiter = RecipientRateLimiter::new(RateLimitConfig {
            max_per_hour: 100,
            max_per_day: 2,
        });

        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn test_rate_limiter_rejection_has_no_side_effects() {
        let limiter = RecipientRateLimiter::new(RateLimitConfig {
            max_per_hour: 1,
            max_per_day: 10,
        });

        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        // The rejected call must not consume daily quota
        assert_eq!(limiter.remaining_hourly("k"), 0);
        let windows = limiter.windows.lock().unwrap();
        assert_eq!(windows.get("k").unwrap().len(), 1);
    }

    #[test]
    fn test_rate_limiter_sweep_drops_empty_keys() {
        let limiter = RecipientRateLimiter::new(RateLimitConfig::default());
        assert!(limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.sweep();
        // Entries are fresh, nothing dropped
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_resilience_layer_breaker_blocks() {
        let layer = ResilienceLayer::new(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(60),
        });

        assert!(layer.check("k").is_ok());
        layer.record_failure();
        layer.record_failure();
        assert_eq!(layer.check("k"), Err(ResilienceError::CircuitOpen));
    }

    #[test]
    fn test_resilience_layer_rate_limit_blocks() {
        let layer = ResilienceLayer::with_rate_limit(
            CircuitBreakerConfig::default(),
            RateLimitConfig {
                max_per_hour: 1,
                max_per_day: 10,
            },
        );

        assert!(layer.check("k").is_ok());
        assert_eq!(layer.check("k"), Err(ResilienceError::RateLimited));
    }
}
