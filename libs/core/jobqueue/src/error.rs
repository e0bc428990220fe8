//! Error types for queue operations.
//!
//! This module provides:
//! - `QueueError` - The main error type for queue operations
//! - `ErrorCategory` - Classification of errors for smart retry logic
//! - `RetryStrategy` - How to handle retries based on error category

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Redis connection or command error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job processing error from the processor (category sniffed from text).
    #[error("Processing error: {0}")]
    Processing(String),

    /// Known-transient processing error.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Known-permanent processing error. Never retried.
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// The downstream service asked us to back off.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The shared circuit breaker is open. Fast-fail, not counted as a failure.
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// The handler exceeded its per-kind deadline.
    #[error("Handler timed out after {0:?}")]
    HandlerTimeout(Duration),

    /// The enqueue was suppressed by a bucketed dedupe key. Silent by policy.
    #[error("Duplicate enqueue suppressed for key '{0}'")]
    DedupeSuppressed(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stream/queue operation error.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Consumer group error.
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Job parsing error.
    #[error("Job parsing error: {0}")]
    JobParsing(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Shorthand for a known-transient processing error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Shorthand for a known-permanent processing error.
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Shorthand for a rate-limited processing error.
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Check if this is a BLOCK timeout (normal behavior, not an error).
    ///
    /// When using XREADGROUP with BLOCK, a timeout means no messages arrived
    /// within the block period.
    pub fn is_block_timeout(&self) -> bool {
        match self {
            Self::Redis(e) => {
                let err_str = e.to_string().to_lowercase();
                err_str.contains("timed out") && !err_str.contains("connection")
            }
            _ => false,
        }
    }

    /// Check if this is a connection-related error that might be recoverable.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Redis(e) => {
                if self.is_block_timeout() {
                    return false;
                }
                let err_str = e.to_string().to_lowercase();
                err_str.contains("connection")
                    || err_str.contains("disconnected")
                    || err_str.contains("broken pipe")
                    || err_str.contains("reset by peer")
                    || err_str.contains("refused")
                    || err_str.contains("eof")
                    || err_str.contains("io error")
            }
            Self::Queue(s) | Self::Internal(s) => {
                let lower = s.to_lowercase();
                lower.contains("connection") && !lower.contains("block")
            }
            _ => false,
        }
    }

    /// Check if this is a consumer group missing error (NOGROUP).
    pub fn is_nogroup_error(&self) -> bool {
        match self {
            Self::Redis(e) => e.to_string().contains("NOGROUP"),
            Self::ConsumerGroup(s) | Self::Queue(s) => s.contains("NOGROUP"),
            _ => false,
        }
    }

    /// Categorize the error for smart retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transient(_) | Self::HandlerTimeout(_) => ErrorCategory::Transient,

            Self::Permanent(_) => ErrorCategory::Permanent,

            Self::RateLimited(_) => ErrorCategory::RateLimited,

            // Breaker rejections and dedupe suppressions are handled before a
            // job ever reaches retry accounting; Transient keeps them requeued
            // if they somehow do.
            Self::CircuitOpen | Self::DedupeSuppressed(_) => ErrorCategory::Transient,

            // Connection errors are transient - retry with backoff
            Self::Redis(e) => {
                let err_str = e.to_string().to_lowercase();
                if err_str.contains("busy") || err_str.contains("loading") {
                    ErrorCategory::RateLimited
                } else {
                    ErrorCategory::Transient
                }
            }

            // Queue/internal errors are usually transient
            Self::Queue(s) | Self::Internal(s) => {
                let lower = s.to_lowercase();
                if lower.contains("rate") || lower.contains("limit") || lower.contains("quota") {
                    ErrorCategory::RateLimited
                } else {
                    ErrorCategory::Transient
                }
            }

            // Consumer group errors are transient (group can be recreated)
            Self::ConsumerGroup(_) => ErrorCategory::Transient,

            // Bad data, don't retry
            Self::Serialization(_) | Self::JobParsing(_) | Self::Config(_) => {
                ErrorCategory::Permanent
            }

            // Untyped processing errors need inspection
            Self::Processing(s) => {
                let lower = s.to_lowercase();
                if lower.contains("rate")
                    || lower.contains("limit")
                    || lower.contains("quota")
                    || lower.contains("throttl")
                    || lower.contains("429")
                    || lower.contains("too many")
                {
                    ErrorCategory::RateLimited
                } else if lower.contains("invalid")
                    || lower.contains("malformed")
                    || lower.contains("not found")
                    || lower.contains("does not exist")
                    || lower.contains("forbidden")
                    || lower.contains("unauthorized")
                    || lower.contains("401")
                    || lower.contains("403")
                    || lower.contains("404")
                {
                    ErrorCategory::Permanent
                } else {
                    ErrorCategory::Transient
                }
            }
        }
    }
}

/// Error category for smart retry logic.
///
/// Different error categories have different retry strategies:
/// - `Transient`: Temporary issues that will likely resolve with retry
/// - `Permanent`: Errors that won't be fixed by retrying
/// - `RateLimited`: Service is overloaded, needs longer backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary error - retry with exponential backoff.
    Transient,

    /// Permanent error - do not retry, move to DLQ immediately.
    Permanent,

    /// Rate limited - retry with longer backoff.
    RateLimited,
}

impl ErrorCategory {
    /// Get the retry strategy for this error category.
    pub fn retry_strategy(&self) -> RetryStrategy {
        match self {
            Self::Transient => RetryStrategy::ExponentialBackoff {
                base_delay_ms: 1000,
                max_delay_ms: 30_000,
            },
            Self::Permanent => RetryStrategy::NoRetry,
            Self::RateLimited => RetryStrategy::ExponentialBackoff {
                base_delay_ms: 5000,
                max_delay_ms: 120_000,
            },
        }
    }

    /// Check if this error category should be retried.
    pub fn should_retry(&self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

/// Retry strategy for handling errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Do not retry, move to DLQ immediately.
    NoRetry,

    /// Retry with exponential backoff.
    ExponentialBackoff {
        /// Base delay in milliseconds.
        base_delay_ms: u64,
        /// Maximum delay in milliseconds.
        max_delay_ms: u64,
    },
}

impl RetryStrategy {
    /// Calculate the delay for a given attempt (0-indexed).
    ///
    /// Uses exponential backoff with additive jitter in
    /// `[0, 0.1 * base * 2^n]` to prevent thundering herd, capped at the
    /// configured maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::NoRetry => None,
            Self::ExponentialBackoff {
                base_delay_ms,
                max_delay_ms,
            } => {
                let exp_delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
                let jitter_ceiling = exp_delay / 10;
                let jitter = if jitter_ceiling == 0 {
                    0
                } else {
                    rand::rng().random_range(0..=jitter_ceiling)
                };
                let final_delay = exp_delay.saturating_add(jitter).min(*max_delay_ms);

                Some(Duration::from_millis(final_delay))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueueError::Processing("failed to send email".to_string());
        assert_eq!(err.to_string(), "Processing error: failed to send email");
    }

    #[test]
    fn test_is_connection_error() {
        let err = QueueError::Queue("connection refused".to_string());
        assert!(err.is_connection_error());

        let err = QueueError::Processing("invalid data".to_string());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_typed_variants_have_fixed_categories() {
        assert_eq!(
            QueueError::transient("anything").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            QueueError::permanent("anything").category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            QueueError::rate_limited("anything").category(),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            QueueError::HandlerTimeout(Duration::from_secs(30)).category(),
            ErrorCategory::Transient
        );
    }

    #[test]
    fn test_error_category_sniffing_transient() {
        let err = QueueError::Processing("503 service unavailable".to_string());
        assert_eq!(err.category(), ErrorCategory::Transient);

        let err = QueueError::Queue("connection reset".to_string());
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[test]
    fn test_error_category_sniffing_permanent() {
        let err = QueueError::JobParsing("invalid json".to_string());
        assert_eq!(err.category(), ErrorCategory::Permanent);

        let err = QueueError::Config("missing required field".to_string());
        assert_eq!(err.category(), ErrorCategory::Permanent);

        let err = QueueError::Processing("404 not found".to_string());
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_error_category_sniffing_rate_limited() {
        let err = QueueError::Processing("429 too many requests".to_string());
        assert_eq!(err.category(), ErrorCategory::RateLimited);

        let err = QueueError::Queue("quota exceeded".to_string());
        assert_eq!(err.category(), ErrorCategory::RateLimited);
    }

    #[test]
    fn test_retry_strategy_no_retry() {
        let strategy = RetryStrategy::NoRetry;
        assert_eq!(strategy.delay_for_attempt(0), None);
    }

    #[test]
    fn test_retry_strategy_exponential_bounds() {
        let strategy = RetryStrategy::ExponentialBackoff {
            base_delay_ms: 1000,
            max_delay_ms: 300_000,
        };

        for attempt in 0..4 {
            let delay = strategy.delay_for_attempt(attempt).unwrap().as_millis() as u64;
            let base = 1000u64 * 2u64.pow(attempt);
            assert!(delay >= base, "delay {} below base {}", delay, base);
            assert!(
                delay <= base + base / 10,
                "delay {} above jitter ceiling for base {}",
                delay,
                base
            );
        }
    }

    #[test]
    fn test_retry_strategy_delay_capping() {
        let strategy = RetryStrategy::ExponentialBackoff {
            base_delay_ms: 1000,
            max_delay_ms: 5000,
        };

        let delay = strategy.delay_for_attempt(10).unwrap();
        assert_eq!(delay.as_millis(), 5000);
    }

    #[test]
    fn test_error_category_should_retry() {
        assert!(ErrorCategory::Transient.should_retry());
        assert!(!ErrorCategory::Permanent.should_retry());
        assert!(ErrorCategory::RateLimited.should_retry());
    }
}
