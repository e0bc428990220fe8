//! Shared connection helpers (startup retry with backoff).

mod retry;

pub use retry::{retry, retry_with_backoff, RetryConfig};
