//! Database connectors for the air-quality pipeline.
//!
//! Feature-gated backends:
//! - `mongodb` - document store holding the reading tiers, aggregations, and alerts
//! - `redis` - queue streams, delayed-job sets, and the query cache
//! - `config` - `core_config` integration for env-driven connection settings

pub mod common;

#[cfg(feature = "mongodb")]
pub mod mongodb;

#[cfg(feature = "redis")]
pub mod redis;

pub use common::{retry, retry_with_backoff, RetryConfig};
