//! MongoDB connection management for the reading tiers, aggregations, and alerts.

mod connector;
mod health;

pub use connector::{connect, connect_with_retry, MongoError};
pub use health::ping;

#[cfg(feature = "config")]
pub use connector::{connect_from_config, connect_from_config_with_retry};
