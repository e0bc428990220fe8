//! Redis connection management for queue streams and the query cache.

mod connector;
mod health;

pub use connector::{connect, connect_with_retry};
pub use health::ping;

#[cfg(feature = "config")]
pub use connector::{connect_from_config, connect_from_config_with_retry};
