//! Upstream air-quality provider integration.
//!
//! This module contains the provider trait, the IQAir HTTP client, and the
//! resilient fetcher wrapping any provider with timeouts, jittered
//! exponential backoff, and circuit-breaker gating.

mod fetcher;
mod iqair;

pub use fetcher::{FetchOutcome, ResilientFetcher};
pub use iqair::IqAirProvider;

use async_trait::async_trait;
use domain_readings::{Coordinates, Pollutant, WeatherSnapshot};
use thiserror::Error;

use crate::config::CityTarget;

/// Error type for upstream operations.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Provider returned HTTP {status}")]
    Http { status: u16 },

    /// HTTP 200 but the body's status field was not "success"
    #[error("Provider API error: {0}")]
    Api(String),

    #[error("Failed to parse response: {0}")]
    Payload(String),

    #[error("Attempt timed out")]
    Timeout,

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

impl UpstreamError {
    /// Retry predicate: network-level faults, any 5xx, 429, and 408.
    /// Other 4xx responses and malformed payloads are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() && !e.is_builder()
            }
            Self::Http { status } => *status >= 500 || *status == 429 || *status == 408,
            Self::Timeout => true,
            Self::Api(_) | Self::Payload(_) | Self::CircuitOpen => false,
        }
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// A reading as reported by the provider, before persistence.
#[derive(Debug, Clone)]
pub struct ProviderReading {
    pub coordinates: Coordinates,
    pub aqi: i32,
    pub main_pollutant: Pollutant,
    /// China-standard AQI, reported alongside the US value
    pub aqi_cn: Option<i32>,
    pub main_pollutant_cn: Option<Pollutant>,
    pub weather: WeatherSnapshot,
}

/// Trait for air-quality providers.
#[async_trait]
pub trait AirQualityProvider: Send + Sync {
    /// Fetch the current reading for a city.
    async fn fetch_city(&self, city: &CityTarget) -> UpstreamResult<ProviderReading>;

    /// Provider name for logging and metrics.
    fn name(&self) -> &'static str;

    /// Health check - verify API connectivity.
    async fn health_check(&self) -> UpstreamResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_predicate_statuses() {
        assert!(UpstreamError::Http { status: 500 }.is_retryable());
        assert!(UpstreamError::Http { status: 503 }.is_retryable());
        assert!(UpstreamError::Http { status: 429 }.is_retryable());
        assert!(UpstreamError::Http { status: 408 }.is_retryable());

        assert!(!UpstreamError::Http { status: 400 }.is_retryable());
        assert!(!UpstreamError::Http { status: 401 }.is_retryable());
        assert!(!UpstreamError::Http { status: 404 }.is_retryable());
    }

    #[test]
    fn test_retry_predicate_terminal_kinds() {
        assert!(UpstreamError::Timeout.is_retryable());
        assert!(!UpstreamError::Api("no_nearest_station".to_string()).is_retryable());
        assert!(!UpstreamError::Payload("missing field".to_string()).is_retryable());
        assert!(!UpstreamError::CircuitOpen.is_retryable());
    }
}
