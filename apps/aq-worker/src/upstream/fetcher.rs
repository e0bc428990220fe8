//! Resilient fetcher: timeouts, jittered backoff, breaker gating.

use jobqueue::CircuitBreaker;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{AirQualityProvider, ProviderReading, UpstreamError, UpstreamResult};
use crate::config::{CityTarget, FetcherSettings};

/// A successful fetch with its attempt accounting.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub reading: ProviderReading,
    /// Wall-clock time across all attempts, in milliseconds
    pub response_time_ms: u64,
    /// Retries consumed (0 = first attempt succeeded)
    pub retries: u32,
}

/// Backoff before retry attempt `n` (0-indexed):
/// `base * 2^n + U(0, 0.1 * base * 2^n)`, capped at `max`.
fn backoff_delay(settings: &FetcherSettings, attempt: u32) -> Duration {
    let base_ms = settings.base_delay.as_millis() as u64;
    let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let jitter_ceiling = exp / 10;
    let jitter = if jitter_ceiling == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ceiling)
    };
    Duration::from_millis(exp.saturating_add(jitter)).min(settings.max_delay)
}

/// Wraps a provider with retry, timeout, and circuit-breaker behavior.
///
/// The breaker is consulted before every attempt; an open circuit fails the
/// fetch immediately without consuming retries and without counting as a
/// failure. Only terminal outcomes are reported to the breaker.
pub struct ResilientFetcher<P: AirQualityProvider> {
    provider: P,
    breaker: Arc<CircuitBreaker>,
    settings: FetcherSettings,
    /// Consecutive terminal failures, feeding the api_failures alert
    failure_streak: AtomicU32,
}

impl<P: AirQualityProvider> ResilientFetcher<P> {
    pub fn new(provider: P, breaker: Arc<CircuitBreaker>, settings: FetcherSettings) -> Self {
        Self {
            provider,
            breaker,
            settings,
            failure_streak: AtomicU32::new(0),
        }
    }

    /// The shared breaker (also consulted by the scheduler gate).
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Current run of consecutive terminal failures.
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak.load(Ordering::SeqCst)
    }

    /// Fetch with retries.
    ///
    /// Total attempts are bounded by `1 + max_retries`; only retryable
    /// errors (network faults, 5xx, 429, 408) consume retries.
    pub async fn fetch(&self, city: &CityTarget) -> UpstreamResult<FetchOutcome> {
        let started = std::time::Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.allow() {
                debug!(city = %city.city, "Fetch rejected: circuit open");
                return Err(UpstreamError::CircuitOpen);
            }

            let result =
                match tokio::time::timeout(self.settings.timeout, self.provider.fetch_city(city))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(UpstreamError::Timeout),
                };

            match result {
                Ok(reading) => {
                    self.breaker.on_success();
                    self.failure_streak.store(0, Ordering::SeqCst);

                    let outcome = FetchOutcome {
                        reading,
                        response_time_ms: started.elapsed().as_millis() as u64,
                        retries: attempt,
                    };

                    info!(
                        city = %city.city,
                        aqi = outcome.reading.aqi,
                        retries = outcome.retries,
                        response_time_ms = outcome.response_time_ms,
                        "Fetched current reading"
                    );

                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    let delay = backoff_delay(&self.settings, attempt);
                    warn!(
                        city = %city.city,
                        attempt = attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch attempt failed, backing off"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.breaker.on_failure();
                    let streak = self.failure_streak.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(
                        city = %city.city,
                        attempts = attempt + 1,
                        failure_streak = streak,
                        error = %e,
                        "Fetch failed terminally"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain_readings::{Coordinates, Pollutant, WeatherSnapshot};
    use jobqueue::{CircuitBreakerConfig, CircuitState};
    use std::sync::Mutex;

    fn settings() -> FetcherSettings {
        FetcherSettings {
            timeout: Duration::from_secs(1),
            max_retries: 5,
            // Tiny delays keep the retry tests fast
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }

    fn reading(aqi: i32) -> ProviderReading {
        ProviderReading {
            coordinates: Coordinates::new(48.85, 2.35).unwrap(),
            aqi,
            main_pollutant: Pollutant::P2,
            aqi_cn: None,
            main_pollutant_cn: None,
            weather: WeatherSnapshot {
                humidity: 50.0,
                ..Default::default()
            },
        }
    }

    fn city() -> CityTarget {
        CityTarget {
            city: "Paris".to_string(),
            state: "Ile-de-France".to_string(),
            country: "France".to_string(),
            location_key: "paris".to_string(),
        }
    }

    /// Scripted provider: pops one outcome per call.
    struct ScriptedProvider {
        script: Mutex<Vec<UpstreamResult<ProviderReading>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(script: Vec<UpstreamResult<ProviderReading>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AirQualityProvider for ScriptedProvider {
        async fn fetch_city(&self, _city: &CityTarget) -> UpstreamResult<ProviderReading> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Err(UpstreamError::Http { status: 500 })
            } else {
                script.remove(0)
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn health_check(&self) -> UpstreamResult<bool> {
            Ok(true)
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(300),
        }))
    }

    #[test]
    fn test_backoff_delay_bounds() {
        let s = FetcherSettings {
            timeout: Duration::from_secs(1),
            max_retries: 5,
            base_delay: Duration::from_millis(30_000),
            max_delay: Duration::from_secs(10_000),
        };

        for attempt in 0..3 {
            let delay = backoff_delay(&s, attempt).as_millis() as u64;
            let base = 30_000u64 * 2u64.pow(attempt);
            assert!(delay >= base, "attempt {}: {} < {}", attempt, delay, base);
            assert!(
                delay <= base + base / 10,
                "attempt {}: {} above jitter ceiling",
                attempt,
                delay
            );
        }
    }

    #[test]
    fn test_backoff_delay_caps() {
        let s = FetcherSettings {
            timeout: Duration::from_secs(1),
            max_retries: 10,
            base_delay: Duration::from_millis(30_000),
            max_delay: Duration::from_millis(300_000),
        };
        assert_eq!(backoff_delay(&s, 8), Duration::from_millis(300_000));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let provider = ScriptedProvider::new(vec![Ok(reading(65))]);
        let fetcher = ResilientFetcher::new(provider, breaker(), settings());

        let outcome = fetcher.fetch(&city()).await.unwrap();
        assert_eq!(outcome.reading.aqi, 65);
        assert_eq!(outcome.retries, 0);
        assert_eq!(fetcher.failure_streak(), 0);
    }

    #[tokio::test]
    async fn test_retries_on_503_then_succeeds() {
        let provider = ScriptedProvider::new(vec![
            Err(UpstreamError::Http { status: 503 }),
            Err(UpstreamError::Http { status: 503 }),
            Ok(reading(210)),
        ]);
        let fetcher = ResilientFetcher::new(provider, breaker(), settings());

        let outcome = fetcher.fetch(&city()).await.unwrap();
        assert_eq!(outcome.reading.aqi, 210);
        assert_eq!(outcome.retries, 2);
        // Intermediate failures never touched the breaker
        assert_eq!(fetcher.breaker().state(), CircuitState::Closed);
        assert_eq!(fetcher.breaker().snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_non_retryable_4xx_fails_immediately() {
        let provider = ScriptedProvider::new(vec![Err(UpstreamError::Http { status: 401 })]);
        let fetcher = ResilientFetcher::new(provider, breaker(), settings());

        let result = fetcher.fetch(&city()).await;
        assert!(matches!(result, Err(UpstreamError::Http { status: 401 })));
        assert_eq!(fetcher.failure_streak(), 1);
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_max_retries() {
        let provider = ScriptedProvider::new(vec![]);
        let fetcher = ResilientFetcher::new(provider, breaker(), settings());

        let result = fetcher.fetch(&city()).await;
        assert!(result.is_err());
        // 1 initial + 5 retries
        assert_eq!(fetcher.provider.calls(), 6);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_without_attempts() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let provider = ScriptedProvider::new(vec![Ok(reading(65))]);
        let fetcher = ResilientFetcher::new(provider, Arc::clone(&breaker), settings());

        let result = fetcher.fetch(&city()).await;
        assert!(matches!(result, Err(UpstreamError::CircuitOpen)));
        // No HTTP call was made and no failure was counted
        assert_eq!(fetcher.provider.calls(), 0);
        assert_eq!(breaker.snapshot().failure_count, 5);
    }

    #[tokio::test]
    async fn test_breaker_trips_after_consecutive_terminal_failures() {
        let breaker = breaker();
        let provider = ScriptedProvider::new(vec![]);
        let mut s = settings();
        s.max_retries = 0; // every failure is terminal
        let fetcher = ResilientFetcher::new(provider, Arc::clone(&breaker), s);

        for _ in 0..5 {
            let _ = fetcher.fetch(&city()).await;
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(fetcher.failure_streak(), 5);

        // Sixth call is rejected by the breaker without reaching the provider
        let calls_before = fetcher.provider.calls();
        let result = fetcher.fetch(&city()).await;
        assert!(matches!(result, Err(UpstreamError::CircuitOpen)));
        assert_eq!(fetcher.provider.calls(), calls_before);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let provider = ScriptedProvider::new(vec![
            Err(UpstreamError::Http { status: 400 }),
            Ok(reading(65)),
        ]);
        let fetcher = ResilientFetcher::new(provider, breaker(), settings());

        let _ = fetcher.fetch(&city()).await;
        assert_eq!(fetcher.failure_streak(), 1);

        fetcher.fetch(&city()).await.unwrap();
        assert_eq!(fetcher.failure_streak(), 0);
    }
}
