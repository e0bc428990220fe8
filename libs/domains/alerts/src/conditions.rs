//! Threshold configuration and signal-to-condition matching.

use serde::Serialize;

use crate::models::AlertCondition;

/// Configurable thresholds for the built-in conditions.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AlertThresholds {
    /// Consecutive upstream failures before an api_failures alert
    pub consecutive_api_failures: u32,
    /// AQI at or above this (and below extreme) is high_pollution
    pub high_pollution_aqi: i32,
    /// AQI at or above this is extreme_pollution
    pub extreme_pollution_aqi: i32,
    /// Waiting jobs at or above this is queue_backlog
    pub queue_backlog_size: usize,
    /// Failure rate at or above this is system_error_rate
    pub system_error_rate: f64,
    /// Storage usage fraction at or above this is storage_usage
    pub storage_usage_threshold: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            consecutive_api_failures: 5,
            high_pollution_aqi: 150,
            extreme_pollution_aqi: 200,
            queue_backlog_size: 100,
            system_error_rate: 0.1,
            storage_usage_threshold: 0.8,
        }
    }
}

/// A typed measurement offered to the engine for evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "signal", content = "value")]
pub enum AlertSignal {
    /// Current run of consecutive upstream fetch failures
    ApiFailureStreak(u32),
    /// A fresh AQI observation for a location
    Aqi { location: String, value: i32 },
    /// Waiting jobs on a queue
    QueueBacklog { queue: String, waiting: usize },
    /// Job failure rate on a queue, in [0,1]
    SystemErrorRate { queue: String, rate: f64 },
    /// Storage usage fraction, in [0,1]
    StorageUsage { usage: f64 },
}

/// Which condition, if any, a signal trips at the given thresholds.
pub fn match_signal(thresholds: &AlertThresholds, signal: &AlertSignal) -> Option<AlertCondition> {
    match signal {
        AlertSignal::ApiFailureStreak(streak) => {
            (*streak >= thresholds.consecutive_api_failures).then_some(AlertCondition::ApiFailures)
        }
        AlertSignal::Aqi { value, .. } => {
            if *value >= thresholds.extreme_pollution_aqi {
                Some(AlertCondition::ExtremePollution)
            } else if *value >= thresholds.high_pollution_aqi {
                Some(AlertCondition::HighPollution)
            } else {
                None
            }
        }
        AlertSignal::QueueBacklog { waiting, .. } => {
            (*waiting >= thresholds.queue_backlog_size).then_some(AlertCondition::QueueBacklog)
        }
        AlertSignal::SystemErrorRate { rate, .. } => {
            (*rate >= thresholds.system_error_rate).then_some(AlertCondition::SystemErrorRate)
        }
        AlertSignal::StorageUsage { usage } => {
            (*usage >= thresholds.storage_usage_threshold).then_some(AlertCondition::StorageUsage)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> AlertThresholds {
        AlertThresholds::default()
    }

    #[test]
    fn test_aqi_band_selection() {
        let t = thresholds();

        let low = AlertSignal::Aqi {
            location: "paris".into(),
            value: 120,
        };
        assert_eq!(match_signal(&t, &low), None);

        let high = AlertSignal::Aqi {
            location: "paris".into(),
            value: 150,
        };
        assert_eq!(match_signal(&t, &high), Some(AlertCondition::HighPollution));

        let near_extreme = AlertSignal::Aqi {
            location: "paris".into(),
            value: 199,
        };
        assert_eq!(
            match_signal(&t, &near_extreme),
            Some(AlertCondition::HighPollution)
        );

        // aqi >= extreme threshold is extreme, not high
        let extreme = AlertSignal::Aqi {
            location: "paris".into(),
            value: 210,
        };
        assert_eq!(
            match_signal(&t, &extreme),
            Some(AlertCondition::ExtremePollution)
        );
    }

    #[test]
    fn test_api_failure_streak() {
        let t = thresholds();
        assert_eq!(match_signal(&t, &AlertSignal::ApiFailureStreak(4)), None);
        assert_eq!(
            match_signal(&t, &AlertSignal::ApiFailureStreak(5)),
            Some(AlertCondition::ApiFailures)
        );
    }

    #[test]
    fn test_queue_backlog() {
        let t = thresholds();
        let below = AlertSignal::QueueBacklog {
            queue: "airQuality".into(),
            waiting: 99,
        };
        assert_eq!(match_signal(&t, &below), None);

        let at = AlertSignal::QueueBacklog {
            queue: "airQuality".into(),
            waiting: 100,
        };
        assert_eq!(match_signal(&t, &at), Some(AlertCondition::QueueBacklog));
    }

    #[test]
    fn test_error_rate_and_storage() {
        let t = thresholds();
        assert_eq!(
            match_signal(
                &t,
                &AlertSignal::SystemErrorRate {
                    queue: "airQuality".into(),
                    rate: 0.15
                }
            ),
            Some(AlertCondition::SystemErrorRate)
        );
        assert_eq!(
            match_signal(&t, &AlertSignal::StorageUsage { usage: 0.85 }),
            Some(AlertCondition::StorageUsage)
        );
        assert_eq!(
            match_signal(&t, &AlertSignal::StorageUsage { usage: 0.5 }),
            None
        );
    }
}
