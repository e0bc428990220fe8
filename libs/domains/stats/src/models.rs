use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use domain_readings::{PollutionLevel, Pollutant};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::StatsError;

/// An AQI extreme with the timestamp it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AqiExtreme {
    pub value: i32,
    pub time: DateTime<Utc>,
}

/// Averages for one hour of the day.
///
/// `avg_aqi` is `None` for hours with no data; those hours also appear in
/// `DailyAggregation::missing_data_hours`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyAverage {
    pub hour: u8,
    pub avg_aqi: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub avg_pressure: Option<f64>,
    pub record_count: u32,
}

impl HourlyAverage {
    pub fn empty(hour: u8) -> Self {
        Self {
            hour,
            avg_aqi: None,
            avg_temperature: None,
            avg_humidity: None,
            avg_pressure: None,
            record_count: 0,
        }
    }
}

/// Aggregated statistics for one (location, date), unique on that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAggregation {
    #[serde(rename = "_id", alias = "id")]
    pub id: Uuid,
    /// Date in YYYY-MM-DD form
    pub date: String,
    pub location: String,
    /// Mean AQI, rounded to 2 decimals
    pub avg_aqi: f64,
    pub max_aqi: AqiExtreme,
    pub min_aqi: AqiExtreme,
    pub dominant_pollutant: Pollutant,
    /// Band of the day's average AQI
    pub pollution_level: PollutionLevel,
    /// Count of readings per observed level
    pub level_distribution: HashMap<String, u32>,
    /// 24 entries, indexed by hour
    pub hourly_averages: Vec<HourlyAverage>,
    /// Hours (0-23) with no readings
    pub missing_data_hours: Vec<u8>,
    /// Hours whose average AQI exceeded 100
    pub unhealthy_hours: u32,
    pub record_count: u32,
    pub calculated_at: DateTime<Utc>,
}

impl DailyAggregation {
    /// Cache key for a finalized day: `daily-stats:{location}:{date}`.
    pub fn cache_key(location: &str, date: NaiveDate) -> String {
        format!("daily-stats:{}:{}", location, date.format("%Y-%m-%d"))
    }
}

/// Persistence operations for daily aggregations.
#[async_trait]
pub trait AggregationStore: Send + Sync {
    /// UPSERT on the unique (date, location) key.
    async fn upsert(&self, aggregation: &DailyAggregation) -> Result<(), StatsError>;

    /// Fetch one day's aggregation.
    async fn find(
        &self,
        location: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyAggregation>, StatsError>;

    /// Aggregations for a location in `[start, end]`, ascending by date.
    async fn find_range(
        &self,
        location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregation>, StatsError>;

    /// Remove aggregations older than the cutoff date. Returns removed count.
    async fn delete_older_than(&self, cutoff: NaiveDate) -> Result<u64, StatsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert_eq!(
            DailyAggregation::cache_key("paris", date),
            "daily-stats:paris:2026-03-14"
        );
    }

    #[test]
    fn test_empty_hourly_average() {
        let hour = HourlyAverage::empty(7);
        assert_eq!(hour.hour, 7);
        assert_eq!(hour.avg_aqi, None);
        assert_eq!(hour.record_count, 0);
    }
}
