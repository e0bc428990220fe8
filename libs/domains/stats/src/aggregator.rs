//! The daily aggregation pipeline.

use chrono::{NaiveDate, TimeZone, Utc};
use domain_readings::{
    PollutionLevel, Pollutant, RangeFilter, Reading, ReadingCache, ReadingStore, Tier,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::StatsError;
use crate::models::{AggregationStore, AqiExtreme, DailyAggregation, HourlyAverage};

const FINAL_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);
const PARTIAL_CACHE_TTL: Duration = Duration::from_secs(3600);

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Default, Clone, Copy)]
struct HourBucket {
    count: u32,
    aqi_sum: i64,
    temperature_sum: f64,
    humidity_sum: f64,
    pressure_sum: f64,
}

/// Compute the aggregation for one (location, date) in a single pass.
///
/// Returns `None` when the slice holds no readings for the day.
pub fn compute_daily(
    location: &str,
    date: NaiveDate,
    readings: &[Reading],
) -> Option<DailyAggregation> {
    let mut count: u32 = 0;
    let mut aqi_sum: i64 = 0;
    let mut max_aqi: Option<AqiExtreme> = None;
    let mut min_aqi: Option<AqiExtreme> = None;
    let mut hours = [HourBucket::default(); 24];
    let mut pollutant_counts: HashMap<Pollutant, u32> = HashMap::new();
    let mut level_distribution: HashMap<String, u32> = HashMap::new();

    for reading in readings {
        count += 1;
        aqi_sum += reading.aqi as i64;

        match &max_aqi {
            Some(current) if current.value >= reading.aqi => {}
            _ => {
                max_aqi = Some(AqiExtreme {
                    value: reading.aqi,
                    time: reading.timestamp,
                })
            }
        }
        match &min_aqi {
            Some(current) if current.value <= reading.aqi => {}
            _ => {
                min_aqi = Some(AqiExtreme {
                    value: reading.aqi,
                    time: reading.timestamp,
                })
            }
        }

        let bucket = &mut hours[reading.hour() as usize];
        bucket.count += 1;
        bucket.aqi_sum += reading.aqi as i64;
        bucket.temperature_sum += reading.weather.temperature;
        bucket.humidity_sum += reading.weather.humidity;
        bucket.pressure_sum += reading.weather.pressure;

        *pollutant_counts.entry(reading.main_pollutant).or_insert(0) += 1;
        *level_distribution
            .entry(reading.level.to_string())
            .or_insert(0) += 1;
    }

    let (Some(max_aqi), Some(min_aqi)) = (max_aqi, min_aqi) else {
        return None;
    };

    let avg_aqi = round2(aqi_sum as f64 / count as f64);

    let mut hourly_averages = Vec::with_capacity(24);
    let mut missing_data_hours = Vec::new();
    let mut unhealthy_hours = 0u32;

    for (hour, bucket) in hours.iter().enumerate() {
        if bucket.count == 0 {
            missing_data_hours.push(hour as u8);
            hourly_averages.push(HourlyAverage::empty(hour as u8));
            continue;
        }

        let n = bucket.count as f64;
        let hour_avg = round2(bucket.aqi_sum as f64 / n);
        if hour_avg > 100.0 {
            unhealthy_hours += 1;
        }

        hourly_averages.push(HourlyAverage {
            hour: hour as u8,
            avg_aqi: Some(hour_avg),
            avg_temperature: Some(round2(bucket.temperature_sum / n)),
            avg_humidity: Some(round2(bucket.humidity_sum / n)),
            avg_pressure: Some(round2(bucket.pressure_sum / n)),
            record_count: bucket.count,
        });
    }

    // argmax pollutant frequency; ties resolve to the lexically first code
    // so repeated runs stay deterministic
    let dominant_pollutant = pollutant_counts
        .iter()
        .max_by(|a, b| {
            a.1.cmp(b.1)
                .then_with(|| b.0.to_string().cmp(&a.0.to_string()))
        })
        .map(|(pollutant, _)| *pollutant)
        .unwrap_or_default();

    Some(DailyAggregation {
        id: Uuid::new_v4(),
        date: date.format("%Y-%m-%d").to_string(),
        location: location.to_string(),
        avg_aqi,
        max_aqi,
        min_aqi,
        dominant_pollutant,
        pollution_level: PollutionLevel::from_aqi(avg_aqi.round() as i32),
        level_distribution,
        hourly_averages,
        missing_data_hours,
        unhealthy_hours,
        record_count: count,
        calculated_at: Utc::now(),
    })
}

/// Runs the aggregation pipeline against the stores.
pub struct DailyAggregator<R: ReadingStore, A: AggregationStore> {
    readings: Arc<R>,
    aggregations: Arc<A>,
    cache: ReadingCache,
}

impl<R: ReadingStore, A: AggregationStore> DailyAggregator<R, A> {
    pub fn new(readings: Arc<R>, aggregations: Arc<A>, cache: ReadingCache) -> Self {
        Self {
            readings,
            aggregations,
            cache,
        }
    }

    /// Aggregate one (location, date).
    ///
    /// `finalize = true` UPSERTs the document and caches it for 24h; a
    /// partial-day run (`finalize = false`) skips the UPSERT and caches for
    /// 1h. Both return the computed value.
    #[instrument(skip(self))]
    pub async fn aggregate_day(
        &self,
        location: &str,
        date: NaiveDate,
        finalize: bool,
    ) -> Result<DailyAggregation, StatsError> {
        let start = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
        let end = start + chrono::Duration::days(1);

        let filter = RangeFilter {
            location: Some(location.to_string()),
            min_aqi: None,
        };

        // Recent days live in the hot tier; re-aggregating an aged day
        // falls through to warm.
        let mut readings = self
            .readings
            .find_range(Tier::Hot, start, end, &filter, 10_000)
            .await?;
        if readings.is_empty() {
            readings = self
                .readings
                .find_range(Tier::Warm, start, end, &filter, 10_000)
                .await?;
        }

        debug!(
            location,
            %date,
            count = readings.len(),
            finalize,
            "Computing daily aggregation"
        );

        let aggregation =
            compute_daily(location, date, &readings).ok_or_else(|| StatsError::NoData {
                location: location.to_string(),
                date: date.format("%Y-%m-%d").to_string(),
            })?;

        let cache_key = DailyAggregation::cache_key(location, date);

        if finalize {
            self.aggregations.upsert(&aggregation).await?;
            self.cache
                .set(&cache_key, &aggregation, FINAL_CACHE_TTL)
                .await?;
            info!(
                location,
                %date,
                avg_aqi = aggregation.avg_aqi,
                records = aggregation.record_count,
                "Daily aggregation finalized"
            );
        } else {
            self.cache
                .set(&cache_key, &aggregation, PARTIAL_CACHE_TTL)
                .await?;
        }

        Ok(aggregation)
    }

    /// Cached aggregation for a day, falling back to the store.
    pub async fn get_day(
        &self,
        location: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyAggregation>, StatsError> {
        let cache_key = DailyAggregation::cache_key(location, date);

        if let Some(cached) = self.cache.get::<DailyAggregation>(&cache_key).await? {
            return Ok(Some(cached));
        }

        self.aggregations.find(location, date).await
    }

    /// Aggregations over a date range (for trend and weekly summaries).
    pub async fn range(
        &self,
        location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregation>, StatsError> {
        self.aggregations.find_range(location, start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_readings::{Coordinates, ReadingMetadata, WeatherSnapshot};

    fn reading_at(hour: u32, aqi: i32, pollutant: Pollutant) -> Reading {
        Reading::new(
            "paris",
            Utc.with_ymd_and_hms(2026, 3, 14, hour, 0, 0).unwrap(),
            Coordinates::new(48.8566, 2.3522).unwrap(),
            aqi,
            pollutant,
            WeatherSnapshot {
                temperature: 10.0 + hour as f64,
                humidity: 50.0,
                pressure: 1013.0,
                wind_speed: 2.0,
                wind_direction: 180.0,
            },
            ReadingMetadata::default(),
        )
        .unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    #[test]
    fn test_empty_day_yields_none() {
        assert!(compute_daily("paris", date(), &[]).is_none());
    }

    #[test]
    fn test_full_day_ascending_aqi() {
        // 24 hourly readings with aqi 50..=73
        let readings: Vec<Reading> = (0..24)
            .map(|h| reading_at(h, 50 + h as i32, Pollutant::P2))
            .collect();

        let agg = compute_daily("paris", date(), &readings).unwrap();

        assert_eq!(agg.date, "2026-03-14");
        assert_eq!(agg.record_count, 24);
        assert!((agg.avg_aqi - 61.5).abs() < f64::EPSILON);
        assert_eq!(agg.max_aqi.value, 73);
        assert_eq!(agg.max_aqi.time.format("%H").to_string(), "23");
        assert_eq!(agg.min_aqi.value, 50);
        assert_eq!(agg.min_aqi.time.format("%H").to_string(), "00");
        assert_eq!(agg.hourly_averages.len(), 24);
        assert!(agg.missing_data_hours.is_empty());
        assert_eq!(agg.pollution_level, PollutionLevel::Moderate);
        assert_eq!(agg.dominant_pollutant, Pollutant::P2);
        assert_eq!(agg.unhealthy_hours, 0);
    }

    #[test]
    fn test_missing_hours_are_marked() {
        let readings = vec![
            reading_at(0, 40, Pollutant::P2),
            reading_at(12, 60, Pollutant::P2),
        ];

        let agg = compute_daily("paris", date(), &readings).unwrap();

        assert_eq!(agg.hourly_averages.len(), 24);
        assert_eq!(agg.missing_data_hours.len(), 22);
        assert!(!agg.missing_data_hours.contains(&0));
        assert!(!agg.missing_data_hours.contains(&12));
        assert_eq!(agg.hourly_averages[0].avg_aqi, Some(40.0));
        assert_eq!(agg.hourly_averages[1].avg_aqi, None);
        assert_eq!(agg.hourly_averages[12].record_count, 1);
    }

    #[test]
    fn test_multiple_readings_per_hour_average() {
        let mut readings = vec![reading_at(9, 60, Pollutant::P2)];
        let mut second = reading_at(9, 70, Pollutant::P2);
        second.timestamp += chrono::Duration::minutes(30);
        readings.push(second);

        let agg = compute_daily("paris", date(), &readings).unwrap();
        assert_eq!(agg.hourly_averages[9].avg_aqi, Some(65.0));
        assert_eq!(agg.hourly_averages[9].record_count, 2);
    }

    #[test]
    fn test_dominant_pollutant_argmax() {
        let readings = vec![
            reading_at(1, 50, Pollutant::O3),
            reading_at(2, 50, Pollutant::P2),
            reading_at(3, 50, Pollutant::P2),
            reading_at(4, 50, Pollutant::No2),
        ];

        let agg = compute_daily("paris", date(), &readings).unwrap();
        assert_eq!(agg.dominant_pollutant, Pollutant::P2);
        assert_eq!(agg.level_distribution.get("Good"), Some(&4));
    }

    #[test]
    fn test_unhealthy_hours_counted() {
        let readings = vec![
            reading_at(8, 180, Pollutant::P2),
            reading_at(9, 90, Pollutant::P2),
            reading_at(10, 140, Pollutant::P2),
        ];

        let agg = compute_daily("paris", date(), &readings).unwrap();
        assert_eq!(agg.unhealthy_hours, 2);
    }

    #[test]
    fn test_avg_rounds_to_two_decimals() {
        let readings = vec![
            reading_at(1, 50, Pollutant::P2),
            reading_at(2, 51, Pollutant::P2),
            reading_at(3, 51, Pollutant::P2),
        ];

        let agg = compute_daily("paris", date(), &readings).unwrap();
        // 152 / 3 = 50.666... -> 50.67
        assert!((agg.avg_aqi - 50.67).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let readings: Vec<Reading> = (0..24)
            .map(|h| reading_at(h, 50 + h as i32, Pollutant::P2))
            .collect();

        let a = compute_daily("paris", date(), &readings).unwrap();
        let b = compute_daily("paris", date(), &readings).unwrap();

        assert_eq!(a.avg_aqi, b.avg_aqi);
        assert_eq!(a.max_aqi, b.max_aqi);
        assert_eq!(a.min_aqi, b.min_aqi);
        assert_eq!(a.hourly_averages, b.hourly_averages);
        assert_eq!(a.level_distribution, b.level_distribution);
    }
}
