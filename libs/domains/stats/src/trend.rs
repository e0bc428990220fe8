//! Trend labeling and weekly summaries over daily aggregates.

use serde::Serialize;

use crate::models::DailyAggregation;

/// Direction of air-quality change over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Worsening,
    Stable,
}

/// Label a window of daily average AQIs.
///
/// Compares the mean of the first third against the mean of the last third:
/// more than 5 AQI lower is improving, more than 5 higher is worsening.
/// Windows too small to split (< 3 values) are stable.
pub fn trend_of(daily_avgs: &[f64]) -> Trend {
    let third = daily_avgs.len() / 3;
    if third == 0 {
        return Trend::Stable;
    }

    let first: f64 = daily_avgs[..third].iter().sum::<f64>() / third as f64;
    let last: f64 =
        daily_avgs[daily_avgs.len() - third..].iter().sum::<f64>() / third as f64;

    if last < first - 5.0 {
        Trend::Improving
    } else if last > first + 5.0 {
        Trend::Worsening
    } else {
        Trend::Stable
    }
}

/// Weekly roll-up over a sequence of daily aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct WeeklySummary {
    pub location: String,
    /// First date in the window (YYYY-MM-DD)
    pub start_date: String,
    /// Last date in the window (YYYY-MM-DD)
    pub end_date: String,
    /// Days covered by an aggregate
    pub days: u32,
    /// Mean of the daily averages, rounded to 2 decimals
    pub avg_aqi: f64,
    /// Days whose average AQI exceeded 100
    pub unhealthy_days: u32,
    /// Total unhealthy hours across the window
    pub unhealthy_hours: u32,
    pub trend: Trend,
}

/// Summarize a week of daily aggregates (ascending by date).
///
/// Unhealthy *days* count days with an average above 100; each day also
/// carries its own unhealthy-hour count, which is summed here.
pub fn weekly_summary(location: &str, days: &[DailyAggregation]) -> Option<WeeklySummary> {
    let (first, last) = (days.first()?, days.last()?);

    let avgs: Vec<f64> = days.iter().map(|d| d.avg_aqi).collect();
    let avg_aqi = (avgs.iter().sum::<f64>() / avgs.len() as f64 * 100.0).round() / 100.0;
    let unhealthy_days = days.iter().filter(|d| d.avg_aqi > 100.0).count() as u32;
    let unhealthy_hours = days.iter().map(|d| d.unhealthy_hours).sum();

    Some(WeeklySummary {
        location: location.to_string(),
        start_date: first.date.clone(),
        end_date: last.date.clone(),
        days: days.len() as u32,
        avg_aqi,
        unhealthy_days,
        unhealthy_hours,
        trend: trend_of(&avgs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::compute_daily;
    use chrono::{NaiveDate, TimeZone, Utc};
    use domain_readings::{
        Coordinates, Pollutant, Reading, ReadingMetadata, WeatherSnapshot,
    };

    #[test]
    fn test_trend_improving() {
        let avgs = [120.0, 115.0, 110.0, 90.0, 85.0, 80.0];
        assert_eq!(trend_of(&avgs), Trend::Improving);
    }

    #[test]
    fn test_trend_worsening() {
        let avgs = [60.0, 62.0, 61.0, 80.0, 85.0, 90.0];
        assert_eq!(trend_of(&avgs), Trend::Worsening);
    }

    #[test]
    fn test_trend_stable_within_threshold() {
        let avgs = [60.0, 62.0, 61.0, 63.0, 64.0, 62.0];
        assert_eq!(trend_of(&avgs), Trend::Stable);

        // Exactly 5 AQI apart is still stable
        let avgs = [60.0, 60.0, 60.0, 65.0, 65.0, 65.0];
        assert_eq!(trend_of(&avgs), Trend::Stable);
    }

    #[test]
    fn test_trend_small_windows_are_stable() {
        assert_eq!(trend_of(&[]), Trend::Stable);
        assert_eq!(trend_of(&[120.0]), Trend::Stable);
        assert_eq!(trend_of(&[120.0, 40.0]), Trend::Stable);
    }

    fn day_with_avg(date: &str, aqi: i32) -> DailyAggregation {
        let naive = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        let reading = Reading::new(
            "paris",
            Utc.from_utc_datetime(&naive.and_hms_opt(12, 0, 0).unwrap()),
            Coordinates::new(48.85, 2.35).unwrap(),
            aqi,
            Pollutant::P2,
            WeatherSnapshot {
                humidity: 50.0,
                ..Default::default()
            },
            ReadingMetadata::default(),
        )
        .unwrap();
        compute_daily("paris", naive, &[reading]).unwrap()
    }

    #[test]
    fn test_weekly_summary_counts_unhealthy_days() {
        let days = vec![
            day_with_avg("2026-03-09", 80),
            day_with_avg("2026-03-10", 120),
            day_with_avg("2026-03-11", 95),
            day_with_avg("2026-03-12", 160),
            day_with_avg("2026-03-13", 70),
            day_with_avg("2026-03-14", 60),
            day_with_avg("2026-03-15", 55),
        ];

        let summary = weekly_summary("paris", &days).unwrap();
        assert_eq!(summary.days, 7);
        assert_eq!(summary.unhealthy_days, 2);
        // Each unhealthy day here has exactly one unhealthy hour (noon)
        assert_eq!(summary.unhealthy_hours, 2);
        assert_eq!(summary.start_date, "2026-03-09");
        assert_eq!(summary.end_date, "2026-03-15");
        assert_eq!(summary.trend, Trend::Improving);
    }

    #[test]
    fn test_weekly_summary_empty_window() {
        assert!(weekly_summary("paris", &[]).is_none());
    }
}
