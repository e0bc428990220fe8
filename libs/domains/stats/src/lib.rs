//! Daily aggregation pipeline and trend analysis.
//!
//! One pass over a day's readings produces the `DailyAggregation` document:
//! averages, extremes with capture times, per-hour buckets, pollutant and
//! level distributions, and gap accounting. Full-day runs UPSERT on the
//! unique (date, location) key, so concurrent aggregation is safe and
//! idempotent; partial-day runs only compute and cache.

mod aggregator;
mod error;
mod models;
mod mongodb;
mod trend;

pub use aggregator::{compute_daily, DailyAggregator};
pub use error::StatsError;
pub use models::{AggregationStore, AqiExtreme, DailyAggregation, HourlyAverage};
pub use mongodb::MongoAggregationStore;
pub use trend::{trend_of, weekly_summary, Trend, WeeklySummary};

pub type StatsResult<T> = Result<T, StatsError>;
