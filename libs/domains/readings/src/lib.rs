//! Air-quality readings: model, tiered storage, migration, and smart queries.
//!
//! Readings are immutable once written. Each record lives in exactly one
//! tier at a time:
//!
//! ```text
//! hot (< 30 days)  ──02:00 UTC daily──>  warm (30-365 days)  ──03:00 UTC monthly──>  cold
//! ```
//!
//! Migration is a per-record move (insert into target with a new identity,
//! then delete from source). The query router fans reads out to only the
//! tiers intersecting the requested range.

pub mod cache;
mod error;
mod migration;
mod models;
mod mongodb;
mod repository;
mod router;

pub use cache::ReadingCache;
pub use error::ReadingError;
pub use migration::{MigrationPhase, MigrationStats, TierMigrator, HOT_RETENTION, WARM_RETENTION};
pub use models::{
    Coordinates, PollutionLevel, Pollutant, Reading, ReadingMetadata, Tier, WeatherSnapshot,
};
pub use mongodb::MongoReadingStore;
pub use repository::{RangeFilter, ReadingStore};
pub use router::{QueryRouter, RangeResult, TierCounts};

pub type ReadingResult<T> = Result<T, ReadingError>;
