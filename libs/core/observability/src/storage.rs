//! Typed metric helpers for tiered storage (migrations + range queries).

use metrics::{counter, gauge, histogram};

/// Metrics for tier migrations and the smart query router.
pub struct StorageMetrics;

impl StorageMetrics {
    /// Record a completed migration batch.
    pub fn record_migration(phase: &str, migrated: usize, errors: usize, duration_ms: u64) {
        counter!(
            "tier_migration_records_total",
            "phase" => phase.to_string()
        )
        .increment(migrated as u64);
        counter!(
            "tier_migration_errors_total",
            "phase" => phase.to_string()
        )
        .increment(errors as u64);
        histogram!(
            "tier_migration_duration_seconds",
            "phase" => phase.to_string()
        )
        .record(duration_ms as f64 / 1000.0);
    }

    /// Update the per-tier record count gauge.
    pub fn set_tier_count(tier: &str, count: u64) {
        gauge!(
            "tier_record_count",
            "tier" => tier.to_string()
        )
        .set(count as f64);
    }

    /// Record a smart range query.
    pub fn record_range_query(duration_ms: u64, tiers_hit: usize) {
        histogram!(
            "range_query_duration_seconds",
            "tiers" => tiers_hit.to_string()
        )
        .record(duration_ms as f64 / 1000.0);
    }
}
