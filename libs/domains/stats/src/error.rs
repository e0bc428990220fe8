use thiserror::Error;

/// Errors surfaced by the aggregation pipeline.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Reading store error: {0}")]
    Readings(#[from] domain_readings::ReadingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No readings for {location} on {date}")]
    NoData { location: String, date: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data_display() {
        let err = StatsError::NoData {
            location: "paris".to_string(),
            date: "2026-03-14".to_string(),
        };
        assert!(err.to_string().contains("paris"));
        assert!(err.to_string().contains("2026-03-14"));
    }
}
