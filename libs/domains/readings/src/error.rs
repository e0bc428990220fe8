use thiserror::Error;

/// Errors surfaced by the readings store and router.
#[derive(Error, Debug)]
pub enum ReadingError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid reading: {0}")]
    Invalid(String),
}

impl ReadingError {
    /// Whether the underlying Mongo error is a duplicate-key conflict.
    ///
    /// Inserts racing on the (location, timestamp) unique index resolve to
    /// a dedupe no-op rather than a failure.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            Self::Mongo(e) => e.to_string().contains("E11000"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_display() {
        let err = ReadingError::Invalid("aqi 700 out of range".to_string());
        assert!(err.to_string().contains("aqi 700"));
        assert!(!err.is_duplicate_key());
    }
}
