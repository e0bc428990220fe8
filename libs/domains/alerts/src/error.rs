use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the alert engine and store.
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Alert {0} not found")]
    NotFound(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let id = Uuid::new_v4();
        let err = AlertError::NotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }
}
