use mongodb::bson::doc;
use mongodb::Client;

use super::MongoError;

/// Ping the server through the given client.
///
/// Used by readiness probes.
pub async fn ping(client: &Client, database: &str) -> Result<(), MongoError> {
    client
        .database(database)
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(|e| MongoError::ConnectionFailed(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires actual MongoDB
    async fn test_ping() {
        let url = std::env::var("MONGODB_URL")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let client = crate::mongodb::connect(&url).await.unwrap();
        assert!(ping(&client, "admin").await.is_ok());
    }
}
