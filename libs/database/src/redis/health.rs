use redis::aio::ConnectionManager;

/// PING the server, returning Ok on a PONG reply.
///
/// Used by readiness probes.
pub async fn ping(manager: &ConnectionManager) -> redis::RedisResult<()> {
    let mut conn = manager.clone();
    let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
    if reply == "PONG" {
        Ok(())
    } else {
        Err(redis::RedisError::from((
            redis::ErrorKind::Server(redis::ServerErrorKind::ResponseError),
            "unexpected PING reply",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires actual Redis
    async fn test_ping() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let manager = crate::redis::connect(&url).await.unwrap();
        assert!(ping(&manager).await.is_ok());
    }
}
