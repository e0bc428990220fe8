use crate::{env_or_default, env_required, ConfigError, FromEnv};

/// MongoDB configuration
#[derive(Clone, Debug)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

impl MongoConfig {
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
        }
    }
}

impl FromEnv for MongoConfig {
    /// Requires MONGODB_URL to be set; MONGODB_DATABASE defaults to "air_quality"
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            uri: env_required("MONGODB_URL")?,
            database: env_or_default("MONGODB_DATABASE", "air_quality"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mongo_config_from_env_success() {
        temp_env::with_vars(
            [
                ("MONGODB_URL", Some("mongodb://localhost:27017")),
                ("MONGODB_DATABASE", Some("aq_test")),
            ],
            || {
                let config = MongoConfig::from_env().unwrap();
                assert_eq!(config.uri, "mongodb://localhost:27017");
                assert_eq!(config.database, "aq_test");
            },
        );
    }

    #[test]
    fn test_mongo_config_database_defaults() {
        temp_env::with_vars(
            [
                ("MONGODB_URL", Some("mongodb://localhost:27017")),
                ("MONGODB_DATABASE", None::<&str>),
            ],
            || {
                let config = MongoConfig::from_env().unwrap();
                assert_eq!(config.database, "air_quality");
            },
        );
    }

    #[test]
    fn test_mongo_config_from_env_missing() {
        temp_env::with_var_unset("MONGODB_URL", || {
            let config = MongoConfig::from_env();
            assert!(config.is_err());
            let err = config.unwrap_err();
            assert!(err.to_string().contains("MONGODB_URL"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_mongo_config_new() {
        let config = MongoConfig::new("mongodb://prod-host:27017", "air_quality");
        assert_eq!(config.uri, "mongodb://prod-host:27017");
        assert_eq!(config.database, "air_quality");
    }
}
