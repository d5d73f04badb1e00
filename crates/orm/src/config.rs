//! Runtime configuration for hydration and storage
//!
//! Values come from code (`OrmConfig::default()`, `OrmConfig::testing()`) or
//! from environment variables through [`OrmConfig::from_env`].

use std::env;
use std::str::FromStr;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}

/// ORM configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OrmConfig {
    /// Depth used by `Crud::find` helpers that take no explicit depth
    pub default_depth: u32,
    /// Largest depth a caller may request
    pub max_depth: u32,
    /// Hydrate sibling relationship edges concurrently
    pub parallel_siblings: bool,
    /// Connection string for `PostgresStorage::connect`
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    pub acquire_timeout: u64,
}

impl OrmConfig {
    pub fn new() -> Self {
        Self {
            default_depth: 1,
            max_depth: 8,
            parallel_siblings: true,
            database_url: None,
            max_connections: 10,
            acquire_timeout: 30,
        }
    }

    /// Configuration for tests: sequential traversal so call counts are deterministic
    pub fn testing() -> Self {
        Self {
            parallel_siblings: false,
            max_connections: 2,
            ..Self::new()
        }
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();

        if let Some(depth) = parse_env("RELGRAPH_DEFAULT_DEPTH", "non-negative integer")? {
            config.default_depth = depth;
        }

        if let Some(depth) = parse_env("RELGRAPH_MAX_DEPTH", "non-negative integer")? {
            config.max_depth = depth;
        }

        if let Some(parallel) = parse_env("RELGRAPH_PARALLEL_SIBLINGS", "true or false")? {
            config.parallel_siblings = parallel;
        }

        config.database_url = env::var("DATABASE_URL").ok();

        if let Some(max) = parse_env("RELGRAPH_MAX_CONNECTIONS", "positive integer")? {
            config.max_connections = max;
        }

        if let Some(timeout) = parse_env("RELGRAPH_ACQUIRE_TIMEOUT", "seconds as integer")? {
            config.acquire_timeout = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_depth > self.max_depth {
            return Err(ConfigError::ValidationFailed {
                field: "default_depth".to_string(),
                reason: format!(
                    "default depth {} exceeds max depth {}",
                    self.default_depth, self.max_depth
                ),
            });
        }

        if self.max_connections == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "max_connections".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(ConfigError::InvalidValue {
                    field: "database_url".to_string(),
                    value: url.clone(),
                    expected: "postgres:// or postgresql:// URL".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: FromStr>(var: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: var.to_string(),
                value: raw,
                expected: expected.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "RELGRAPH_DEFAULT_DEPTH",
            "RELGRAPH_MAX_DEPTH",
            "RELGRAPH_PARALLEL_SIBLINGS",
            "DATABASE_URL",
            "RELGRAPH_MAX_CONNECTIONS",
            "RELGRAPH_ACQUIRE_TIMEOUT",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = OrmConfig::from_env().unwrap();
        assert_eq!(config, OrmConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("RELGRAPH_DEFAULT_DEPTH", "2");
        env::set_var("RELGRAPH_MAX_DEPTH", "4");
        env::set_var("RELGRAPH_PARALLEL_SIBLINGS", "false");
        env::set_var("DATABASE_URL", "postgres://localhost/relgraph_test");

        let config = OrmConfig::from_env().unwrap();
        assert_eq!(config.default_depth, 2);
        assert_eq!(config.max_depth, 4);
        assert!(!config.parallel_siblings);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/relgraph_test"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        clear_env();
        env::set_var("RELGRAPH_MAX_DEPTH", "deep");

        match OrmConfig::from_env() {
            Err(ConfigError::InvalidValue { field, value, .. }) => {
                assert_eq!(field, "RELGRAPH_MAX_DEPTH");
                assert_eq!(value, "deep");
            }
            other => panic!("Expected invalid value, got {:?}", other),
        }

        clear_env();
    }

    #[test]
    fn test_default_depth_above_max_is_invalid() {
        let config = OrmConfig {
            default_depth: 5,
            max_depth: 2,
            ..OrmConfig::new()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_postgres_url_is_invalid() {
        let config = OrmConfig {
            database_url: Some("mysql://localhost/db".to_string()),
            ..OrmConfig::new()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
    }
}
