//! Store configuration.
//!
//! All settings have defaults so the store can open with zero configuration
//! for local development and tests.

use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_MAX_RESULTS: usize = 1024;

/// Configuration supplied once at initialization.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Filesystem path of the database file.
    /// Env: `BROOK_DB_PATH`
    /// Default: `./brook.db`
    pub path: PathBuf,

    /// Maximum number of records returned by a single list query.
    /// Env: `BROOK_MAX_RESULTS`
    /// Default: `1024`
    pub max_results: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./brook.db"),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("BROOK_DB_PATH") {
            config.path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("BROOK_MAX_RESULTS") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_results = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid BROOK_MAX_RESULTS, using default");
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.max_results, DEFAULT_MAX_RESULTS);
        assert_eq!(config.path, PathBuf::from("./brook.db"));
    }

    #[test]
    fn deserializes_partial_json() {
        let config: StoreConfig = serde_json::from_str(r#"{"max_results": 16}"#).unwrap();
        assert_eq!(config.max_results, 16);
        assert_eq!(config.path, PathBuf::from("./brook.db"));
    }
}
