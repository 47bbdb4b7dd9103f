//! Cache configuration as embedded in the build tool's project file.

use serde::Deserialize;
use std::path::PathBuf;

/// Configuration accepted at store open.
///
/// Deserialized from the `[cache]` table of the project configuration.
/// Only the store location and the kill switch live here; everything else
/// about the cache is behavioral, not configurable.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Root directory of the on-disk store.
    pub directory: PathBuf,

    /// If `true`, every hit attempt misses and recording is a no-op.
    #[serde(default)]
    pub disabled: bool,
}

impl CacheConfig {
    /// Creates a configuration with caching enabled.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            disabled: false,
        }
    }

    /// Parses a configuration from TOML text containing a `[cache]` table.
    ///
    /// Useful for testing without filesystem dependencies.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        #[derive(Deserialize)]
        struct Root {
            cache: CacheConfig,
        }
        toml::from_str::<Root>(content).map(|root| root.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let config = CacheConfig::from_toml_str(
            r#"
[cache]
directory = ".anvil/cache"
"#,
        )
        .unwrap();
        assert_eq!(config.directory, PathBuf::from(".anvil/cache"));
        assert!(!config.disabled);
    }

    #[test]
    fn parse_disabled() {
        let config = CacheConfig::from_toml_str(
            r#"
[cache]
directory = "/var/cache/anvil"
disabled = true
"#,
        )
        .unwrap();
        assert!(config.disabled);
    }

    #[test]
    fn missing_directory_rejected() {
        let err = CacheConfig::from_toml_str("[cache]\n").unwrap_err();
        assert!(err.to_string().contains("directory"));
    }

    #[test]
    fn new_defaults_to_enabled() {
        let config = CacheConfig::new("/tmp/store");
        assert!(!config.disabled);
    }
}
