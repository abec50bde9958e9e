//! Engine configuration
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`SYNTHETIC_` prefix)
//! 2. Configuration file (TOML, YAML or JSON by extension)
//! 3. Default values

use crate::collection::EmptyPatternPolicy;
use crate::error::{CalcError, Result};
use crate::resolver::DEFAULT_MAX_RESOLUTION_PASSES;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SYNTHETIC_";

/// Formula engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Safety ceiling for computed-variable fixpoint passes
    pub max_resolution_passes: usize,
    /// Let formulas evaluate with raw alternate-state inputs
    pub allow_unresolved_states: bool,
    pub cache_enabled: bool,
    pub cache_capacity: usize,
    /// Handling of empty `|` components in collection patterns
    pub empty_pattern_policy: EmptyPatternPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_resolution_passes: DEFAULT_MAX_RESOLUTION_PASSES,
            allow_unresolved_states: false,
            cache_enabled: false,
            cache_capacity: 1024,
            empty_pattern_policy: EmptyPatternPolicy::Skip,
        }
    }
}

impl EngineConfig {
    /// Load from an optional file plus `SYNTHETIC_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Load with a custom environment prefix
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .ok_or_else(|| CalcError::config("Config file must have an extension"))?;
            figment = match extension {
                "toml" => figment.merge(Toml::file(path)),
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                "json" => figment.merge(Json::file(path)),
                _ => {
                    return Err(CalcError::config(format!(
                        "Unsupported config file format: {}",
                        extension
                    )))
                },
            };
        }

        let config: Self = figment
            .merge(Env::prefixed(env_prefix))
            .extract()
            .map_err(|e| CalcError::config(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_resolution_passes == 0 {
            return Err(CalcError::config("max_resolution_passes must be at least 1"));
        }
        if self.cache_enabled && self.cache_capacity == 0 {
            return Err(CalcError::config(
                "cache_capacity must be at least 1 when the cache is enabled",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_config(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::load_with_prefix(None, "SYNTHETIC_TEST_DEFAULTS_").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_resolution_passes, 100);
        assert!(!config.allow_unresolved_states);
    }

    #[test]
    fn test_yaml_file() {
        let file = temp_config(
            ".yaml",
            "max_resolution_passes: 20\ncache_enabled: true\nempty_pattern_policy: reject\n",
        );
        let config =
            EngineConfig::load_with_prefix(Some(file.path()), "SYNTHETIC_TEST_YAML_").unwrap();
        assert_eq!(config.max_resolution_passes, 20);
        assert!(config.cache_enabled);
        assert_eq!(config.cache_capacity, 1024);
        assert_eq!(config.empty_pattern_policy, EmptyPatternPolicy::Reject);
    }

    #[test]
    fn test_toml_and_json_files() {
        let file = temp_config(".toml", "allow_unresolved_states = true\n");
        let config =
            EngineConfig::load_with_prefix(Some(file.path()), "SYNTHETIC_TEST_TOML_").unwrap();
        assert!(config.allow_unresolved_states);

        let file = temp_config(".json", r#"{"cache_capacity": 8}"#);
        let config =
            EngineConfig::load_with_prefix(Some(file.path()), "SYNTHETIC_TEST_JSON_").unwrap();
        assert_eq!(config.cache_capacity, 8);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = temp_config(".yaml", "max_resolution_passes: 20\n");
        std::env::set_var("SYNTHETIC_TEST_ENV_MAX_RESOLUTION_PASSES", "7");
        let config =
            EngineConfig::load_with_prefix(Some(file.path()), "SYNTHETIC_TEST_ENV_").unwrap();
        std::env::remove_var("SYNTHETIC_TEST_ENV_MAX_RESOLUTION_PASSES");
        assert_eq!(config.max_resolution_passes, 7);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = temp_config(".ini", "x=1");
        assert!(matches!(
            EngineConfig::load_with_prefix(Some(file.path()), "SYNTHETIC_TEST_INI_"),
            Err(CalcError::Config(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig {
            max_resolution_passes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_resolution_passes = 5;
        config.cache_enabled = true;
        config.cache_capacity = 0;
        assert!(config.validate().is_err());

        config.cache_capacity = 1;
        assert!(config.validate().is_ok());
    }
}
