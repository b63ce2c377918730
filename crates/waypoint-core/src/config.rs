//! Engine configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working configuration. The engine consumes this configuration; it never
//! writes it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result, ResultExt};
use crate::registry::ToolRegistry;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    /// Token buckets keyed by action name; unlisted actions are unlimited
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
    pub planning: PlanningConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker pool size for batch requests and default ceiling for parallel
    pub max_parallel: usize,
    /// Deadline applied to calls whose request does not set one
    pub default_deadline_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            default_deadline_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// How long a plan step may stay rate limited before it fails
    pub rate_limit_max_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            rate_limit_max_wait_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    /// Overrides keyed by tool category; 0 disables caching for the category
    pub ttl_secs: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            ttl_secs: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, category: &str) -> Duration {
        let secs = self
            .ttl_secs
            .get(category)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Refill rate in tokens per second
    pub per_second: f64,
    /// Bucket capacity
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Longest a caller waits for a token
    #[serde(default)]
    pub max_wait_ms: u64,
}

fn default_burst() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Steps without explicit dependencies depend on the preceding step
    pub implicit_dependencies: bool,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            implicit_dependencies: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).with_context("Failed to parse configuration")
    }

    /// Reads and parses a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| EngineError::FileSystem {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&source)
    }

    /// `$XDG_CONFIG_HOME/waypoint/config.toml`, if it exists.
    pub fn default_path() -> Option<PathBuf> {
        xdg::BaseDirectories::with_prefix("waypoint").find_config_file("config.toml")
    }

    /// Checks the configuration against the registry it will run with.
    pub fn validate(&self, registry: &ToolRegistry) -> Result<()> {
        if self.executor.max_parallel == 0 {
            return Err(EngineError::configuration(
                "executor.max_parallel must be at least 1",
            ));
        }
        for (action, limit) in &self.rate_limits {
            if !registry.contains(action) {
                return Err(EngineError::configuration(format!(
                    "rate limit configured for unregistered action '{action}'"
                )));
            }
            if !(limit.per_second.is_finite() && limit.per_second > 0.0) {
                return Err(EngineError::configuration(format!(
                    "rate limit for '{action}' must have a positive per_second"
                )));
            }
            if limit.burst == 0 {
                return Err(EngineError::configuration(format!(
                    "rate limit for '{action}' must have a positive burst"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.executor.max_parallel, 4);
        assert!(config.planning.implicit_dependencies);
    }

    #[test]
    fn test_parses_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [executor]
            max_parallel = 8

            [retry]
            max_retries = 1

            [cache]
            default_ttl_secs = 10
            [cache.ttl_secs]
            io = 60

            [rate_limits.fetch]
            per_second = 2.0
            burst = 4
            max_wait_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.executor.max_parallel, 8);
        assert_eq!(config.executor.default_deadline_ms, 30_000);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.cache.ttl_for("io"), Duration::from_secs(60));
        assert_eq!(config.cache.ttl_for("other"), Duration::from_secs(10));
        assert_eq!(config.rate_limits["fetch"].burst, 4);
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let error = EngineConfig::from_toml_str("[executor\nmax_parallel = ").unwrap_err();
        assert!(matches!(error, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_validate_rejects_unknown_action_and_bad_rate() {
        let registry = ToolRegistry::default();
        let mut config = EngineConfig::default();
        config.rate_limits.insert(
            "fetch".into(),
            RateLimitConfig {
                per_second: 1.0,
                burst: 1,
                max_wait_ms: 0,
            },
        );
        assert!(config.validate(&registry).is_err());

        let mut config = EngineConfig::default();
        config.executor.max_parallel = 0;
        assert!(config.validate(&registry).is_err());
    }
}
