//! Registry runtime configuration.
//!
//! Built once at startup and shared by reference; nothing in the crate keeps
//! a hidden global copy.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const ENV_PERMISSION_TTL_SECS: &str = "MDR_PERMISSION_TTL_SECS";
pub const ENV_VERY_RECENT_SECS: &str = "MDR_VERY_RECENT_SECS";
pub const ENV_PERMISSION_CACHE_CAPACITY: &str = "MDR_PERMISSION_CACHE_CAPACITY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Lifetime of a memoized permission decision.
    #[serde(default = "default_permission_ttl_secs")]
    pub permission_ttl_secs: u64,

    /// Items modified within this window bypass the permission cache.
    #[serde(default = "default_very_recent_secs")]
    pub very_recent_secs: u64,

    #[serde(default = "default_permission_cache_capacity")]
    pub permission_cache_capacity: usize,
}

fn default_permission_ttl_secs() -> u64 {
    60
}

fn default_very_recent_secs() -> u64 {
    15
}

fn default_permission_cache_capacity() -> usize {
    10_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            permission_ttl_secs: default_permission_ttl_secs(),
            very_recent_secs: default_very_recent_secs(),
            permission_cache_capacity: default_permission_cache_capacity(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading registry config {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: RegistryConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Defaults overridden by any `MDR_*` variables that are set.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        if let Some(v) = lookup(ENV_PERMISSION_TTL_SECS) {
            self.permission_ttl_secs = v
                .parse()
                .with_context(|| format!("{ENV_PERMISSION_TTL_SECS}={v}"))?;
        }
        if let Some(v) = lookup(ENV_VERY_RECENT_SECS) {
            self.very_recent_secs = v
                .parse()
                .with_context(|| format!("{ENV_VERY_RECENT_SECS}={v}"))?;
        }
        if let Some(v) = lookup(ENV_PERMISSION_CACHE_CAPACITY) {
            self.permission_cache_capacity = v
                .parse()
                .with_context(|| format!("{ENV_PERMISSION_CACHE_CAPACITY}={v}"))?;
        }
        Ok(self)
    }

    pub fn permission_ttl(&self) -> Duration {
        Duration::from_secs(self.permission_ttl_secs)
    }

    pub fn very_recent_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.very_recent_secs).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.permission_ttl(), Duration::from_secs(60));
        assert_eq!(config.very_recent_window(), chrono::Duration::seconds(15));
        assert_eq!(config.permission_cache_capacity, 10_000);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = RegistryConfig::from_yaml("permission_ttl_secs: 5\n").unwrap();
        assert_eq!(config.permission_ttl_secs, 5);
        assert_eq!(config.very_recent_secs, 15);
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_VERY_RECENT_SECS, "30"),
            (ENV_PERMISSION_CACHE_CAPACITY, "8"),
        ]
        .into_iter()
        .collect();
        let config = RegistryConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.very_recent_secs, 30);
        assert_eq!(config.permission_cache_capacity, 8);
        assert_eq!(config.permission_ttl_secs, 60);
    }

    #[test]
    fn env_override_rejects_garbage() {
        let err = RegistryConfig::default()
            .with_overrides(|k| (k == ENV_PERMISSION_TTL_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_PERMISSION_TTL_SECS));
    }
}
