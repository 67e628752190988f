use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};

/// Engine settings, usually read from a YAML file.
///
/// ```yaml
/// lock_timeout_ms: 2000
/// storage:
///   backend: redis
///   url: "redis://127.0.0.1:6379/0"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a call waits for exclusive access to a process instance.
    pub lock_timeout_ms: u64,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Redis {
        url: String,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
}

fn default_key_prefix() -> String {
    "tokenshift".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            storage: StorageConfig::Memory,
        }
    }
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: EngineConfig = serde_yaml::from_str("lock_timeout_ms: 250").unwrap();
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.storage, StorageConfig::Memory);
    }

    #[test]
    fn redis_backend_gets_default_prefix() {
        let yaml = r#"
storage:
  backend: redis
  url: "redis://localhost:6379/1"
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.lock_timeout_ms, 5_000);
        assert_eq!(
            config.storage,
            StorageConfig::Redis {
                url: "redis://localhost:6379/1".to_string(),
                key_prefix: "tokenshift".to_string(),
            }
        );
    }
}
