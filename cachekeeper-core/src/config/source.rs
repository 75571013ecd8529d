//! Instance config persistence boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::cache::InstanceConfig;
use crate::error::Result;

/// Where instance configs are loaded from and persisted to
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Load the stored config for `instance_type`, if any
    async fn load(&self, instance_type: &str) -> Result<Option<InstanceConfig>>;

    /// Persist `config` for `instance_type`
    async fn save(&self, instance_type: &str, config: &InstanceConfig) -> Result<()>;

    /// Names of every stored instance
    async fn list(&self) -> Result<Vec<String>>;
}

/// In-memory config source
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    configs: RwLock<BTreeMap<String, InstanceConfig>>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source pre-seeded with `configs`
    pub fn with_configs(configs: impl IntoIterator<Item = InstanceConfig>) -> Self {
        let map = configs
            .into_iter()
            .map(|c| (c.instance_type.clone(), c))
            .collect();
        Self {
            configs: RwLock::new(map),
        }
    }

    /// Snapshot of stored configs
    pub fn snapshot(&self) -> BTreeMap<String, InstanceConfig> {
        self.configs.read().clone()
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn load(&self, instance_type: &str) -> Result<Option<InstanceConfig>> {
        Ok(self.configs.read().get(instance_type).cloned())
    }

    async fn save(&self, instance_type: &str, config: &InstanceConfig) -> Result<()> {
        self.configs
            .write()
            .insert(instance_type.to_string(), config.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.configs.read().keys().cloned().collect())
    }
}
