//! Instance registry.
//!
//! Holds one [`InstanceConfig`] and one live [`CacheStore`] per instance name.
//! Every config change is validated first; an accepted change migrates the live
//! entries into a freshly sized store while holding the instance's exclusive lock,
//! so readers going through an [`InstanceHandle`] see either the old store or the
//! new one, never an empty gap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::formats::{overrides_for, ConfigFormat, ConfigFormatter, ConfigSet, ExportOptions};
use super::source::ConfigSource;
use super::validation::{
    ValidationContext, ValidationReport, ValidationRule, Validator, DEFAULT_MEMORY_BUDGET_BYTES,
};
use crate::cache::{BatchCacheOps, CacheOps, CacheStore, InstanceConfig, StoreStats};
use crate::error::{CacheError, Result};
use crate::event_bus::EventBus;
use crate::events::{EventPayload, EventSeverity};

const EVENT_SOURCE: &str = "registry";

/// One registered instance
struct InstanceSlot {
    name: String,
    /// Mirrors the config of the current store; updated under the store write lock
    config: RwLock<InstanceConfig>,
    store: tokio::sync::RwLock<Arc<CacheStore>>,
}

/// Consumer-facing accessor for a named instance
///
/// Resolved once by name; keeps working across configuration migrations.
/// After the instance is removed every operation returns `StoreClosed`.
#[derive(Clone)]
pub struct InstanceHandle {
    slot: Arc<InstanceSlot>,
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("instance", &self.slot.name)
            .finish()
    }
}

impl InstanceHandle {
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// Current config
    pub fn config(&self) -> InstanceConfig {
        self.slot.config.read().clone()
    }

    /// Current backing store
    pub async fn store(&self) -> Arc<CacheStore> {
        self.slot.store.read().await.clone()
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.slot.store.read().await.get(key).await
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.slot.store.read().await.set(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.slot.store.read().await.delete(key).await
    }

    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.slot.store.read().await.mget(keys).await
    }

    pub async fn mset(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        self.slot.store.read().await.mset(items, ttl).await
    }

    pub async fn mdel(&self, keys: &[String]) -> Result<usize> {
        self.slot.store.read().await.mdel(keys).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.slot.store.read().await.keys().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.slot.store.read().await.clear().await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.slot.store.read().await.get_stats().await
    }
}

#[async_trait]
impl CacheOps for InstanceHandle {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        InstanceHandle::get(self, key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        InstanceHandle::set(self, key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        InstanceHandle::delete(self, key).await
    }
}

#[async_trait]
impl BatchCacheOps for InstanceHandle {
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        InstanceHandle::mget(self, keys).await
    }

    async fn mset(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        InstanceHandle::mset(self, items, ttl).await
    }

    async fn mdel(&self, keys: &[String]) -> Result<usize> {
        InstanceHandle::mdel(self, keys).await
    }
}

/// Per-instance outcome of a bulk apply (import, env overrides, restore, reload)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    /// (instance, reason)
    pub rejected: Vec<(String, String)>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn rejected_names(&self) -> Vec<String> {
        self.rejected.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Serializable snapshot of every instance config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigBackup {
    pub created_at: DateTime<Utc>,
    pub configs: ConfigSet,
}

impl ConfigBackup {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Registry of cache instances
pub struct ConfigRegistry {
    slots: RwLock<BTreeMap<String, Arc<InstanceSlot>>>,
    validator: RwLock<Validator>,
    memory_budget_bytes: usize,
    source: Option<Arc<dyn ConfigSource>>,
    bus: Option<Arc<EventBus>>,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRegistry")
            .field("instances", &self.instance_types())
            .field("validator", &*self.validator.read())
            .finish()
    }
}

impl ConfigRegistry {
    /// Empty registry with the built-in validation rules
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            validator: RwLock::new(Validator::default()),
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            source: None,
            bus: None,
        }
    }

    /// Publish `config_changed` on `bus`
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Persist successful updates to `source`
    pub fn with_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_validator(self, validator: Validator) -> Self {
        *self.validator.write() = validator;
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    // ---------------------------------------------------------------------
    // Rules
    // ---------------------------------------------------------------------

    pub fn add_rule(&self, rule: Arc<dyn ValidationRule>) {
        self.validator.write().add_rule(rule);
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        self.validator.write().remove_rule(name)
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.validator.read().rule_names()
    }

    fn context_for(&self, instance: &str) -> ValidationContext {
        let others = self
            .slots
            .read()
            .values()
            .filter(|slot| slot.name != instance)
            .map(|slot| slot.config.read().clone())
            .collect();
        ValidationContext {
            others,
            memory_budget_bytes: self.memory_budget_bytes,
        }
    }

    /// Validate `config` against the active rules (or only the named ones)
    ///
    /// Cross-instance rules see every other registered instance.
    pub fn validate_config(&self, config: &InstanceConfig, rule_names: Option<&[&str]>) -> ValidationReport {
        let ctx = self.context_for(&config.instance_type);
        self.validator.read().validate(config, &ctx, rule_names)
    }

    fn ensure_valid(&self, config: &InstanceConfig) -> Result<ValidationReport> {
        let report = self.validate_config(config, None);
        if !report.valid {
            warn!(
                instance = %config.instance_type,
                score = report.score,
                reason = %report.summary(),
                "Config rejected by validation"
            );
            return Err(CacheError::Validation {
                instance: config.instance_type.clone(),
                report,
            });
        }
        Ok(report)
    }

    // ---------------------------------------------------------------------
    // Instances
    // ---------------------------------------------------------------------

    /// Register a new instance and start its store
    pub async fn register_instance(&self, config: InstanceConfig) -> Result<InstanceHandle> {
        let name = config.instance_type.clone();
        if self.slots.read().contains_key(&name) {
            return Err(CacheError::InstanceExists(name));
        }
        self.ensure_valid(&config)?;

        let store = CacheStore::spawn(config.clone());
        let slot = Arc::new(InstanceSlot {
            name: name.clone(),
            config: RwLock::new(config.clone()),
            store: tokio::sync::RwLock::new(store.clone()),
        });

        let inserted = {
            let mut slots = self.slots.write();
            if slots.contains_key(&name) {
                false
            } else {
                slots.insert(name.clone(), slot.clone());
                true
            }
        };
        if !inserted {
            // lost a race with a concurrent registration
            store.close().await;
            return Err(CacheError::InstanceExists(name));
        }

        info!(
            instance = %name,
            max_size = config.max_size,
            default_ttl_ms = ?config.default_ttl_ms,
            "Cache instance registered"
        );
        self.persist(&config).await;
        self.emit_changed(&name, None, config);

        Ok(InstanceHandle { slot })
    }

    /// Remove an instance and destroy its store
    pub async fn remove_instance(&self, instance_type: &str) -> Result<()> {
        let slot = self
            .slots
            .write()
            .remove(instance_type)
            .ok_or_else(|| CacheError::instance_not_found(instance_type))?;

        let store = slot.store.write().await;
        store.close().await;
        info!(instance = %instance_type, "Cache instance removed");
        Ok(())
    }

    /// Registered instance names, sorted
    pub fn instance_types(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    pub fn contains(&self, instance_type: &str) -> bool {
        self.slots.read().contains_key(instance_type)
    }

    pub fn get_config(&self, instance_type: &str) -> Option<InstanceConfig> {
        self.slots
            .read()
            .get(instance_type)
            .map(|slot| slot.config.read().clone())
    }

    pub fn all_configs(&self) -> ConfigSet {
        self.slots
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.config.read().clone()))
            .collect()
    }

    /// Handle for `instance_type`
    pub fn handle(&self, instance_type: &str) -> Result<InstanceHandle> {
        self.slots
            .read()
            .get(instance_type)
            .cloned()
            .map(|slot| InstanceHandle { slot })
            .ok_or_else(|| CacheError::instance_not_found(instance_type))
    }

    /// Current store of `instance_type`
    pub async fn store(&self, instance_type: &str) -> Option<Arc<CacheStore>> {
        let slot = self.slots.read().get(instance_type).cloned()?;
        let store = slot.store.read().await.clone();
        Some(store)
    }

    /// Current store of every instance
    pub async fn stores(&self) -> Vec<(String, Arc<CacheStore>)> {
        let slots: Vec<Arc<InstanceSlot>> = self.slots.read().values().cloned().collect();
        let mut stores = Vec::with_capacity(slots.len());
        for slot in slots {
            let store = slot.store.read().await.clone();
            stores.push((slot.name.clone(), store));
        }
        stores
    }

    /// Validate and apply a new config, migrating live entries
    ///
    /// On validation failure nothing changes and the error carries the full report.
    /// On success the old store is destroyed and its live entries are replayed into
    /// the new one in insertion order with their remaining TTLs; when the new
    /// capacity is smaller the oldest entries are dropped.
    pub async fn update_config(&self, instance_type: &str, mut config: InstanceConfig) -> Result<ValidationReport> {
        let slot = self
            .slots
            .read()
            .get(instance_type)
            .cloned()
            .ok_or_else(|| CacheError::instance_not_found(instance_type))?;
        config.instance_type = instance_type.to_string();

        let report = self.ensure_valid(&config)?;

        let old_config = {
            let mut current = slot.store.write().await;
            let old_config = slot.config.read().clone();

            let snapshot = current.snapshot().await?;
            let live = snapshot.len();
            current.close().await;

            let replacement = Arc::new(CacheStore::new(config.clone()));
            let restored = replacement.restore(snapshot).await?;
            replacement.start_cleanup();

            *current = replacement;
            *slot.config.write() = config.clone();

            debug!(
                instance = %instance_type,
                live = live,
                restored = restored,
                dropped = live - restored,
                "Cache instance migrated"
            );
            old_config
        };

        info!(
            instance = %instance_type,
            max_size = config.max_size,
            default_ttl_ms = ?config.default_ttl_ms,
            score = report.score,
            "Cache config updated"
        );
        self.persist(&config).await;
        self.emit_changed(instance_type, Some(old_config), config);

        Ok(report)
    }

    async fn persist(&self, config: &InstanceConfig) {
        if let Some(source) = &self.source {
            if let Err(e) = source.save(&config.instance_type, config).await {
                warn!(
                    instance = %config.instance_type,
                    error = %e,
                    "Failed to persist config, keeping in-memory change"
                );
            }
        }
    }

    fn emit_changed(&self, instance: &str, old: Option<InstanceConfig>, new: InstanceConfig) {
        if let Some(bus) = &self.bus {
            bus.emit(
                EVENT_SOURCE,
                EventSeverity::Info,
                format!("config for '{}' changed", instance),
                EventPayload::ConfigChanged {
                    instance: instance.to_string(),
                    old,
                    new,
                },
            );
        }
    }

    /// Register or update one instance, recording the outcome
    async fn apply_one(&self, config: InstanceConfig, report: &mut ApplyReport) {
        let name = config.instance_type.clone();
        let result = if self.contains(&name) {
            self.update_config(&name, config).await.map(|_| ())
        } else {
            self.register_instance(config).await.map(|_| ())
        };

        match result {
            Ok(()) => report.applied.push(name),
            Err(e) => report.rejected.push((name, e.to_string())),
        }
    }

    /// Apply every config in `set` independently
    pub async fn apply_configs(&self, set: ConfigSet) -> ApplyReport {
        let mut report = ApplyReport::default();
        for (_, config) in set {
            self.apply_one(config, &mut report).await;
        }
        report
    }

    // ---------------------------------------------------------------------
    // Source / formats / env / backup
    // ---------------------------------------------------------------------

    /// Seed the registry from the configured source
    pub async fn load_from_source(&self) -> Result<ApplyReport> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| CacheError::configuration("no config source configured"))?;

        let mut set = ConfigSet::new();
        for name in source.list().await? {
            if let Some(mut config) = source.load(&name).await? {
                config.instance_type = name.clone();
                set.insert(name, config);
            }
        }
        Ok(self.apply_configs(set).await)
    }

    /// Export every instance config
    pub fn export_configs(&self, format: ConfigFormat, options: &ExportOptions) -> Result<String> {
        self.export_with(format.formatter().as_ref(), options)
    }

    pub fn export_with(&self, formatter: &dyn ConfigFormatter, options: &ExportOptions) -> Result<String> {
        formatter.export(&self.all_configs(), options)
    }

    /// Parse `text` and apply each instance independently
    pub async fn import_configs(&self, format: ConfigFormat, text: &str) -> Result<ApplyReport> {
        self.import_with(format.formatter().as_ref(), text).await
    }

    pub async fn import_with(&self, formatter: &dyn ConfigFormatter, text: &str) -> Result<ApplyReport> {
        let set = formatter.import(text)?;
        Ok(self.apply_configs(set).await)
    }

    /// Apply `{PREFIX}_{INSTANCE}_{FIELD}` environment overrides to every instance
    pub async fn apply_env_overrides(&self, prefix: &str) -> ApplyReport {
        self.apply_overrides_with(prefix, |key| std::env::var(key).ok())
            .await
    }

    /// Like [`apply_env_overrides`](Self::apply_env_overrides) with a custom variable lookup
    pub async fn apply_overrides_with<F>(&self, prefix: &str, lookup: F) -> ApplyReport
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut report = ApplyReport::default();
        for (name, config) in self.all_configs() {
            match overrides_for(prefix, &config, &lookup) {
                Ok(Some(updated)) if updated != config => self.apply_one(updated, &mut report).await,
                Ok(_) => {}
                Err(e) => report.rejected.push((name, e.to_string())),
            }
        }
        report
    }

    /// Snapshot every instance config
    pub fn backup(&self) -> ConfigBackup {
        ConfigBackup {
            created_at: Utc::now(),
            configs: self.all_configs(),
        }
    }

    /// Apply every config in `backup` through validation
    pub async fn restore(&self, backup: &ConfigBackup) -> ApplyReport {
        self.apply_configs(backup.configs.clone()).await
    }

    /// Destroy every store
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<InstanceSlot>> = self.slots.read().values().cloned().collect();
        for slot in slots {
            slot.store.read().await.close().await;
        }
        debug!("Config registry shut down");
    }
}
