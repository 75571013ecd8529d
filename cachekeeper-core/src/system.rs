//! # Cache System
//!
//! 进程启动时构造一次的组件容器：事件总线、配置注册表、监控、分析、
//! 批量执行器和配置热加载。以 `Arc<CacheSystem>` 形式传递，不使用全局单例。
//!
//! ## 示例
//!
//! ```rust,no_run
//! use cachekeeper_core::cache::InstanceConfig;
//! use cachekeeper_core::system::CacheSystem;
//!
//! # async fn example() -> cachekeeper_core::error::Result<()> {
//! let system = CacheSystem::builder()
//!     .with_instance(InstanceConfig::user())
//!     .with_instance(InstanceConfig::session())
//!     .build()
//!     .await?;
//! system.start();
//!
//! let users = system.handle("user")?;
//! users.set("user:1", b"alice".to_vec(), None).await?;
//!
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::analytics::{Analytics, AnalyticsConfig};
use crate::batch::{BatchRunner, PrewarmItem, PrewarmOptions, PrewarmStrategy, TaskStatus};
use crate::cache::InstanceConfig;
use crate::config::{
    ConfigRegistry, ConfigReloader, ConfigSource, InstanceHandle, ValidationReport, Validator,
    DEFAULT_ENV_PREFIX,
};
use crate::error::Result;
use crate::event_bus::{EventBus, EventFilter, EventSink, EventStats};
use crate::monitor::{Monitor, MonitorConfig};

/// 系统状态快照
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub instances: Vec<String>,
    pub running: bool,
    pub active_alerts: usize,
    pub active_tasks: usize,
    pub events: EventStats,
}

/// `CacheSystem` 构造器
pub struct CacheSystemBuilder {
    history_size: usize,
    source: Option<Arc<dyn ConfigSource>>,
    validator: Option<Validator>,
    memory_budget: Option<usize>,
    monitor: MonitorConfig,
    analytics: AnalyticsConfig,
    batch_defaults: PrewarmOptions,
    reload_debounce: Option<Duration>,
    instances: Vec<InstanceConfig>,
    sinks: Vec<(String, Arc<dyn EventSink>, EventFilter)>,
    env_prefix: Option<String>,
}

impl Default for CacheSystemBuilder {
    fn default() -> Self {
        Self {
            history_size: crate::event_bus::bus::DEFAULT_HISTORY_SIZE,
            source: None,
            validator: None,
            memory_budget: None,
            monitor: MonitorConfig::default(),
            analytics: AnalyticsConfig::default(),
            batch_defaults: PrewarmOptions::default(),
            reload_debounce: None,
            instances: Vec::new(),
            sinks: Vec::new(),
            env_prefix: None,
        }
    }
}

impl CacheSystemBuilder {
    pub fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = size;
        self
    }

    /// 配置持久化来源，构造时先从中加载实例
    pub fn with_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn with_monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor = config;
        self
    }

    pub fn with_analytics_config(mut self, config: AnalyticsConfig) -> Self {
        self.analytics = config;
        self
    }

    pub fn with_batch_defaults(mut self, options: PrewarmOptions) -> Self {
        self.batch_defaults = options;
        self
    }

    pub fn with_reload_debounce(mut self, debounce: Duration) -> Self {
        self.reload_debounce = Some(debounce);
        self
    }

    /// 初始实例 (已从配置源加载的同名实例会被更新)
    pub fn with_instance(mut self, config: InstanceConfig) -> Self {
        self.instances.push(config);
        self
    }

    pub fn with_instances(mut self, configs: impl IntoIterator<Item = InstanceConfig>) -> Self {
        self.instances.extend(configs);
        self
    }

    pub fn with_sink(mut self, id: impl Into<String>, sink: Arc<dyn EventSink>, filter: EventFilter) -> Self {
        self.sinks.push((id.into(), sink, filter));
        self
    }

    /// 构造后应用 `{PREFIX}_{INSTANCE}_{FIELD}` 环境变量覆盖
    pub fn with_env_overrides(mut self, prefix: Option<&str>) -> Self {
        self.env_prefix = Some(prefix.unwrap_or(DEFAULT_ENV_PREFIX).to_string());
        self
    }

    /// 构造并连接所有组件
    ///
    /// 初始实例中任何一个校验失败都会返回错误。
    pub async fn build(self) -> Result<Arc<CacheSystem>> {
        let bus = Arc::new(EventBus::with_capacity(self.history_size));
        for (id, sink, filter) in self.sinks {
            bus.add_sink(id, sink, filter);
        }

        let mut registry = ConfigRegistry::new().with_event_bus(bus.clone());
        if let Some(source) = self.source.clone() {
            registry = registry.with_source(source);
        }
        if let Some(validator) = self.validator {
            registry = registry.with_validator(validator);
        }
        if let Some(budget) = self.memory_budget {
            registry = registry.with_memory_budget(budget);
        }
        let registry = Arc::new(registry);

        if self.source.is_some() {
            let report = registry.load_from_source().await?;
            if !report.is_clean() {
                warn!(rejected = ?report.rejected_names(), "Some stored configs were rejected");
            }
        }

        for config in self.instances {
            if registry.contains(&config.instance_type) {
                let name = config.instance_type.clone();
                registry.update_config(&name, config).await?;
            } else {
                registry.register_instance(config).await?;
            }
        }

        if let Some(prefix) = &self.env_prefix {
            let report = registry.apply_env_overrides(prefix).await;
            if !report.is_clean() {
                warn!(rejected = ?report.rejected, "Environment overrides rejected");
            }
        }

        let analytics = Arc::new(
            Analytics::new(self.analytics)
                .with_event_bus(bus.clone())
                .with_registry(registry.clone()),
        );
        let monitor = Arc::new(
            Monitor::new(registry.clone(), self.monitor)
                .with_analytics(analytics.clone())
                .with_event_bus(bus.clone()),
        );
        let batch = Arc::new(
            BatchRunner::new(registry.clone())
                .with_event_bus(bus.clone())
                .with_default_options(self.batch_defaults),
        );
        let mut reloader = ConfigReloader::new(registry.clone()).with_event_bus(bus.clone());
        if let Some(debounce) = self.reload_debounce {
            reloader = reloader.with_debounce(debounce);
        }

        info!(instances = ?registry.instance_types(), "Cache system built");

        Ok(Arc::new(CacheSystem {
            bus,
            registry,
            monitor,
            analytics,
            batch,
            reloader,
        }))
    }
}

/// 缓存系统
pub struct CacheSystem {
    bus: Arc<EventBus>,
    registry: Arc<ConfigRegistry>,
    monitor: Arc<Monitor>,
    analytics: Arc<Analytics>,
    batch: Arc<BatchRunner>,
    reloader: ConfigReloader,
}

impl CacheSystem {
    pub fn builder() -> CacheSystemBuilder {
        CacheSystemBuilder::default()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn analytics(&self) -> &Arc<Analytics> {
        &self.analytics
    }

    pub fn batch(&self) -> &Arc<BatchRunner> {
        &self.batch
    }

    pub fn reloader(&self) -> &ConfigReloader {
        &self.reloader
    }

    /// 按实例名解析读写句柄
    pub fn handle(&self, instance: &str) -> Result<InstanceHandle> {
        self.registry.handle(instance)
    }

    /// 启动监控和分析的定时任务
    pub fn start(&self) {
        self.monitor.start();
        self.analytics.start();
        info!("Cache system started");
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running() || self.analytics.is_running()
    }

    /// 停止定时任务、取消预热并销毁所有存储
    pub async fn shutdown(&self) {
        self.monitor.stop();
        self.analytics.stop();
        let cancelled = self.batch.cancel_all();
        if cancelled > 0 {
            info!(cancelled = cancelled, "Cancelled unfinished prewarm tasks");
        }
        self.registry.shutdown().await;
        info!("Cache system shut down");
    }

    /// 校验并应用配置变更
    pub async fn request_config_change(&self, instance: &str, config: InstanceConfig) -> Result<ValidationReport> {
        self.registry.update_config(instance, config).await
    }

    /// 提交后台预热，返回任务 id
    pub fn request_prewarm(
        &self,
        instance: &str,
        items: Vec<PrewarmItem>,
        strategy: PrewarmStrategy,
        options: PrewarmOptions,
    ) -> Result<String> {
        self.batch.submit_prewarm(instance, items, strategy, options)
    }

    /// 移除实例，同时丢弃它的监控与分析数据
    pub async fn remove_instance(&self, instance: &str) -> Result<()> {
        self.registry.remove_instance(instance).await?;
        self.monitor.forget_instance(instance);
        self.analytics.forget_instance(instance);
        Ok(())
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            instances: self.registry.instance_types(),
            running: self.is_running(),
            active_alerts: self.monitor.active_alerts().len(),
            active_tasks: self
                .batch
                .tasks()
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Running))
                .count(),
            events: self.bus.stats(),
        }
    }
}
