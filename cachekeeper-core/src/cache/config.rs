//! # Instance Configuration
//!
//! 单个缓存实例的配置。
//!
//! ## 配置选项
//!
//! - `instance_type`: 实例名称 (如 "user", "session", "api")
//! - `max_size`: 最大缓存条目数
//! - `default_ttl_ms`: 默认 TTL，`None` 表示条目默认不过期
//! - `cleanup_interval_ms`: 后台过期清理间隔
//! - `enabled`: 是否启用缓存
//!
//! ## 示例
//!
//! ```rust
//! use cachekeeper_core::cache::InstanceConfig;
//! use std::time::Duration;
//!
//! let config = InstanceConfig::new("user")
//!     .with_max_size(2000)
//!     .with_default_ttl(Duration::from_secs(600));
//! assert_eq!(config.default_ttl(), Some(Duration::from_secs(600)));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 每个条目的估算固定开销 (字节)
pub const ENTRY_OVERHEAD_BYTES: usize = 64;

/// 估算内存时假设的平均条目大小 (字节)
pub const AVG_ENTRY_SIZE_BYTES: usize = 1024;

/// 缓存实例配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// 实例名称
    pub instance_type: String,

    /// 最大缓存条目数
    ///
    /// 超过此数量时，会触发容量淘汰。
    pub max_size: usize,

    /// 默认 TTL (毫秒)
    ///
    /// `None` 时条目只有在写入时显式指定 TTL 才会过期。
    pub default_ttl_ms: Option<u64>,

    /// 后台过期清理间隔 (毫秒)
    pub cleanup_interval_ms: u64,

    /// 是否启用缓存
    ///
    /// 全局开关，关闭后读总是未命中，写被丢弃。
    pub enabled: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_type: "default".to_string(),
            max_size: 1000,
            default_ttl_ms: Some(300_000), // 5 分钟
            cleanup_interval_ms: 60_000,
            enabled: true,
        }
    }
}

impl InstanceConfig {
    /// 创建指定实例名称的默认配置
    pub fn new(instance_type: impl Into<String>) -> Self {
        Self {
            instance_type: instance_type.into(),
            ..Default::default()
        }
    }

    /// 设置最大缓存条目数
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// 设置默认 TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = Some(ttl.as_millis() as u64);
        self
    }

    /// 条目默认不过期
    pub fn without_default_ttl(mut self) -> Self {
        self.default_ttl_ms = None;
        self
    }

    /// 设置清理间隔
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = interval.as_millis() as u64;
        self
    }

    /// 设置是否启用缓存
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 默认 TTL
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_ms.map(Duration::from_millis)
    }

    /// 清理间隔
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// 预估内存占用 (字节)
    ///
    /// 粗略估计，假设每个缓存条目平均 1KB。
    pub fn estimated_memory_usage(&self) -> usize {
        self.max_size.saturating_mul(AVG_ENTRY_SIZE_BYTES)
    }

    /// 用户数据缓存：中等容量，5 分钟 TTL
    pub fn user() -> Self {
        Self {
            instance_type: "user".to_string(),
            max_size: 1000,
            default_ttl_ms: Some(300_000),
            cleanup_interval_ms: 60_000,
            enabled: true,
        }
    }

    /// 会话缓存：大容量，30 分钟 TTL
    pub fn session() -> Self {
        Self {
            instance_type: "session".to_string(),
            max_size: 5000,
            default_ttl_ms: Some(1_800_000),
            cleanup_interval_ms: 300_000,
            enabled: true,
        }
    }

    /// API 响应缓存：短 TTL，频繁清理
    pub fn api() -> Self {
        Self {
            instance_type: "api".to_string(),
            max_size: 2000,
            default_ttl_ms: Some(60_000),
            cleanup_interval_ms: 30_000,
            enabled: true,
        }
    }

    /// 按实例名称取预设，未知名称返回通用默认值
    pub fn preset(instance_type: &str) -> Self {
        match instance_type {
            "user" => Self::user(),
            "session" => Self::session(),
            "api" => Self::api(),
            other => Self::new(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InstanceConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.default_ttl(), Some(Duration::from_secs(300)));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_builder_pattern() {
        let config = InstanceConfig::new("api")
            .with_enabled(false)
            .with_max_size(2000)
            .with_default_ttl(Duration::from_millis(1500))
            .with_cleanup_interval(Duration::from_millis(250));

        assert_eq!(config.instance_type, "api");
        assert!(!config.enabled);
        assert_eq!(config.max_size, 2000);
        assert_eq!(config.default_ttl_ms, Some(1500));
        assert_eq!(config.cleanup_interval_ms, 250);
    }

    #[test]
    fn test_without_default_ttl() {
        let config = InstanceConfig::new("x").without_default_ttl();
        assert!(config.default_ttl().is_none());
    }

    #[test]
    fn test_presets() {
        assert_eq!(InstanceConfig::preset("session").max_size, 5000);
        assert_eq!(InstanceConfig::preset("api").default_ttl_ms, Some(60_000));
        assert_eq!(InstanceConfig::preset("custom").instance_type, "custom");
    }

    #[test]
    fn test_estimated_memory_usage() {
        let config = InstanceConfig::default();
        assert_eq!(config.estimated_memory_usage(), 1000 * 1024);
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: InstanceConfig =
            serde_json::from_str(r#"{"instance_type":"user","max_size":10}"#).unwrap();
        assert_eq!(config.max_size, 10);
        assert_eq!(config.cleanup_interval_ms, 60_000);
        assert!(config.enabled);
    }
}
