//! # 日志初始化
//!
//! 库内部只通过 `tracing` 宏输出结构化字段，订阅器由可执行程序安装。
//!
//! 过滤规则优先读取 `RUST_LOG`，没有设置时使用配置中的默认指令。

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{CacheError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `RUST_LOG` 未设置时的过滤指令
    pub default_filter: String,
    /// 是否输出事件所属模块
    pub with_target: bool,
    /// 是否输出 ANSI 颜色
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: "warn".to_string(),
            with_target: true,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// 详细模式：本 crate 输出 debug，其它输出 info
    pub fn verbose() -> Self {
        Self {
            default_filter: "info,cachekeeper_core=debug".to_string(),
            ..Default::default()
        }
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// 构造过滤器：`RUST_LOG` 优先
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// 安装全局 fmt 订阅器
///
/// 已经安装过订阅器时返回错误，不会 panic。
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .try_init()
        .map_err(|e| CacheError::other(format!("failed to install tracing subscriber: {}", e)))
}
