//! # 事件模块
//!
//! 定义缓存生命周期中发布的所有事件。
//!
//! ## 设计原则
//!
//! - **可追溯**: 所有事件包含时间戳和事件 ID
//! - **可序列化**: 支持 JSON 序列化 (文件 sink、webhook)
//! - **类型安全**: payload 是封闭的 tagged enum，可以穷举匹配
//! - **不可变**: 发布后的事件不再修改
//!
//! ## 事件类型
//!
//! | 事件 | 来源 | 说明 |
//! |------|------|------|
//! | `config_changed` | ConfigRegistry | 实例配置变更并完成迁移 |
//! | `config_reloaded` | ConfigReloader | 配置文件热加载完成 |
//! | `stats_updated` | Monitor | 单个实例的采样结果 |
//! | `threshold_breached` | Monitor | 阈值告警 |
//! | `report_generated` | Monitor | 周期性健康报告 |
//! | `anomaly_detected` | Analytics | 异常检测 |
//! | `prewarm_*` / `batch_completed` | BatchRunner | 批量操作与预热进度 |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod domain;

pub use domain::*;

/// 事件严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Info => "info",
            EventSeverity::Warning => "warning",
            EventSeverity::Error => "error",
            EventSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 缓存事件
///
/// 发布后不可变，保存在事件总线的有界历史中。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEvent {
    /// 事件唯一 ID
    pub event_id: String,
    /// 发布时间
    pub timestamp: DateTime<Utc>,
    /// 严重级别
    pub severity: EventSeverity,
    /// 发布者 (如 "monitor", "registry", "batch")
    pub source: String,
    /// 人类可读的描述
    pub message: String,
    /// 事件数据
    pub payload: EventPayload,
}

impl CacheEvent {
    /// 创建新事件
    ///
    /// # 参数
    /// - `source`: 发布者
    /// - `severity`: 严重级别
    /// - `message`: 描述
    /// - `payload`: 事件数据
    pub fn new(
        source: impl Into<String>,
        severity: EventSeverity,
        message: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity,
            source: source.into(),
            message: message.into(),
            payload,
        }
    }

    /// 创建 info 级别事件
    pub fn info(source: impl Into<String>, message: impl Into<String>, payload: EventPayload) -> Self {
        Self::new(source, EventSeverity::Info, message, payload)
    }

    /// 事件类型
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// 事件涉及的缓存实例 (如果有)
    pub fn instance(&self) -> Option<&str> {
        self.payload.instance()
    }
}
