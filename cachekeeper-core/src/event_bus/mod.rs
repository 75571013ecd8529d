//! # 事件总线模块
//!
//! 缓存系统的事件发布订阅机制。
//!
//! ## 设计原则
//!
//! - **无全局状态**: 每个事件总线实例独立，由 `CacheSystem` 持有
//! - **同步分发**: 监听器按注册顺序同步调用，回调内再次发布的事件排队处理
//! - **隔离失败**: 监听器错误 (包括 panic) 和 sink 投递失败只记录日志
//! - **有界历史**: 所有事件进入有界历史，可按类型/级别查询
//!
//! ## 使用示例
//!
//! ```rust
//! use cachekeeper_core::event_bus::{EventBus, EventFilter};
//! use cachekeeper_core::events::{CacheEvent, EventPayload, EventType};
//!
//! let bus = EventBus::new();
//!
//! // 订阅事件
//! let subscription = bus.subscribe(
//!     "printer",
//!     EventFilter::new().with_event_type(EventType::Custom),
//!     |event| {
//!         println!("Received: {}", event.message);
//!         Ok(())
//!     },
//! );
//!
//! // 发布事件
//! bus.publish(CacheEvent::info(
//!     "demo",
//!     "hello",
//!     EventPayload::custom("greeting", serde_json::Value::Null),
//! ));
//!
//! // 取消订阅
//! assert!(bus.unsubscribe(&subscription.id));
//! ```

use serde::Serialize;

use crate::events::{CacheEvent, EventSeverity, EventType};

pub mod bus;
pub mod sink;

pub use bus::EventBus;
pub use sink::{
    ConsoleSink, CustomSink, EventSink, FileSink, MailMessage, MailSink, MailTransport,
    SinkOutcome, WebhookSink,
};

/// 订阅句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// 订阅唯一 ID
    pub id: String,
}

impl Subscription {
    /// 创建新的订阅句柄
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// 事件过滤条件
///
/// 每个维度为空表示不过滤；多个维度之间是 AND 关系。
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// 事件类型过滤
    pub event_types: Vec<EventType>,
    /// 严重级别过滤
    pub severities: Vec<EventSeverity>,
    /// 发布者过滤
    pub sources: Vec<String>,
}

impl EventFilter {
    /// 创建新的过滤器 (匹配所有事件)
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加事件类型过滤
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_types.push(event_type);
        self
    }

    /// 设置事件类型过滤
    pub fn with_event_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types.extend(types);
        self
    }

    /// 设置严重级别过滤
    pub fn with_severities(mut self, severities: impl IntoIterator<Item = EventSeverity>) -> Self {
        self.severities.extend(severities);
        self
    }

    /// 只匹配不低于指定级别的事件
    pub fn with_min_severity(self, min: EventSeverity) -> Self {
        self.with_severities(
            [
                EventSeverity::Info,
                EventSeverity::Warning,
                EventSeverity::Error,
                EventSeverity::Critical,
            ]
            .into_iter()
            .filter(move |s| *s >= min),
        )
    }

    /// 添加发布者过滤
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &CacheEvent) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type()) {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.contains(&event.severity) {
            return false;
        }
        if !self.sources.is_empty() && !self.sources.iter().any(|s| s == &event.source) {
            return false;
        }
        true
    }
}

/// 事件统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventStats {
    /// 发布的事件总数
    pub total_published: u64,
    /// 成功投递给监听器的次数
    pub listener_deliveries: u64,
    /// 监听器错误 (含 panic)
    pub listener_errors: u64,
    /// 成功投递给 sink 的次数
    pub sink_deliveries: u64,
    /// sink 投递失败次数
    pub sink_failures: u64,
    /// 当前历史大小
    pub history_size: usize,
    /// 活跃监听器数量
    pub active_listeners: usize,
    /// 已注册 sink 数量
    pub active_sinks: usize,
}
