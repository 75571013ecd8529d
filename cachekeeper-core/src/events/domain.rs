//! 事件负载定义

use serde::{Deserialize, Serialize};

use crate::cache::InstanceConfig;

/// 事件类型 (用于订阅过滤)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ConfigChanged,
    ConfigReloaded,
    StatsUpdated,
    ThresholdBreached,
    ReportGenerated,
    AnomalyDetected,
    PrewarmStarted,
    BatchCompleted,
    PrewarmCompleted,
    PrewarmFailed,
    PrewarmCancelled,
    Custom,
}

impl EventType {
    /// 获取事件类型字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ConfigChanged => "config_changed",
            EventType::ConfigReloaded => "config_reloaded",
            EventType::StatsUpdated => "stats_updated",
            EventType::ThresholdBreached => "threshold_breached",
            EventType::ReportGenerated => "report_generated",
            EventType::AnomalyDetected => "anomaly_detected",
            EventType::PrewarmStarted => "prewarm_started",
            EventType::BatchCompleted => "batch_completed",
            EventType::PrewarmCompleted => "prewarm_completed",
            EventType::PrewarmFailed => "prewarm_failed",
            EventType::PrewarmCancelled => "prewarm_cancelled",
            EventType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 事件负载
///
/// 封闭集合，序列化为 `{"type": "...", "payload": {...}}`。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    /// 实例配置变更 (迁移完成后发布)
    ConfigChanged {
        instance: String,
        old: Option<InstanceConfig>,
        new: InstanceConfig,
    },
    /// 配置文件热加载
    ConfigReloaded {
        path: String,
        applied: Vec<String>,
        rejected: Vec<String>,
    },
    /// 实例采样结果
    StatsUpdated {
        instance: String,
        hit_rate: f64,
        utilization: f64,
        response_time_ms: f64,
        memory_usage: usize,
        size: usize,
        max_size: usize,
    },
    /// 阈值告警
    ThresholdBreached {
        alert_id: String,
        instance: String,
        metric: String,
        observed: f64,
        threshold: f64,
    },
    /// 健康报告
    ReportGenerated {
        instance: String,
        score: u32,
        grade: char,
        issues: Vec<String>,
    },
    /// 异常检测
    AnomalyDetected {
        instance: String,
        metric: String,
        kind: String,
        observed: f64,
        expected: f64,
        deviation: f64,
    },
    /// 预热开始
    PrewarmStarted {
        task_id: String,
        instance: String,
        total: usize,
        strategy: String,
    },
    /// 批量操作完成
    BatchCompleted {
        instance: String,
        operation: String,
        total: usize,
        succeeded: usize,
        failed: usize,
        duration_ms: u64,
    },
    /// 预热成功完成
    PrewarmCompleted {
        task_id: String,
        instance: String,
        total: usize,
        completed: usize,
        duration_ms: u64,
    },
    /// 预热失败 (可能部分成功)
    PrewarmFailed {
        task_id: String,
        instance: String,
        total: usize,
        completed: usize,
        failed: usize,
        error: String,
    },
    /// 预热被取消
    PrewarmCancelled {
        task_id: String,
        instance: String,
        completed: usize,
    },
    /// 自定义事件
    Custom {
        name: String,
        data: serde_json::Value,
    },
}

impl EventPayload {
    /// 创建自定义负载
    pub fn custom(name: impl Into<String>, data: serde_json::Value) -> Self {
        EventPayload::Custom {
            name: name.into(),
            data,
        }
    }

    /// 获取事件类型
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::ConfigChanged { .. } => EventType::ConfigChanged,
            EventPayload::ConfigReloaded { .. } => EventType::ConfigReloaded,
            EventPayload::StatsUpdated { .. } => EventType::StatsUpdated,
            EventPayload::ThresholdBreached { .. } => EventType::ThresholdBreached,
            EventPayload::ReportGenerated { .. } => EventType::ReportGenerated,
            EventPayload::AnomalyDetected { .. } => EventType::AnomalyDetected,
            EventPayload::PrewarmStarted { .. } => EventType::PrewarmStarted,
            EventPayload::BatchCompleted { .. } => EventType::BatchCompleted,
            EventPayload::PrewarmCompleted { .. } => EventType::PrewarmCompleted,
            EventPayload::PrewarmFailed { .. } => EventType::PrewarmFailed,
            EventPayload::PrewarmCancelled { .. } => EventType::PrewarmCancelled,
            EventPayload::Custom { .. } => EventType::Custom,
        }
    }

    /// 涉及的缓存实例
    pub fn instance(&self) -> Option<&str> {
        match self {
            EventPayload::ConfigChanged { instance, .. }
            | EventPayload::StatsUpdated { instance, .. }
            | EventPayload::ThresholdBreached { instance, .. }
            | EventPayload::ReportGenerated { instance, .. }
            | EventPayload::AnomalyDetected { instance, .. }
            | EventPayload::PrewarmStarted { instance, .. }
            | EventPayload::BatchCompleted { instance, .. }
            | EventPayload::PrewarmCompleted { instance, .. }
            | EventPayload::PrewarmFailed { instance, .. }
            | EventPayload::PrewarmCancelled { instance, .. } => Some(instance),
            EventPayload::ConfigReloaded { .. } | EventPayload::Custom { .. } => None,
        }
    }
}
