//! # 告警
//!
//! 告警 id 由 (指标, 实例, tick) 组成，不同 tick 上的越界是不同的告警。
//! 保留策略：数量上限 (超出时先丢最旧的) 加存活时间上限。

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventSeverity;

/// 告警严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }

    /// 对应的事件级别
    pub fn event_severity(&self) -> EventSeverity {
        match self {
            AlertSeverity::Low => EventSeverity::Info,
            AlertSeverity::Medium => EventSeverity::Warning,
            AlertSeverity::High => EventSeverity::Error,
            AlertSeverity::Critical => EventSeverity::Critical,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 被监控的阈值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    LowHitRate,
    HighMemoryUsage,
    SlowResponseTime,
}

impl AlertMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertMetric::LowHitRate => "low_hit_rate",
            AlertMetric::HighMemoryUsage => "high_memory_usage",
            AlertMetric::SlowResponseTime => "slow_response_time",
        }
    }
}

impl std::fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// `{metric}:{instance}:{tick}`
    pub id: String,
    pub instance: String,
    pub metric: AlertMetric,
    pub severity: AlertSeverity,
    pub observed: f64,
    pub threshold: f64,
    pub message: String,
    pub tick: u64,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        instance: &str,
        metric: AlertMetric,
        severity: AlertSeverity,
        observed: f64,
        threshold: f64,
        tick: u64,
    ) -> Self {
        let message = match metric {
            AlertMetric::LowHitRate => format!(
                "hit rate {:.1}% below {:.1}% on '{}'",
                observed * 100.0,
                threshold * 100.0,
                instance
            ),
            AlertMetric::HighMemoryUsage => format!(
                "utilization {:.1}% above {:.1}% on '{}'",
                observed * 100.0,
                threshold * 100.0,
                instance
            ),
            AlertMetric::SlowResponseTime => format!(
                "response time {:.2}ms above {:.2}ms on '{}'",
                observed, threshold, instance
            ),
        };

        Self {
            id: format!("{}:{}:{}", metric, instance, tick),
            instance: instance.to_string(),
            metric,
            severity,
            observed,
            threshold,
            message,
            tick,
            created_at: Utc::now(),
            acknowledged: false,
        }
    }
}

/// 有界告警日志
#[derive(Debug)]
pub struct AlertLog {
    alerts: VecDeque<Alert>,
    max_alerts: usize,
    retention: Duration,
}

impl AlertLog {
    pub fn new(max_alerts: usize, retention: Duration) -> Self {
        Self {
            alerts: VecDeque::new(),
            max_alerts: max_alerts.max(1),
            retention,
        }
    }

    pub fn push(&mut self, alert: Alert) {
        self.alerts.push_back(alert);
        self.purge(Utc::now());
    }

    /// 按数量和时间清理
    pub fn purge(&mut self, now: DateTime<Utc>) {
        while self.alerts.len() > self.max_alerts {
            self.alerts.pop_front();
        }
        if let Ok(retention) = chrono::Duration::from_std(self.retention) {
            let cutoff = now - retention;
            self.alerts.retain(|a| a.created_at >= cutoff);
        }
    }

    /// 确认告警，id 不存在时返回 false
    pub fn acknowledge(&mut self, id: &str) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> Vec<Alert> {
        self.alerts.iter().filter(|a| !a.acknowledged).cloned().collect()
    }

    pub fn for_instance(&self, instance: &str) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|a| a.instance == instance)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    /// 删除已确认的告警，返回删除数量
    pub fn clear_acknowledged(&mut self) -> usize {
        let before = self.alerts.len();
        self.alerts.retain(|a| !a.acknowledged);
        before - self.alerts.len()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
