//! # 异常检测
//!
//! 两级检测：
//! 1. 绝对阈值 `{min, max}`，越界即为 threshold 异常
//! 2. 否则对之前的样本窗口 (不含当前样本) 求均值和总体标准差，
//!    `|value - mean| > k·σ` 为 statistical 异常，
//!    `|value - mean| > σ·(k + offset)` 时升级严重级别

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::recommend::{causes_for, recommendations_for, BreachDirection};
use super::series::{mean, population_std_dev, MetricKind};
use crate::events::EventSeverity;

/// 异常种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Threshold,
    Statistical,
}

/// 异常严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    /// 对应的事件级别
    pub fn event_severity(&self) -> EventSeverity {
        match self {
            AnomalySeverity::Low => EventSeverity::Info,
            AnomalySeverity::Medium => EventSeverity::Warning,
            AnomalySeverity::High => EventSeverity::Error,
            AnomalySeverity::Critical => EventSeverity::Critical,
        }
    }
}

/// 绝对阈值
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MetricThreshold {
    pub fn min(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn max(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// 越界时返回 (方向, 被突破的边界)
    pub fn breach(&self, value: f64) -> Option<(BreachDirection, f64)> {
        if let Some(min) = self.min {
            if value < min {
                return Some((BreachDirection::Below, min));
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Some((BreachDirection::Above, max));
            }
        }
        None
    }
}

/// 检测到的异常
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub instance: String,
    pub metric: MetricKind,
    pub timestamp: DateTime<Utc>,
    pub observed: f64,
    /// threshold: 被突破的边界; statistical: 窗口均值
    pub expected: f64,
    /// |observed - expected|
    pub deviation: f64,
    pub severity: AnomalySeverity,
    pub kind: AnomalyKind,
    pub causes: Vec<String>,
    pub recommendations: Vec<String>,
}

/// 统计检测参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    /// 统计检测所需的最少历史样本数
    pub min_samples: usize,
    /// k
    pub std_dev_multiplier: f64,
    /// 升级阈值 σ·(k + offset) 中的 offset
    pub escalation_offset: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            min_samples: 10,
            std_dev_multiplier: 2.0,
            escalation_offset: 1.0,
        }
    }
}

/// 检测单个样本
///
/// # 参数
/// - `history`: 当前样本之前的窗口
/// - `value`: 当前样本
pub fn detect(
    metric: MetricKind,
    instance: &str,
    history: &[f64],
    value: f64,
    threshold: Option<&MetricThreshold>,
    settings: &DetectorSettings,
) -> Option<Anomaly> {
    if let Some((direction, bound)) = threshold.and_then(|t| t.breach(value)) {
        return Some(build(
            metric,
            instance,
            value,
            bound,
            AnomalyKind::Threshold,
            AnomalySeverity::High,
            direction,
        ));
    }

    if history.len() < settings.min_samples.max(1) {
        return None;
    }

    let mean = mean(history);
    let sigma = population_std_dev(history, mean);
    let deviation = (value - mean).abs();
    let k = settings.std_dev_multiplier;

    if deviation <= k * sigma {
        return None;
    }

    let severity = if deviation > sigma * (k + settings.escalation_offset) {
        AnomalySeverity::High
    } else {
        AnomalySeverity::Medium
    };
    let direction = if value > mean {
        BreachDirection::Above
    } else {
        BreachDirection::Below
    };

    Some(build(
        metric,
        instance,
        value,
        mean,
        AnomalyKind::Statistical,
        severity,
        direction,
    ))
}

fn build(
    metric: MetricKind,
    instance: &str,
    observed: f64,
    expected: f64,
    kind: AnomalyKind,
    severity: AnomalySeverity,
    direction: BreachDirection,
) -> Anomaly {
    Anomaly {
        instance: instance.to_string(),
        metric,
        timestamp: Utc::now(),
        observed,
        expected,
        deviation: (observed - expected).abs(),
        severity,
        kind,
        causes: causes_for(metric, direction),
        recommendations: recommendations_for(metric, direction, observed, expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spike_after_flat_history() {
        let history = vec![10.0; 10];
        let settings = DetectorSettings::default();

        let anomaly = detect(MetricKind::ResponseTimeMs, "api", &history, 100.0, None, &settings).unwrap();
        assert_eq!(anomaly.kind, AnomalyKind::Statistical);
        assert_eq!(anomaly.expected, 10.0);
        assert_eq!(anomaly.deviation, 90.0);
        assert!(!anomaly.causes.is_empty());

        assert!(detect(MetricKind::ResponseTimeMs, "api", &history, 10.0, None, &settings).is_none());
    }

    #[test]
    fn test_needs_min_samples() {
        let history = vec![10.0; 9];
        assert!(detect(
            MetricKind::ResponseTimeMs,
            "api",
            &history,
            1000.0,
            None,
            &DetectorSettings::default()
        )
        .is_none());
    }

    #[test]
    fn test_escalation() {
        // mean 10, σ 1
        let history: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 9.0 } else { 11.0 }).collect();
        let settings = DetectorSettings::default();

        let medium = detect(MetricKind::ResponseTimeMs, "api", &history, 12.5, None, &settings).unwrap();
        assert_eq!(medium.severity, AnomalySeverity::Medium);

        let high = detect(MetricKind::ResponseTimeMs, "api", &history, 13.5, None, &settings).unwrap();
        assert_eq!(high.severity, AnomalySeverity::High);

        assert!(detect(MetricKind::ResponseTimeMs, "api", &history, 11.5, None, &settings).is_none());
    }

    #[test]
    fn test_threshold_wins_without_history() {
        let threshold = MetricThreshold::min(0.5);
        let anomaly = detect(
            MetricKind::HitRate,
            "user",
            &[],
            0.2,
            Some(&threshold),
            &DetectorSettings::default(),
        )
        .unwrap();
        assert_eq!(anomaly.kind, AnomalyKind::Threshold);
        assert_eq!(anomaly.expected, 0.5);
        assert!((anomaly.deviation - 0.3).abs() < 1e-9);
    }
}
