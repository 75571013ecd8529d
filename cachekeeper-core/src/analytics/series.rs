//! # 时间序列
//!
//! 每个 (指标, 实例) 一条有界序列：超过点数上限或时间上限时丢弃最旧的样本。

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 分析的指标种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    HitRate,
    Utilization,
    ResponseTimeMs,
    MemoryUsageBytes,
    EvictionRate,
    ErrorRate,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::HitRate,
        MetricKind::Utilization,
        MetricKind::ResponseTimeMs,
        MetricKind::MemoryUsageBytes,
        MetricKind::EvictionRate,
        MetricKind::ErrorRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::HitRate => "hit_rate",
            MetricKind::Utilization => "utilization",
            MetricKind::ResponseTimeMs => "response_time_ms",
            MetricKind::MemoryUsageBytes => "memory_usage_bytes",
            MetricKind::EvictionRate => "eviction_rate",
            MetricKind::ErrorRate => "error_rate",
        }
    }

    /// 数值越大越好 (只有命中率)
    pub fn higher_is_better(&self) -> bool {
        matches!(self, MetricKind::HitRate)
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个样本
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// 有界时间序列
#[derive(Debug, Clone)]
pub struct TimeSeries {
    points: VecDeque<MetricSample>,
    max_points: usize,
    max_age: Duration,
}

impl TimeSeries {
    /// # 参数
    /// - `max_points`: 点数上限
    /// - `max_age`: 样本最大存活时间
    pub fn new(max_points: usize, max_age: Duration) -> Self {
        Self {
            points: VecDeque::with_capacity(max_points.min(1024)),
            max_points: max_points.max(1),
            max_age,
        }
    }

    /// 追加当前时间的样本
    pub fn push(&mut self, value: f64) {
        self.push_at(Utc::now(), value);
    }

    /// 追加指定时间的样本
    pub fn push_at(&mut self, timestamp: DateTime<Utc>, value: f64) {
        self.points.push_back(MetricSample { timestamp, value });

        while self.points.len() > self.max_points {
            self.points.pop_front();
        }

        if let Ok(max_age) = chrono::Duration::from_std(self.max_age) {
            let cutoff = timestamp - max_age;
            while self
                .points
                .front()
                .map(|p| p.timestamp < cutoff)
                .unwrap_or(false)
            {
                self.points.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<MetricSample> {
        self.points.back().copied()
    }

    /// 所有样本 (从旧到新)
    pub fn samples(&self) -> Vec<MetricSample> {
        self.points.iter().copied().collect()
    }

    /// 最近 `n` 个样本的值 (从旧到新)
    pub fn tail_values(&self, n: usize) -> Vec<f64> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).map(|p| p.value).collect()
    }
}

/// 描述性统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
}

impl Statistics {
    /// 空输入返回 `None`
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mean = mean(values);
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Some(Self {
            count: values.len(),
            mean,
            std_dev: population_std_dev(values, mean),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p95: percentile(&sorted, 0.95),
        })
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// 总体标准差
pub fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// 最近秩百分位 (输入已排序)
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
