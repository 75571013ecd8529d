//! # 建议
//!
//! 异常原因与建议是 (指标, 越界方向) 到固定文本的确定性映射，
//! 附带观测到的数值。实例级调优建议由最新指标和趋势综合得出。

use serde::{Deserialize, Serialize};

use super::series::MetricKind;
use super::trend::{TrendAnalysis, TrendDirection};

/// 越界方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreachDirection {
    Above,
    Below,
}

/// 可能原因
pub fn causes_for(metric: MetricKind, direction: BreachDirection) -> Vec<String> {
    let causes: &[&str] = match (metric, direction) {
        (MetricKind::HitRate, BreachDirection::Below) => &[
            "working set larger than cache capacity",
            "TTL shorter than the key reuse interval",
            "access pattern shifted to new keys",
        ],
        (MetricKind::HitRate, BreachDirection::Above) => &["traffic concentrated on a few hot keys"],
        (MetricKind::Utilization, BreachDirection::Above) => &[
            "capacity too small for the working set",
            "entries written without TTL accumulate",
        ],
        (MetricKind::Utilization, BreachDirection::Below) => &[
            "capacity larger than needed",
            "recent clear or migration emptied the cache",
        ],
        (MetricKind::ResponseTimeMs, BreachDirection::Above) => &[
            "lock contention from large batch operations",
            "host under CPU pressure",
        ],
        (MetricKind::ResponseTimeMs, BreachDirection::Below) => &["load dropped"],
        (MetricKind::MemoryUsageBytes, BreachDirection::Above) => &[
            "values larger than usual",
            "expired entries not yet swept",
        ],
        (MetricKind::MemoryUsageBytes, BreachDirection::Below) => &["cache was cleared or shrunk"],
        (MetricKind::EvictionRate, BreachDirection::Above) => &[
            "capacity pressure forces evictions",
            "bulk prewarm larger than capacity",
        ],
        (MetricKind::EvictionRate, BreachDirection::Below) => &["write load dropped"],
        (MetricKind::ErrorRate, BreachDirection::Above) => &[
            "operations against a destroyed store",
            "callers racing instance removal",
        ],
        (MetricKind::ErrorRate, BreachDirection::Below) => &["error source resolved"],
    };
    causes.iter().map(|c| c.to_string()).collect()
}

/// 针对单个异常的建议
pub fn recommendations_for(
    metric: MetricKind,
    direction: BreachDirection,
    observed: f64,
    expected: f64,
) -> Vec<String> {
    match (metric, direction) {
        (MetricKind::HitRate, BreachDirection::Below) => vec![
            format!(
                "hit rate {:.1}% is below {:.1}%: raise max_size or lengthen default_ttl",
                observed * 100.0,
                expected * 100.0
            ),
            "prewarm frequently read keys after deploys".to_string(),
        ],
        (MetricKind::Utilization, BreachDirection::Above) => vec![format!(
            "utilization {:.1}% exceeds {:.1}%: raise max_size or shorten default_ttl",
            observed * 100.0,
            expected * 100.0
        )],
        (MetricKind::Utilization, BreachDirection::Below) => vec![format!(
            "utilization {:.1}%: max_size can be reduced",
            observed * 100.0
        )],
        (MetricKind::ResponseTimeMs, BreachDirection::Above) => vec![
            format!(
                "response time {:.2}ms exceeds {:.2}ms: split large batches",
                observed, expected
            ),
            "lower prewarm concurrency during peak traffic".to_string(),
        ],
        (MetricKind::MemoryUsageBytes, BreachDirection::Above) => vec![format!(
            "memory usage {:.0} bytes exceeds {:.0} bytes: shorten cleanup_interval or reduce max_size",
            observed, expected
        )],
        (MetricKind::EvictionRate, BreachDirection::Above) => vec![format!(
            "{:.1} evictions per tick: raise max_size",
            observed
        )],
        (MetricKind::ErrorRate, BreachDirection::Above) => vec![format!(
            "error rate {:.2}%: check callers still using removed instances",
            observed * 100.0
        )],
        _ => vec![format!(
            "{} moved {} expected value {:.3} (observed {:.3}); no action required",
            metric,
            match direction {
                BreachDirection::Above => "above",
                BreachDirection::Below => "below",
            },
            expected,
            observed
        )],
    }
}

/// 建议优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
}

/// 实例调优建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: RecommendationPriority,
    /// 建议调整的配置字段
    pub field: String,
    pub message: String,
}

/// 最新指标快照 (缺失的指标为 None)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestMetrics {
    pub hit_rate: Option<f64>,
    pub utilization: Option<f64>,
    pub response_time_ms: Option<f64>,
    pub memory_usage_bytes: Option<f64>,
    pub eviction_rate: Option<f64>,
    pub error_rate: Option<f64>,
}

impl LatestMetrics {
    pub fn get(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::HitRate => self.hit_rate,
            MetricKind::Utilization => self.utilization,
            MetricKind::ResponseTimeMs => self.response_time_ms,
            MetricKind::MemoryUsageBytes => self.memory_usage_bytes,
            MetricKind::EvictionRate => self.eviction_rate,
            MetricKind::ErrorRate => self.error_rate,
        }
    }

    pub fn set(&mut self, metric: MetricKind, value: f64) {
        let slot = match metric {
            MetricKind::HitRate => &mut self.hit_rate,
            MetricKind::Utilization => &mut self.utilization,
            MetricKind::ResponseTimeMs => &mut self.response_time_ms,
            MetricKind::MemoryUsageBytes => &mut self.memory_usage_bytes,
            MetricKind::EvictionRate => &mut self.eviction_rate,
            MetricKind::ErrorRate => &mut self.error_rate,
        };
        *slot = Some(value);
    }
}

/// 由最新指标和趋势综合出调优建议 (按优先级从高到低)
pub fn tune(latest: &LatestMetrics, trends: &[TrendAnalysis]) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let degrading = |metric: MetricKind| {
        trends
            .iter()
            .any(|t| t.metric == metric && t.direction == TrendDirection::Degrading)
    };

    let hit_rate = latest.hit_rate;
    let utilization = latest.utilization;

    if let (Some(hit), Some(util)) = (hit_rate, utilization) {
        if hit < 0.8 && util > 0.9 {
            out.push(Recommendation {
                priority: RecommendationPriority::High,
                field: "max_size".to_string(),
                message: format!(
                    "cache is {:.0}% full with {:.0}% hit rate: raise max_size",
                    util * 100.0,
                    hit * 100.0
                ),
            });
        } else if hit < 0.8 && util < 0.5 {
            out.push(Recommendation {
                priority: RecommendationPriority::Medium,
                field: "default_ttl".to_string(),
                message: format!(
                    "hit rate {:.0}% with spare capacity: lengthen default_ttl",
                    hit * 100.0
                ),
            });
        }
    }

    if latest.eviction_rate.map(|r| r > 0.0).unwrap_or(false) && degrading(MetricKind::EvictionRate) {
        out.push(Recommendation {
            priority: RecommendationPriority::High,
            field: "max_size".to_string(),
            message: "evictions are rising: raise max_size before hit rate drops".to_string(),
        });
    }

    if degrading(MetricKind::MemoryUsageBytes) {
        out.push(Recommendation {
            priority: RecommendationPriority::Medium,
            field: "cleanup_interval".to_string(),
            message: "memory usage is trending up: shorten cleanup_interval so expired entries are swept sooner"
                .to_string(),
        });
    }

    if latest.response_time_ms.map(|r| r > 100.0).unwrap_or(false) || degrading(MetricKind::ResponseTimeMs) {
        out.push(Recommendation {
            priority: RecommendationPriority::Medium,
            field: "max_size".to_string(),
            message: "response time is high or rising: reduce batch sizes or max_size".to_string(),
        });
    }

    if latest.error_rate.map(|r| r > 0.01).unwrap_or(false) {
        out.push(Recommendation {
            priority: RecommendationPriority::High,
            field: "enabled".to_string(),
            message: "operations are failing: check callers of removed or closed instances".to_string(),
        });
    }

    if degrading(MetricKind::HitRate) && out.is_empty() {
        out.push(Recommendation {
            priority: RecommendationPriority::Low,
            field: "default_ttl".to_string(),
            message: "hit rate is trending down: review default_ttl against key reuse".to_string(),
        });
    }

    out.sort_by(|a, b| b.priority.cmp(&a.priority));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_deterministic() {
        assert_eq!(
            causes_for(MetricKind::HitRate, BreachDirection::Below),
            causes_for(MetricKind::HitRate, BreachDirection::Below)
        );
        let recs = recommendations_for(MetricKind::HitRate, BreachDirection::Below, 0.42, 0.8);
        assert!(recs[0].contains("42.0%"));
    }

    #[test]
    fn test_tune_full_and_cold() {
        let mut latest = LatestMetrics::default();
        latest.set(MetricKind::HitRate, 0.4);
        latest.set(MetricKind::Utilization, 0.97);
        let recs = tune(&latest, &[]);
        assert_eq!(recs[0].field, "max_size");
        assert_eq!(recs[0].priority, RecommendationPriority::High);

        latest.set(MetricKind::Utilization, 0.1);
        let recs = tune(&latest, &[]);
        assert_eq!(recs[0].field, "default_ttl");
    }

    #[test]
    fn test_tune_healthy_is_empty() {
        let mut latest = LatestMetrics::default();
        latest.set(MetricKind::HitRate, 0.95);
        latest.set(MetricKind::Utilization, 0.6);
        latest.set(MetricKind::ResponseTimeMs, 0.2);
        assert!(tune(&latest, &[]).is_empty());
    }
}
