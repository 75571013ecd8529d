//! # 性能报告
//!
//! 评分 = 100 减去各越界阈值的固定扣分 (命中率 30，利用率 20，延迟 25)，
//! 等级 A ≥ 90，B ≥ 80，C ≥ 70，D ≥ 60，其余为 F。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InstanceMetrics, MonitorThresholds};

pub const HIT_RATE_PENALTY: u32 = 30;
pub const UTILIZATION_PENALTY: u32 = 20;
pub const LATENCY_PENALTY: u32 = 25;

/// 实例性能报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub instance: String,
    pub generated_at: DateTime<Utc>,
    pub score: u32,
    pub grade: char,
    pub issues: Vec<String>,
    pub optimizations: Vec<String>,
    pub metrics: InstanceMetrics,
}

/// 分数对应的等级
pub fn grade_for(score: u32) -> char {
    if score >= 90 {
        'A'
    } else if score >= 80 {
        'B'
    } else if score >= 70 {
        'C'
    } else if score >= 60 {
        'D'
    } else {
        'F'
    }
}

/// 根据最新指标生成报告
pub fn build_report(metrics: &InstanceMetrics, thresholds: &MonitorThresholds) -> PerformanceReport {
    let mut score: u32 = 100;
    let mut issues = Vec::new();
    let mut optimizations = Vec::new();

    let hit_rate_checked = metrics.total_reads >= thresholds.min_requests_for_hit_rate;
    if hit_rate_checked && metrics.hit_rate < thresholds.low_hit_rate {
        score = score.saturating_sub(HIT_RATE_PENALTY);
        issues.push(format!(
            "hit rate {:.1}% is below {:.1}%",
            metrics.hit_rate * 100.0,
            thresholds.low_hit_rate * 100.0
        ));
        optimizations.push("increase max_size or lengthen default_ttl".to_string());
        optimizations.push("prewarm hot keys".to_string());
    }

    if metrics.utilization > thresholds.high_memory_usage {
        score = score.saturating_sub(UTILIZATION_PENALTY);
        issues.push(format!(
            "utilization {:.1}% is above {:.1}%",
            metrics.utilization * 100.0,
            thresholds.high_memory_usage * 100.0
        ));
        optimizations.push("increase max_size or shorten default_ttl".to_string());
    }

    if metrics.response_time_ms > thresholds.slow_response_time_ms {
        score = score.saturating_sub(LATENCY_PENALTY);
        issues.push(format!(
            "response time {:.2}ms is above {:.2}ms",
            metrics.response_time_ms, thresholds.slow_response_time_ms
        ));
        optimizations.push("split large batch operations".to_string());
    }

    PerformanceReport {
        instance: metrics.instance.clone(),
        generated_at: Utc::now(),
        score,
        grade: grade_for(score),
        issues,
        optimizations,
        metrics: metrics.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(hit_rate: f64, utilization: f64, response_time_ms: f64) -> InstanceMetrics {
        InstanceMetrics {
            instance: "user".into(),
            timestamp: Utc::now(),
            hit_rate,
            utilization,
            response_time_ms,
            memory_usage: 0,
            size: 0,
            max_size: 100,
            total_reads: 100,
        }
    }

    #[test]
    fn test_grades() {
        assert_eq!(grade_for(100), 'A');
        assert_eq!(grade_for(90), 'A');
        assert_eq!(grade_for(80), 'B');
        assert_eq!(grade_for(75), 'C');
        assert_eq!(grade_for(60), 'D');
        assert_eq!(grade_for(25), 'F');
    }

    #[test]
    fn test_penalties() {
        let thresholds = MonitorThresholds::default();

        let healthy = build_report(&metrics(0.95, 0.5, 1.0), &thresholds);
        assert_eq!(healthy.score, 100);
        assert!(healthy.issues.is_empty());

        let all_bad = build_report(&metrics(0.2, 0.99, 900.0), &thresholds);
        assert_eq!(all_bad.score, 25);
        assert_eq!(all_bad.grade, 'F');
        assert_eq!(all_bad.issues.len(), 3);

        let hit_only = build_report(&metrics(0.5, 0.1, 1.0), &thresholds);
        assert_eq!(hit_only.score, 70);
        assert_eq!(hit_only.grade, 'C');
    }

    #[test]
    fn test_idle_store_skips_hit_rate() {
        let mut idle = metrics(0.0, 0.0, 1.0);
        idle.total_reads = 0;
        let report = build_report(&idle, &MonitorThresholds::default());
        assert_eq!(report.score, 100);
    }
}
