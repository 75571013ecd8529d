//! # 趋势分析
//!
//! 对尾部窗口做最小二乘线性回归 (x = 样本序号, y = 值)，
//! 按指标极性判断方向，并外推短/中/长期预测。

use serde::{Deserialize, Serialize};

use super::series::MetricKind;

/// 趋势方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Degrading,
    Stable,
}

/// 预测步长
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendHorizons {
    pub short: usize,
    pub medium: usize,
    pub long: usize,
}

impl Default for TrendHorizons {
    fn default() -> Self {
        Self {
            short: 5,
            medium: 15,
            long: 60,
        }
    }
}

/// 预测值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPredictions {
    pub short_term: f64,
    pub medium_term: f64,
    pub long_term: f64,
}

/// 趋势分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub metric: MetricKind,
    pub instance: String,
    pub direction: TrendDirection,
    pub slope: f64,
    /// R², 限制在 [0, 1]
    pub confidence: f64,
    pub points: usize,
    pub predictions: TrendPredictions,
}

/// 趋势分析参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendSettings {
    /// 少于此点数时返回 stable
    pub min_points: usize,
    /// |slope| 不超过此值视为 stable
    pub deadband: f64,
    pub horizons: TrendHorizons,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            min_points: 5,
            deadband: 0.01,
            horizons: TrendHorizons::default(),
        }
    }
}

/// 线性回归
///
/// # 返回
/// - `(slope, intercept, r_squared)`，少于 2 个点时全为 0
pub fn linear_regression(values: &[f64]) -> (f64, f64, f64) {
    if values.len() < 2 {
        return (0.0, 0.0, 0.0);
    }

    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_xx: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        return (0.0, sum_y / n, 0.0);
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    // R-squared
    let mean_y = sum_y / n;
    let ss_tot: f64 = values.iter().map(|y| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (slope * i as f64 + intercept)).powi(2))
        .sum();

    // 常数序列完美拟合
    let r_squared = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };
    (slope, intercept, r_squared)
}

/// 分析一段序列的趋势
pub fn analyze(metric: MetricKind, instance: &str, values: &[f64], settings: &TrendSettings) -> TrendAnalysis {
    let last = values.last().copied().unwrap_or(0.0);

    if values.len() < settings.min_points.max(2) {
        return TrendAnalysis {
            metric,
            instance: instance.to_string(),
            direction: TrendDirection::Stable,
            slope: 0.0,
            confidence: 0.0,
            points: values.len(),
            predictions: TrendPredictions {
                short_term: last,
                medium_term: last,
                long_term: last,
            },
        };
    }

    let (slope, intercept, r_squared) = linear_regression(values);
    let direction = if slope.abs() <= settings.deadband {
        TrendDirection::Stable
    } else if (slope > 0.0) == metric.higher_is_better() {
        TrendDirection::Improving
    } else {
        TrendDirection::Degrading
    };

    let last_x = (values.len() - 1) as f64;
    let predict = |steps: usize| intercept + slope * (last_x + steps as f64);

    TrendAnalysis {
        metric,
        instance: instance.to_string(),
        direction,
        slope,
        confidence: r_squared.clamp(0.0, 1.0),
        points: values.len(),
        predictions: TrendPredictions {
            short_term: predict(settings.horizons.short),
            medium_term: predict(settings.horizons.medium),
            long_term: predict(settings.horizons.long),
        },
    }
}
