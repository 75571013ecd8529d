//! # 预热策略
//!
//! - `Immediate`: 固定批次，每批按并发度拆分成若干组并发写入
//! - `Priority`: 按优先级降序稳定排序一次 (同优先级保持输入顺序)，批次顺序执行，不拆分
//! - `Adaptive`: 按最近批次耗时调整批次大小和并发度

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::task::{Adjustment, PrewarmItem};

/// 预热策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrewarmStrategy {
    Immediate,
    Priority,
    Adaptive(AdaptiveSettings),
}

impl PrewarmStrategy {
    pub fn adaptive() -> Self {
        PrewarmStrategy::Adaptive(AdaptiveSettings::default())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrewarmStrategy::Immediate => "immediate",
            PrewarmStrategy::Priority => "priority",
            PrewarmStrategy::Adaptive(_) => "adaptive",
        }
    }
}

impl std::fmt::Display for PrewarmStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 预热选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrewarmOptions {
    /// 批次大小 (adaptive 策略的初始值)
    pub batch_size: usize,
    /// 并发度 (adaptive 策略的初始值)
    pub concurrency: usize,
    /// 单批超时，超时批次的未完成条目记为失败
    pub batch_timeout: Duration,
    /// 批次之间的等待 (immediate 策略)
    pub inter_batch_delay: Duration,
    /// 条目没有自己的 TTL 时使用
    pub ttl: Option<Duration>,
    /// 批量原语失败后逐条重试的次数
    pub max_retries: u32,
}

impl Default for PrewarmOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 4,
            batch_timeout: Duration::from_secs(30),
            inter_batch_delay: Duration::ZERO,
            ttl: None,
            max_retries: 2,
        }
    }
}

impl PrewarmOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// 自适应参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    /// 目标批次耗时
    pub target_batch_time: Duration,
    /// 耗时窗口大小
    pub window: usize,
    /// 调整前需要的最少样本数
    pub min_samples: usize,
    /// 每次调整的比例
    pub adjustment_factor: f64,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            target_batch_time: Duration::from_millis(100),
            window: 5,
            min_samples: 3,
            adjustment_factor: 0.25,
            min_batch_size: 1,
            max_batch_size: 1000,
            min_concurrency: 1,
            max_concurrency: 32,
        }
    }
}

/// 自适应控制器
///
/// 平均耗时超过 1.5 × 目标时缩小，低于 0.5 × 目标时放大。
/// 每次调整后清空窗口，下一个决定只基于新参数下的样本。
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    settings: AdaptiveSettings,
    batch_size: usize,
    concurrency: usize,
    samples: VecDeque<f64>,
}

impl AdaptiveController {
    pub fn new(settings: AdaptiveSettings, batch_size: usize, concurrency: usize) -> Self {
        let batch_size = batch_size.clamp(settings.min_batch_size.max(1), settings.max_batch_size.max(1));
        let concurrency = concurrency.clamp(settings.min_concurrency.max(1), settings.max_concurrency.max(1));
        Self {
            settings,
            batch_size,
            concurrency,
            samples: VecDeque::new(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 记录一个批次的耗时，发生调整时返回调整记录
    pub fn record(&mut self, batch_index: usize, elapsed: Duration) -> Option<Adjustment> {
        self.samples.push_back(elapsed.as_secs_f64() * 1000.0);
        while self.samples.len() > self.settings.window.max(1) {
            self.samples.pop_front();
        }
        if self.samples.len() < self.settings.min_samples.max(1) {
            return None;
        }

        let avg = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        let target = self.settings.target_batch_time.as_secs_f64() * 1000.0;
        let factor = self.settings.adjustment_factor.clamp(0.0, 1.0);

        let (batch_size, concurrency) = if avg > target * 1.5 {
            (
                shrink(self.batch_size, factor, self.settings.min_batch_size),
                shrink(self.concurrency, factor, self.settings.min_concurrency),
            )
        } else if avg < target * 0.5 {
            (
                grow(self.batch_size, factor, self.settings.max_batch_size),
                grow(self.concurrency, factor, self.settings.max_concurrency),
            )
        } else {
            return None;
        };

        if batch_size == self.batch_size && concurrency == self.concurrency {
            return None;
        }

        self.batch_size = batch_size;
        self.concurrency = concurrency;
        self.samples.clear();

        Some(Adjustment {
            after_batch: batch_index,
            avg_batch_ms: avg,
            batch_size,
            concurrency,
        })
    }
}

fn shrink(value: usize, factor: f64, min: usize) -> usize {
    let next = (value as f64 * (1.0 - factor)).floor() as usize;
    next.min(value.saturating_sub(1)).max(min.max(1))
}

fn grow(value: usize, factor: f64, max: usize) -> usize {
    let next = (value as f64 * (1.0 + factor)).ceil() as usize;
    next.max(value + 1).min(max.max(1))
}

/// 按优先级降序稳定排序
pub fn order_by_priority(items: &mut [PrewarmItem]) {
    items.sort_by(|a, b| b.priority.cmp(&a.priority));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ties_keep_input_order() {
        let mut items = vec![
            PrewarmItem::new("a", vec![]).with_priority(1),
            PrewarmItem::new("b", vec![]).with_priority(5),
            PrewarmItem::new("c", vec![]).with_priority(1),
            PrewarmItem::new("d", vec![]).with_priority(5),
        ];
        order_by_priority(&mut items);
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_controller_waits_for_min_samples() {
        let mut controller = AdaptiveController::new(AdaptiveSettings::default(), 100, 4);
        assert!(controller.record(0, Duration::from_secs(1)).is_none());
        assert!(controller.record(1, Duration::from_secs(1)).is_none());

        let adjustment = controller.record(2, Duration::from_secs(1)).unwrap();
        assert_eq!(adjustment.batch_size, 75);
        assert_eq!(adjustment.concurrency, 3);
        assert_eq!(adjustment.after_batch, 2);
    }

    #[test]
    fn test_controller_grows_and_clamps() {
        let settings = AdaptiveSettings {
            max_batch_size: 110,
            max_concurrency: 4,
            ..Default::default()
        };
        let mut controller = AdaptiveController::new(settings, 100, 4);
        for i in 0..3 {
            controller.record(i, Duration::from_millis(1));
        }
        assert_eq!(controller.batch_size(), 110);
        assert_eq!(controller.concurrency(), 4);
    }

    #[test]
    fn test_controller_holds_inside_band() {
        let mut controller = AdaptiveController::new(AdaptiveSettings::default(), 50, 2);
        for i in 0..10 {
            assert!(controller.record(i, Duration::from_millis(100)).is_none());
        }
        assert_eq!(controller.batch_size(), 50);
    }

    #[test]
    fn test_shrink_reaches_floor() {
        let mut controller = AdaptiveController::new(AdaptiveSettings::default(), 2, 1);
        for i in 0..30 {
            controller.record(i, Duration::from_secs(5));
        }
        assert_eq!(controller.batch_size(), 1);
        assert_eq!(controller.concurrency(), 1);
    }
}
