//! # Analytics
//!
//! 缓存指标的时间序列分析。
//!
//! ## 功能
//!
//! - 每个 (指标, 实例) 一条有界时间序列
//! - 阈值 / 统计异常检测，异常发布 `anomaly_detected` 事件
//! - 线性回归趋势与预测
//! - 调优建议与实例健康评分
//!
//! ## 数据来源
//!
//! Monitor 每个周期喂入命中率、利用率、响应时间和内存；
//! Analytics 自己的采集任务通过注册表轮询统计，计算驱逐率和错误率。

pub mod anomaly;
pub mod recommend;
pub mod series;
pub mod trend;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::StoreStats;
use crate::config::ConfigRegistry;
use crate::error::Result;
use crate::event_bus::EventBus;
use crate::events::EventPayload;
use crate::scheduler::{PeriodicTask, TickControl};

pub use anomaly::{
    detect, Anomaly, AnomalyKind, AnomalySeverity, DetectorSettings, MetricThreshold,
};
pub use recommend::{
    causes_for, recommendations_for, tune, BreachDirection, LatestMetrics, Recommendation,
    RecommendationPriority,
};
pub use series::{MetricKind, MetricSample, Statistics, TimeSeries};
pub use trend::{
    analyze, linear_regression, TrendAnalysis, TrendDirection, TrendHorizons, TrendPredictions,
    TrendSettings,
};

const EVENT_SOURCE: &str = "analytics";

/// 分析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// 统计检测与趋势使用的尾部窗口
    pub window: usize,
    pub detector: DetectorSettings,
    pub trend: TrendSettings,
    /// 每条序列的点数上限
    pub max_points: usize,
    /// 每条序列的样本存活时间
    pub max_age: Duration,
    /// 绝对阈值
    pub thresholds: HashMap<MetricKind, MetricThreshold>,
    /// 保留的异常数量上限
    pub max_anomalies: usize,
    /// 采集周期
    pub collection_interval: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        let mut thresholds = HashMap::new();
        thresholds.insert(MetricKind::HitRate, MetricThreshold::min(0.5));
        thresholds.insert(MetricKind::Utilization, MetricThreshold::max(0.95));
        thresholds.insert(MetricKind::ResponseTimeMs, MetricThreshold::max(500.0));
        thresholds.insert(MetricKind::ErrorRate, MetricThreshold::max(0.05));

        Self {
            window: 50,
            detector: DetectorSettings::default(),
            trend: TrendSettings::default(),
            max_points: 1000,
            max_age: Duration::from_secs(24 * 3600),
            thresholds,
            max_anomalies: 1000,
            collection_interval: Duration::from_secs(60),
        }
    }
}

impl AnalyticsConfig {
    pub fn with_threshold(mut self, metric: MetricKind, threshold: MetricThreshold) -> Self {
        self.thresholds.insert(metric, threshold);
        self
    }

    pub fn without_threshold(mut self, metric: MetricKind) -> Self {
        self.thresholds.remove(&metric);
        self
    }

    pub fn with_std_dev_multiplier(mut self, k: f64) -> Self {
        self.detector.std_dev_multiplier = k;
        self
    }

    pub fn with_escalation_offset(mut self, offset: f64) -> Self {
        self.detector.escalation_offset = offset;
        self
    }

    pub fn with_collection_interval(mut self, interval: Duration) -> Self {
        self.collection_interval = interval;
        self
    }
}

/// 异常查询条件
#[derive(Debug, Clone, Default)]
pub struct AnomalyFilter {
    pub instance: Option<String>,
    pub metric: Option<MetricKind>,
    pub min_severity: Option<AnomalySeverity>,
    pub since: Option<DateTime<Utc>>,
}

impl AnomalyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn for_metric(mut self, metric: MetricKind) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn with_min_severity(mut self, severity: AnomalySeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, anomaly: &Anomaly) -> bool {
        self.instance.as_ref().map(|i| *i == anomaly.instance).unwrap_or(true)
            && self.metric.map(|m| m == anomaly.metric).unwrap_or(true)
            && self.min_severity.map(|s| anomaly.severity >= s).unwrap_or(true)
            && self.since.map(|t| anomaly.timestamp >= t).unwrap_or(true)
    }
}

/// 实例分析摘要
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub instance: String,
    /// 0-100
    pub health_score: u32,
    pub latest: LatestMetrics,
    pub trends: Vec<TrendAnalysis>,
    pub anomaly_count: usize,
    pub recommendations: Vec<Recommendation>,
}

/// 上一次采集的累计计数，用于计算增量
#[derive(Debug, Clone, Copy, Default)]
struct CounterMark {
    evicted: u64,
    errors: u64,
    operations: u64,
}

fn operations(stats: &StoreStats) -> u64 {
    stats.hits + stats.misses + stats.sets + stats.deletes + stats.clears
}

/// 计数器被重置 (例如迁移后新建存储) 时把当前值当作增量
fn delta(current: u64, previous: u64) -> u64 {
    if current >= previous {
        current - previous
    } else {
        current
    }
}

/// 分析引擎
pub struct Analytics {
    config: AnalyticsConfig,
    series: RwLock<HashMap<(MetricKind, String), TimeSeries>>,
    anomalies: Mutex<VecDeque<Anomaly>>,
    marks: Mutex<HashMap<String, CounterMark>>,
    bus: Option<Arc<EventBus>>,
    registry: Option<Arc<ConfigRegistry>>,
    collector: Mutex<Option<PeriodicTask>>,
}

impl Analytics {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            series: RwLock::new(HashMap::new()),
            anomalies: Mutex::new(VecDeque::new()),
            marks: Mutex::new(HashMap::new()),
            bus: None,
            registry: None,
            collector: Mutex::new(None),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// 设置采集任务轮询的注册表
    pub fn with_registry(mut self, registry: Arc<ConfigRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// 记录一个样本
    ///
    /// 先检查绝对阈值，未越界时再对之前的窗口做统计检测。
    ///
    /// # 返回
    /// - 检测到的异常 (已保存并发布事件)
    pub fn record(&self, metric: MetricKind, instance: &str, value: f64) -> Option<Anomaly> {
        if !value.is_finite() {
            debug!(instance = %instance, metric = %metric, "Ignoring non-finite sample");
            return None;
        }

        let anomaly = {
            let mut series = self.series.write();
            let entry = series
                .entry((metric, instance.to_string()))
                .or_insert_with(|| TimeSeries::new(self.config.max_points, self.config.max_age));
            let history = entry.tail_values(self.config.window);
            let anomaly = detect(
                metric,
                instance,
                &history,
                value,
                self.config.thresholds.get(&metric),
                &self.config.detector,
            );
            entry.push(value);
            anomaly
        };

        let anomaly = anomaly?;
        {
            let mut anomalies = self.anomalies.lock();
            anomalies.push_back(anomaly.clone());
            while anomalies.len() > self.config.max_anomalies {
                anomalies.pop_front();
            }
        }

        debug!(
            instance = %instance,
            metric = %metric,
            observed = anomaly.observed,
            expected = anomaly.expected,
            severity = ?anomaly.severity,
            "Anomaly detected"
        );

        if let Some(bus) = &self.bus {
            bus.emit(
                EVENT_SOURCE,
                anomaly.severity.event_severity(),
                format!(
                    "{} anomaly on {}: observed {:.3}, expected {:.3}",
                    metric, instance, anomaly.observed, anomaly.expected
                ),
                EventPayload::AnomalyDetected {
                    instance: instance.to_string(),
                    metric: metric.as_str().to_string(),
                    kind: match anomaly.kind {
                        AnomalyKind::Threshold => "threshold".to_string(),
                        AnomalyKind::Statistical => "statistical".to_string(),
                    },
                    observed: anomaly.observed,
                    expected: anomaly.expected,
                    deviation: anomaly.deviation,
                },
            );
        }

        Some(anomaly)
    }

    /// 由统计快照计算驱逐率和错误率
    ///
    /// 驱逐率 = 本周期驱逐增量；错误率 = 本周期错误增量 / 操作增量。
    pub fn record_stats(&self, instance: &str, stats: &StoreStats) -> Vec<Anomaly> {
        let current = CounterMark {
            evicted: stats.evicted,
            errors: stats.errors,
            operations: operations(stats),
        };
        let previous = self
            .marks
            .lock()
            .insert(instance.to_string(), current)
            .unwrap_or_default();

        let evicted = delta(current.evicted, previous.evicted);
        let errors = delta(current.errors, previous.errors);
        let ops = delta(current.operations, previous.operations);
        let error_rate = if ops == 0 {
            0.0
        } else {
            errors as f64 / ops as f64
        };

        let mut found = Vec::new();
        found.extend(self.record(MetricKind::EvictionRate, instance, evicted as f64));
        found.extend(self.record(MetricKind::ErrorRate, instance, error_rate));
        found
    }

    /// 轮询一次所有实例
    pub async fn collect_once(&self) -> Result<usize> {
        let registry = match &self.registry {
            Some(registry) => registry.clone(),
            None => return Ok(0),
        };

        let mut collected = 0;
        for (name, store) in registry.stores().await {
            match store.get_stats().await {
                Ok(stats) => {
                    self.record_stats(&name, &stats);
                    collected += 1;
                }
                Err(e) if e.is_store_closed() => {
                    debug!(instance = %name, "Store closed during collection, skipping");
                }
                Err(e) => {
                    warn!(instance = %name, error = %e, "Failed to collect stats");
                }
            }
        }
        Ok(collected)
    }

    /// 启动采集任务 (重复调用无效果)
    pub fn start(self: &Arc<Self>) {
        let mut collector = self.collector.lock();
        if collector.as_ref().map(|t| t.is_running()).unwrap_or(false) {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        *collector = Some(PeriodicTask::spawn(
            "analytics-collector",
            self.config.collection_interval,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(analytics) = weak.upgrade() else {
                        return TickControl::Stop;
                    };
                    if let Err(e) = analytics.collect_once().await {
                        warn!(error = %e, "Analytics collection failed");
                    }
                    TickControl::Continue
                }
            },
        ));
        info!(interval = ?self.config.collection_interval, "Analytics collector started");
    }

    /// 停止采集任务
    pub fn stop(&self) {
        if let Some(task) = self.collector.lock().take() {
            task.stop();
            info!("Analytics collector stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.collector
            .lock()
            .as_ref()
            .map(|t| t.is_running())
            .unwrap_or(false)
    }

    /// 序列样本 (从旧到新)
    pub fn series(&self, metric: MetricKind, instance: &str) -> Vec<MetricSample> {
        self.series
            .read()
            .get(&(metric, instance.to_string()))
            .map(|s| s.samples())
            .unwrap_or_default()
    }

    /// 描述性统计，无样本时返回 `None`
    pub fn statistics(&self, metric: MetricKind, instance: &str) -> Option<Statistics> {
        let values: Vec<f64> = self.series(metric, instance).iter().map(|s| s.value).collect();
        Statistics::from_values(&values)
    }

    pub fn anomalies(&self, filter: &AnomalyFilter) -> Vec<Anomaly> {
        self.anomalies
            .lock()
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect()
    }

    /// 对尾部窗口做趋势分析
    pub fn trend(&self, metric: MetricKind, instance: &str) -> TrendAnalysis {
        let values = self
            .series
            .read()
            .get(&(metric, instance.to_string()))
            .map(|s| s.tail_values(self.config.window))
            .unwrap_or_default();
        analyze(metric, instance, &values, &self.config.trend)
    }

    /// 各指标最新值
    pub fn latest(&self, instance: &str) -> LatestMetrics {
        let series = self.series.read();
        let mut latest = LatestMetrics::default();
        for metric in MetricKind::ALL {
            if let Some(sample) = series.get(&(metric, instance.to_string())).and_then(|s| s.latest()) {
                latest.set(metric, sample.value);
            }
        }
        latest
    }

    fn trends(&self, instance: &str) -> Vec<TrendAnalysis> {
        MetricKind::ALL
            .iter()
            .filter(|m| !self.series(**m, instance).is_empty())
            .map(|m| self.trend(*m, instance))
            .collect()
    }

    /// 调优建议
    pub fn recommendations(&self, instance: &str) -> Vec<Recommendation> {
        tune(&self.latest(instance), &self.trends(instance))
    }

    /// 实例摘要与健康评分
    pub fn summary(&self, instance: &str) -> AnalyticsSummary {
        let latest = self.latest(instance);
        let trends = self.trends(instance);
        let anomalies = self.anomalies(&AnomalyFilter::new().for_instance(instance));
        let recommendations = tune(&latest, &trends);
        let health_score = health_score(&latest, &trends, &anomalies);

        AnalyticsSummary {
            instance: instance.to_string(),
            health_score,
            latest,
            trends,
            anomaly_count: anomalies.len(),
            recommendations,
        }
    }

    /// 丢弃实例的所有序列和异常
    pub fn forget_instance(&self, instance: &str) {
        self.series.write().retain(|(_, name), _| name != instance);
        self.anomalies.lock().retain(|a| a.instance != instance);
        self.marks.lock().remove(instance);
    }

    /// 已跟踪的实例 (排序去重)
    pub fn instances(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.read().keys().map(|(_, n)| n.clone()).collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Drop for Analytics {
    fn drop(&mut self) {
        if let Some(task) = self.collector.get_mut().take() {
            task.stop();
        }
    }
}

/// 100 减去命中率、错误率、退化趋势和近期异常的扣分
fn health_score(latest: &LatestMetrics, trends: &[TrendAnalysis], anomalies: &[Anomaly]) -> u32 {
    let mut score: i64 = 100;

    match latest.hit_rate {
        Some(h) if h < 0.5 => score -= 30,
        Some(h) if h < 0.8 => score -= 15,
        _ => {}
    }
    if latest.utilization.map(|u| u > 0.95).unwrap_or(false) {
        score -= 20;
    }
    if latest.error_rate.map(|e| e > 0.01).unwrap_or(false) {
        score -= 20;
    }

    let degrading = trends
        .iter()
        .filter(|t| t.direction == TrendDirection::Degrading)
        .count() as i64;
    score -= (degrading * 5).min(20);

    let cutoff = Utc::now() - chrono::Duration::hours(1);
    let anomaly_penalty: i64 = anomalies
        .iter()
        .filter(|a| a.timestamp >= cutoff)
        .map(|a| match a.severity {
            AnomalySeverity::Low => 1,
            AnomalySeverity::Medium => 3,
            AnomalySeverity::High => 5,
            AnomalySeverity::Critical => 10,
        })
        .sum();
    score -= anomaly_penalty.min(30);

    score.clamp(0, 100) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventFilter;
    use crate::events::EventType;

    fn quiet_config() -> AnalyticsConfig {
        let mut config = AnalyticsConfig::default();
        config.thresholds.clear();
        config
    }

    #[test]
    fn test_flat_then_spike_flags_eleventh_point() {
        let analytics = Analytics::new(quiet_config());
        for _ in 0..10 {
            assert!(analytics.record(MetricKind::ResponseTimeMs, "api", 10.0).is_none());
        }
        let anomaly = analytics.record(MetricKind::ResponseTimeMs, "api", 100.0).unwrap();
        assert_eq!(anomaly.kind, AnomalyKind::Statistical);
        assert_eq!(analytics.anomalies(&AnomalyFilter::new()).len(), 1);
    }

    #[test]
    fn test_identical_values_never_flag() {
        let analytics = Analytics::new(quiet_config());
        for _ in 0..200 {
            assert!(analytics.record(MetricKind::HitRate, "user", 0.9).is_none());
        }
        assert!(analytics.anomalies(&AnomalyFilter::new()).is_empty());
        assert_eq!(analytics.series(MetricKind::HitRate, "user").len(), 200);
    }

    #[test]
    fn test_threshold_anomaly_publishes_event() {
        let bus = Arc::new(EventBus::new());
        let analytics = Analytics::new(AnalyticsConfig::default()).with_event_bus(bus.clone());

        let anomaly = analytics.record(MetricKind::HitRate, "user", 0.2).unwrap();
        assert_eq!(anomaly.kind, AnomalyKind::Threshold);

        let events = bus.history(
            &EventFilter::new().with_event_type(EventType::AnomalyDetected),
            None,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].instance(), Some("user"));
    }

    #[test]
    fn test_record_stats_uses_deltas() {
        let analytics = Analytics::new(quiet_config());
        let mut stats = StoreStats {
            instance: "api".into(),
            size: 0,
            max_size: 10,
            hits: 10,
            misses: 0,
            hit_rate: 1.0,
            memory_usage: 0,
            sets: 10,
            deletes: 0,
            clears: 0,
            expired: 0,
            evicted: 4,
            errors: 0,
            last_error: None,
        };
        analytics.record_stats("api", &stats);

        stats.evicted = 7;
        stats.errors = 2;
        stats.sets = 20;
        analytics.record_stats("api", &stats);

        let evictions = analytics.series(MetricKind::EvictionRate, "api");
        assert_eq!(evictions.iter().map(|s| s.value).collect::<Vec<_>>(), vec![4.0, 3.0]);
        let errors = analytics.series(MetricKind::ErrorRate, "api");
        assert!((errors[1].value - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_summary_and_forget() {
        let analytics = Analytics::new(quiet_config());
        for i in 0..10 {
            analytics.record(MetricKind::HitRate, "session", 0.9 - i as f64 * 0.05);
            analytics.record(MetricKind::Utilization, "session", 0.97);
        }

        let summary = analytics.summary("session");
        assert!(summary.health_score < 100);
        assert!(summary
            .trends
            .iter()
            .any(|t| t.metric == MetricKind::HitRate && t.direction == TrendDirection::Degrading));
        assert!(summary.recommendations.iter().any(|r| r.field == "max_size"));

        let stats = analytics.statistics(MetricKind::Utilization, "session").unwrap();
        assert_eq!(stats.count, 10);

        analytics.forget_instance("session");
        assert!(analytics.instances().is_empty());
        assert!(analytics.statistics(MetricKind::Utilization, "session").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collector_polls_registry() {
        use crate::cache::InstanceConfig;

        let registry = Arc::new(ConfigRegistry::new());
        let handle = registry
            .register_instance(InstanceConfig::new("api").with_max_size(2))
            .await
            .unwrap();
        for i in 0..5 {
            handle.set(&format!("k{}", i), vec![1], None).await.unwrap();
        }

        let analytics = Arc::new(
            Analytics::new(quiet_config().with_collection_interval(Duration::from_secs(1)))
                .with_registry(registry.clone()),
        );
        analytics.start();
        assert!(analytics.is_running());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let evictions = analytics.series(MetricKind::EvictionRate, "api");
        assert_eq!(evictions.first().map(|s| s.value), Some(3.0));

        analytics.stop();
        assert!(!analytics.is_running());
        registry.shutdown().await;
    }
}
