//! # Monitor
//!
//! 定时采集每个缓存实例的统计，评估阈值并生成性能报告。
//!
//! ## 每个 tick
//!
//! 1. `get_stats()` 与合成延迟探测
//! 2. 更新实例最新指标，喂给 Analytics，发布 `stats_updated`
//! 3. 评估 `low_hit_rate` / `high_memory_usage` / `slow_response_time`，
//!    越界产生告警并发布 `threshold_breached`
//!
//! 报告任务周期更长，为每个实例生成 A-F 评级并发布 `report_generated`。

pub mod alert;
pub mod report;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analytics::{Analytics, MetricKind};
use crate::cache::CacheStore;
use crate::config::ConfigRegistry;
use crate::error::Result;
use crate::event_bus::EventBus;
use crate::events::{EventPayload, EventSeverity};
use crate::scheduler::{PeriodicTask, TickControl};

pub use alert::{Alert, AlertLog, AlertMetric, AlertSeverity};
pub use report::{build_report, grade_for, PerformanceReport};

const EVENT_SOURCE: &str = "monitor";

/// 告警阈值
///
/// 越过第一条线为 `high`，同时越过第二条 (更大的) 线为 `critical`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorThresholds {
    pub low_hit_rate: f64,
    pub critical_hit_rate: f64,
    /// 利用率 (size / max_size)
    pub high_memory_usage: f64,
    pub critical_memory_usage: f64,
    pub slow_response_time_ms: f64,
    pub critical_response_time_ms: f64,
    /// 读请求少于此数时不检查命中率
    pub min_requests_for_hit_rate: u64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            low_hit_rate: 0.8,
            critical_hit_rate: 0.5,
            high_memory_usage: 0.85,
            critical_memory_usage: 0.95,
            slow_response_time_ms: 100.0,
            critical_response_time_ms: 500.0,
            min_requests_for_hit_rate: 10,
        }
    }
}

/// 监控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_interval: Duration,
    pub report_interval: Duration,
    pub thresholds: MonitorThresholds,
    pub max_alerts: usize,
    pub alert_retention: Duration,
    /// 每个实例保留的报告数量
    pub max_reports: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            report_interval: Duration::from_secs(300),
            thresholds: MonitorThresholds::default(),
            max_alerts: 1000,
            alert_retention: Duration::from_secs(24 * 3600),
            max_reports: 100,
        }
    }
}

impl MonitorConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn with_thresholds(mut self, thresholds: MonitorThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

/// 实例在某个 tick 的指标快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetrics {
    pub instance: String,
    pub timestamp: DateTime<Utc>,
    pub hit_rate: f64,
    pub utilization: f64,
    pub response_time_ms: f64,
    pub memory_usage: usize,
    pub size: usize,
    pub max_size: usize,
    pub total_reads: u64,
}

/// 缓存监控器
pub struct Monitor {
    config: MonitorConfig,
    registry: Arc<ConfigRegistry>,
    analytics: Option<Arc<Analytics>>,
    bus: Option<Arc<EventBus>>,
    alerts: Mutex<AlertLog>,
    latest: RwLock<HashMap<String, InstanceMetrics>>,
    reports: Mutex<HashMap<String, VecDeque<PerformanceReport>>>,
    tick: AtomicU64,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl Monitor {
    pub fn new(registry: Arc<ConfigRegistry>, config: MonitorConfig) -> Self {
        let alerts = AlertLog::new(config.max_alerts, config.alert_retention);
        Self {
            config,
            registry,
            analytics: None,
            bus: None,
            alerts: Mutex::new(alerts),
            latest: RwLock::new(HashMap::new()),
            reports: Mutex::new(HashMap::new()),
            tick: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_analytics(mut self, analytics: Arc<Analytics>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// 已执行的 tick 数
    pub fn ticks(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    async fn sample(&self, name: &str, store: &CacheStore) -> Result<InstanceMetrics> {
        let stats = store.get_stats().await?;
        let latency = store.probe().await?;

        Ok(InstanceMetrics {
            instance: name.to_string(),
            timestamp: Utc::now(),
            hit_rate: stats.hit_rate,
            utilization: stats.utilization(),
            response_time_ms: latency.as_secs_f64() * 1000.0,
            memory_usage: stats.memory_usage,
            size: stats.size,
            max_size: stats.max_size,
            total_reads: stats.total_reads(),
        })
    }

    /// 执行一次采集
    ///
    /// # 返回
    /// - 本次产生的告警
    pub async fn tick_once(&self) -> Vec<Alert> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        let mut raised = Vec::new();

        for (name, store) in self.registry.stores().await {
            let metrics = match self.sample(&name, &store).await {
                Ok(metrics) => metrics,
                Err(e) if e.is_store_closed() => {
                    debug!(instance = %name, tick = tick, "Store closed mid-tick, no data");
                    continue;
                }
                Err(e) => {
                    warn!(instance = %name, error = %e, "Failed to sample cache stats");
                    continue;
                }
            };

            self.feed_analytics(&metrics);
            self.latest.write().insert(name.clone(), metrics.clone());

            if let Some(bus) = &self.bus {
                bus.emit(
                    EVENT_SOURCE,
                    EventSeverity::Info,
                    format!("stats updated for {}", name),
                    EventPayload::StatsUpdated {
                        instance: name.clone(),
                        hit_rate: metrics.hit_rate,
                        utilization: metrics.utilization,
                        response_time_ms: metrics.response_time_ms,
                        memory_usage: metrics.memory_usage,
                        size: metrics.size,
                        max_size: metrics.max_size,
                    },
                );
            }

            let alerts = self.evaluate(&metrics, tick);
            for alert in alerts {
                self.raise(&alert);
                raised.push(alert);
            }
        }

        debug!(tick = tick, alerts = raised.len(), "Monitor tick finished");
        raised
    }

    fn feed_analytics(&self, metrics: &InstanceMetrics) {
        let Some(analytics) = &self.analytics else {
            return;
        };
        let name = &metrics.instance;
        if metrics.total_reads >= self.config.thresholds.min_requests_for_hit_rate {
            analytics.record(MetricKind::HitRate, name, metrics.hit_rate);
        }
        analytics.record(MetricKind::Utilization, name, metrics.utilization);
        analytics.record(MetricKind::ResponseTimeMs, name, metrics.response_time_ms);
        analytics.record(MetricKind::MemoryUsageBytes, name, metrics.memory_usage as f64);
    }

    /// 评估阈值
    fn evaluate(&self, metrics: &InstanceMetrics, tick: u64) -> Vec<Alert> {
        let t = &self.config.thresholds;
        let name = &metrics.instance;
        let mut alerts = Vec::new();

        if metrics.total_reads >= t.min_requests_for_hit_rate && metrics.hit_rate < t.low_hit_rate {
            let severity = if metrics.hit_rate < t.critical_hit_rate {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            alerts.push(Alert::new(
                name,
                AlertMetric::LowHitRate,
                severity,
                metrics.hit_rate,
                t.low_hit_rate,
                tick,
            ));
        }

        if metrics.utilization > t.high_memory_usage {
            let severity = if metrics.utilization > t.critical_memory_usage {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            alerts.push(Alert::new(
                name,
                AlertMetric::HighMemoryUsage,
                severity,
                metrics.utilization,
                t.high_memory_usage,
                tick,
            ));
        }

        if metrics.response_time_ms > t.slow_response_time_ms {
            let severity = if metrics.response_time_ms > t.critical_response_time_ms {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            alerts.push(Alert::new(
                name,
                AlertMetric::SlowResponseTime,
                severity,
                metrics.response_time_ms,
                t.slow_response_time_ms,
                tick,
            ));
        }

        alerts
    }

    fn raise(&self, alert: &Alert) {
        warn!(
            alert_id = %alert.id,
            instance = %alert.instance,
            severity = %alert.severity,
            "{}",
            alert.message
        );
        self.alerts.lock().push(alert.clone());

        if let Some(bus) = &self.bus {
            bus.emit(
                EVENT_SOURCE,
                alert.severity.event_severity(),
                alert.message.clone(),
                EventPayload::ThresholdBreached {
                    alert_id: alert.id.clone(),
                    instance: alert.instance.clone(),
                    metric: alert.metric.as_str().to_string(),
                    observed: alert.observed,
                    threshold: alert.threshold,
                },
            );
        }
    }

    /// 为每个有最新指标的实例生成报告
    pub fn generate_reports(&self) -> Vec<PerformanceReport> {
        let snapshots: Vec<InstanceMetrics> = {
            let mut items: Vec<InstanceMetrics> = self.latest.read().values().cloned().collect();
            items.sort_by(|a, b| a.instance.cmp(&b.instance));
            items
        };

        let mut generated = Vec::with_capacity(snapshots.len());
        for metrics in &snapshots {
            let report = build_report(metrics, &self.config.thresholds);
            {
                let mut reports = self.reports.lock();
                let history = reports.entry(report.instance.clone()).or_default();
                history.push_back(report.clone());
                while history.len() > self.config.max_reports.max(1) {
                    history.pop_front();
                }
            }

            if let Some(bus) = &self.bus {
                let severity = if report.grade == 'A' || report.grade == 'B' {
                    EventSeverity::Info
                } else {
                    EventSeverity::Warning
                };
                bus.emit(
                    EVENT_SOURCE,
                    severity,
                    format!("report for {}: grade {} ({})", report.instance, report.grade, report.score),
                    EventPayload::ReportGenerated {
                        instance: report.instance.clone(),
                        score: report.score,
                        grade: report.grade,
                        issues: report.issues.clone(),
                    },
                );
            }
            generated.push(report);
        }
        generated
    }

    /// 启动采集与报告任务 (重复调用无效果)
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if tasks.iter().any(|t| t.is_running()) {
            return;
        }
        tasks.clear();

        let weak: Weak<Self> = Arc::downgrade(self);
        tasks.push(PeriodicTask::spawn(
            "monitor-tick",
            self.config.tick_interval,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(monitor) = weak.upgrade() else {
                        return TickControl::Stop;
                    };
                    monitor.tick_once().await;
                    TickControl::Continue
                }
            },
        ));

        let weak: Weak<Self> = Arc::downgrade(self);
        tasks.push(PeriodicTask::spawn(
            "monitor-report",
            self.config.report_interval,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(monitor) = weak.upgrade() else {
                        return TickControl::Stop;
                    };
                    monitor.generate_reports();
                    TickControl::Continue
                }
            },
        ));

        info!(
            tick_interval = ?self.config.tick_interval,
            report_interval = ?self.config.report_interval,
            "Monitor started"
        );
    }

    /// 停止所有任务
    pub fn stop(&self) {
        let tasks: Vec<PeriodicTask> = self.tasks.lock().drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in &tasks {
            task.stop();
        }
        info!("Monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().iter().any(|t| t.is_running())
    }

    pub fn acknowledge(&self, alert_id: &str) -> bool {
        self.alerts.lock().acknowledge(alert_id)
    }

    /// 未确认的告警
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().active()
    }

    pub fn alerts_for(&self, instance: &str) -> Vec<Alert> {
        self.alerts.lock().for_instance(instance)
    }

    pub fn all_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().all()
    }

    pub fn clear_acknowledged(&self) -> usize {
        self.alerts.lock().clear_acknowledged()
    }

    pub fn latest_metrics(&self, instance: &str) -> Option<InstanceMetrics> {
        self.latest.read().get(instance).cloned()
    }

    /// 所有实例的最新指标 (按名称排序)
    pub fn all_latest_metrics(&self) -> Vec<InstanceMetrics> {
        let mut items: Vec<InstanceMetrics> = self.latest.read().values().cloned().collect();
        items.sort_by(|a, b| a.instance.cmp(&b.instance));
        items
    }

    /// 实例的报告历史 (从旧到新)
    pub fn reports(&self, instance: &str) -> Vec<PerformanceReport> {
        self.reports
            .lock()
            .get(instance)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 最新报告
    pub fn latest_report(&self, instance: &str) -> Option<PerformanceReport> {
        self.reports.lock().get(instance).and_then(|h| h.back().cloned())
    }

    /// 丢弃已移除实例的数据
    pub fn forget_instance(&self, instance: &str) {
        self.latest.write().remove(instance);
        self.reports.lock().remove(instance);
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::AnalyticsConfig;
    use crate::cache::InstanceConfig;
    use crate::event_bus::EventFilter;
    use crate::events::EventType;

    async fn setup() -> (Arc<ConfigRegistry>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ConfigRegistry::new().with_event_bus(bus.clone()));
        registry
            .register_instance(InstanceConfig::new("user").with_max_size(10))
            .await
            .unwrap();
        (registry, bus)
    }

    #[tokio::test]
    async fn test_low_hit_rate_alert_and_escalation() {
        let (registry, bus) = setup().await;
        let handle = registry.handle("user").unwrap();
        handle.set("a", vec![1], None).await.unwrap();
        // 1 hit, 11 misses
        handle.get("a").await.unwrap();
        for i in 0..11 {
            handle.get(&format!("missing{}", i)).await.unwrap();
        }

        let monitor = Monitor::new(registry.clone(), MonitorConfig::default()).with_event_bus(bus.clone());
        let alerts = monitor.tick_once().await;

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, AlertMetric::LowHitRate);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].id, "low_hit_rate:user:1");

        let breached = bus.history(
            &EventFilter::new().with_event_type(EventType::ThresholdBreached),
            None,
        );
        assert_eq!(breached.len(), 1);
        let updated = bus.history(&EventFilter::new().with_event_type(EventType::StatsUpdated), None);
        assert_eq!(updated.len(), 1);

        // 下一个 tick 是不同的告警
        let again = monitor.tick_once().await;
        assert_eq!(again[0].id, "low_hit_rate:user:2");
        assert_eq!(monitor.active_alerts().len(), 2);
    }

    #[tokio::test]
    async fn test_idle_store_does_not_alarm() {
        let (registry, _bus) = setup().await;
        let monitor = Monitor::new(registry.clone(), MonitorConfig::default());
        assert!(monitor.tick_once().await.is_empty());

        let metrics = monitor.latest_metrics("user").unwrap();
        assert_eq!(metrics.total_reads, 0);
        assert_eq!(metrics.size, 0);
    }

    #[tokio::test]
    async fn test_utilization_alert_and_report() {
        let (registry, bus) = setup().await;
        let handle = registry.handle("user").unwrap();
        for i in 0..9 {
            handle.set(&format!("k{}", i), vec![0], None).await.unwrap();
        }

        let monitor = Monitor::new(registry.clone(), MonitorConfig::default()).with_event_bus(bus.clone());
        let alerts = monitor.tick_once().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, AlertMetric::HighMemoryUsage);
        assert_eq!(alerts[0].severity, AlertSeverity::High);

        let reports = monitor.generate_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].score, 80);
        assert_eq!(reports[0].grade, 'B');
        assert_eq!(monitor.latest_report("user").unwrap().score, 80);

        let generated = bus.history(
            &EventFilter::new().with_event_type(EventType::ReportGenerated),
            None,
        );
        assert_eq!(generated.len(), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_and_clear() {
        let (registry, _bus) = setup().await;
        let handle = registry.handle("user").unwrap();
        for i in 0..10 {
            handle.set(&format!("k{}", i), vec![0], None).await.unwrap();
        }
        let monitor = Monitor::new(registry.clone(), MonitorConfig::default());
        let alerts = monitor.tick_once().await;

        assert!(monitor.acknowledge(&alerts[0].id));
        assert!(monitor.active_alerts().is_empty());
        assert_eq!(monitor.alerts_for("user").len(), 1);
        assert_eq!(monitor.clear_acknowledged(), 1);
        assert!(monitor.all_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_is_skipped() {
        let (registry, _bus) = setup().await;
        let store = registry.store("user").await.unwrap();
        store.close().await;

        let monitor = Monitor::new(registry.clone(), MonitorConfig::default());
        assert!(monitor.tick_once().await.is_empty());
        assert!(monitor.latest_metrics("user").is_none());
    }

    #[tokio::test]
    async fn test_feeds_analytics() {
        let (registry, _bus) = setup().await;
        let mut config = AnalyticsConfig::default();
        config.thresholds.clear();
        let analytics = Arc::new(Analytics::new(config));
        let monitor = Monitor::new(registry.clone(), MonitorConfig::default()).with_analytics(analytics.clone());

        monitor.tick_once().await;
        monitor.tick_once().await;

        assert_eq!(analytics.series(MetricKind::Utilization, "user").len(), 2);
        assert_eq!(analytics.series(MetricKind::ResponseTimeMs, "user").len(), 2);
        // 读请求不足，不记录命中率
        assert!(analytics.series(MetricKind::HitRate, "user").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let (registry, _bus) = setup().await;
        let monitor = Arc::new(Monitor::new(
            registry.clone(),
            MonitorConfig::default()
                .with_tick_interval(Duration::from_secs(1))
                .with_report_interval(Duration::from_secs(5)),
        ));
        monitor.start();
        assert!(monitor.is_running());

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert!(monitor.ticks() >= 5);
        assert_eq!(monitor.reports("user").len(), 1);

        monitor.stop();
        assert!(!monitor.is_running());
    }
}
