//! # 监控与分析集成测试

use cachekeeper_core::analytics::{Analytics, AnalyticsConfig, AnomalyFilter, AnomalyKind, MetricKind};
use cachekeeper_core::cache::InstanceConfig;
use cachekeeper_core::config::ConfigRegistry;
use cachekeeper_core::event_bus::{EventBus, EventFilter};
use cachekeeper_core::events::{EventPayload, EventType};
use cachekeeper_core::monitor::{AlertMetric, AlertSeverity, Monitor, MonitorConfig};
use std::sync::Arc;

// ==================== 异常检测 ====================

#[test]
fn test_spike_after_flat_window_is_flagged() {
    let analytics = Analytics::new(AnalyticsConfig::default());

    for _ in 0..10 {
        assert!(analytics.record(MetricKind::ResponseTimeMs, "api", 10.0).is_none());
    }
    let anomaly = analytics
        .record(MetricKind::ResponseTimeMs, "api", 100.0)
        .expect("spike should be flagged");

    assert_eq!(anomaly.kind, AnomalyKind::Statistical);
    assert!((anomaly.expected - 10.0).abs() < 1e-9);
    assert!((anomaly.deviation - 90.0).abs() < 1e-9);
    assert_eq!(
        analytics
            .anomalies(&AnomalyFilter::new().for_instance("api"))
            .len(),
        1
    );
}

#[test]
fn test_steady_series_raises_nothing() {
    let analytics = Analytics::new(AnalyticsConfig::default());
    for _ in 0..40 {
        assert!(analytics.record(MetricKind::ResponseTimeMs, "api", 12.0).is_none());
    }
    assert!(analytics.anomalies(&AnomalyFilter::new()).is_empty());
}

// ==================== 监控 ====================

async fn cold_cache() -> (Arc<ConfigRegistry>, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(ConfigRegistry::new().with_event_bus(bus.clone()));
    let handle = registry.register_instance(InstanceConfig::user()).await.unwrap();
    for i in 0..20 {
        handle.get(&format!("user:{}", i)).await.unwrap();
    }
    (registry, bus)
}

#[tokio::test]
async fn test_cold_cache_raises_hit_rate_alert() {
    let (registry, bus) = cold_cache().await;
    let analytics = Arc::new(Analytics::new(AnalyticsConfig::default()));
    let monitor = Monitor::new(registry, MonitorConfig::default())
        .with_analytics(analytics.clone())
        .with_event_bus(bus.clone());

    let alerts = monitor.tick_once().await;
    let low_hit = alerts
        .iter()
        .find(|a| a.metric == AlertMetric::LowHitRate)
        .expect("hit rate alert");
    assert_eq!(low_hit.instance, "user");
    assert_eq!(low_hit.severity, AlertSeverity::Critical);

    let breached = bus.history(
        &EventFilter::new().with_event_type(EventType::ThresholdBreached),
        None,
    );
    assert_eq!(breached.len(), alerts.len());
    assert!(matches!(
        &breached[0].payload,
        EventPayload::ThresholdBreached { instance, .. } if instance == "user"
    ));

    assert_eq!(analytics.series(MetricKind::HitRate, "user").len(), 1);
    assert_eq!(monitor.active_alerts().len(), alerts.len());
}

#[tokio::test]
async fn test_report_grades_cold_cache() {
    let (registry, bus) = cold_cache().await;
    let monitor = Monitor::new(registry, MonitorConfig::default()).with_event_bus(bus.clone());

    monitor.tick_once().await;
    let reports = monitor.generate_reports();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].score, 70);
    assert_eq!(reports[0].grade, 'C');
    assert!(!reports[0].issues.is_empty());
    assert_eq!(
        bus.history(&EventFilter::new().with_event_type(EventType::ReportGenerated), None)
            .len(),
        1
    );
}

#[tokio::test]
async fn test_quiet_cache_has_no_alerts() {
    let registry = Arc::new(ConfigRegistry::new());
    registry.register_instance(InstanceConfig::api()).await.unwrap();
    let monitor = Monitor::new(registry, MonitorConfig::default());

    assert!(monitor.tick_once().await.is_empty());
    let metrics = monitor.latest_metrics("api").unwrap();
    assert_eq!(metrics.size, 0);
    assert_eq!(metrics.max_size, 2000);
}
