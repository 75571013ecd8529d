//! # 批量预热与事件 sink 集成测试

use async_trait::async_trait;
use cachekeeper_core::batch::{
    AdaptiveSettings, BatchRunner, BatchTarget, PrewarmItem, PrewarmOptions, PrewarmStrategy,
    TaskStatus,
};
use cachekeeper_core::cache::{BatchCacheOps, CacheOps, CacheStore, InstanceConfig};
use cachekeeper_core::config::ConfigRegistry;
use cachekeeper_core::error::{CacheError, Result};
use cachekeeper_core::event_bus::{CustomSink, EventBus, EventFilter, EventSink, FileSink};
use cachekeeper_core::events::{CacheEvent, EventPayload, EventSeverity};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

// ==================== 预热 ====================

async fn runner_with(instance: InstanceConfig) -> (BatchRunner, Arc<ConfigRegistry>) {
    let registry = Arc::new(ConfigRegistry::new());
    registry.register_instance(instance).await.unwrap();
    (BatchRunner::new(registry.clone()), registry)
}

#[tokio::test]
async fn test_priority_prewarm_writes_highest_first() {
    let (runner, registry) = runner_with(InstanceConfig::new("catalog").with_max_size(100)).await;
    let items = vec![
        PrewarmItem::new("low", vec![1]).with_priority(1),
        PrewarmItem::new("high", vec![2]).with_priority(9),
        PrewarmItem::new("mid", vec![3]).with_priority(5),
        PrewarmItem::new("high-2", vec![4]).with_priority(9),
    ];

    let result = runner
        .prewarm(
            "catalog",
            items,
            PrewarmStrategy::Priority,
            PrewarmOptions::default().with_batch_size(2),
        )
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.batches, 2);
    let keys = registry.handle("catalog").unwrap().keys().await.unwrap();
    assert_eq!(keys, vec!["high", "high-2", "mid", "low"]);
}

/// 每次写入耗时固定的目标
struct SlowStore {
    store: CacheStore,
    delay: Duration,
}

#[async_trait]
impl CacheOps for SlowStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.store.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(key).await
    }
}

#[async_trait]
impl BatchCacheOps for SlowStore {
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.store.mget(keys).await
    }

    async fn mset(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        tokio::time::sleep(self.delay * items.len() as u32).await;
        self.store.mset(items, ttl).await
    }

    async fn mdel(&self, keys: &[String]) -> Result<usize> {
        self.store.mdel(keys).await
    }
}

impl BatchTarget for SlowStore {
    fn target_name(&self) -> &str {
        "slow"
    }
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_prewarm_shrinks_for_slow_target() {
    let (runner, _registry) = runner_with(InstanceConfig::user()).await;
    let target = Arc::new(SlowStore {
        store: CacheStore::new(InstanceConfig::new("slow").with_max_size(10_000)),
        delay: Duration::from_millis(5),
    });
    let items = (0..2000)
        .map(|i| PrewarmItem::new(format!("k{}", i), vec![0]))
        .collect();

    let result = runner
        .prewarm_into(
            "slow",
            target.clone(),
            items,
            PrewarmStrategy::Adaptive(AdaptiveSettings::default()),
            PrewarmOptions::default().with_batch_size(200).with_concurrency(2),
        )
        .await;

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.completed, 2000);
    assert!(result.final_batch_size < 200);
    assert!(!result.adjustments.is_empty());
    assert!(result
        .adjustments
        .windows(2)
        .all(|w| w[1].batch_size <= w[0].batch_size));
    assert_eq!(target.store.len().await, 2000);
}

#[tokio::test]
async fn test_unknown_instance_is_rejected() {
    let (runner, _registry) = runner_with(InstanceConfig::user()).await;
    let err = runner
        .submit_prewarm("nope", vec![], PrewarmStrategy::Immediate, PrewarmOptions::default())
        .unwrap_err();
    assert!(matches!(err, CacheError::InstanceNotFound(_)));
}

/// 批量原语永不返回；逐条写入时 `stuck` 开头的键永不返回
struct StuckStore {
    store: CacheStore,
    bulk_fails: bool,
}

#[async_trait]
impl CacheOps for StuckStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        if key.starts_with("stuck") {
            std::future::pending::<()>().await;
        }
        self.store.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(key).await
    }
}

#[async_trait]
impl BatchCacheOps for StuckStore {
    async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        std::future::pending().await
    }

    async fn mset(&self, _items: Vec<(String, Vec<u8>)>, _ttl: Option<Duration>) -> Result<()> {
        if self.bulk_fails {
            return Err(CacheError::batch("mset unavailable"));
        }
        std::future::pending().await
    }

    async fn mdel(&self, _keys: &[String]) -> Result<usize> {
        std::future::pending().await
    }
}

impl BatchTarget for StuckStore {
    fn target_name(&self) -> &str {
        "stuck"
    }
}

fn stuck_store(bulk_fails: bool) -> StuckStore {
    StuckStore {
        store: CacheStore::new(InstanceConfig::new("stuck").with_max_size(100)),
        bulk_fails,
    }
}

#[tokio::test(start_paused = true)]
async fn test_bulk_ops_time_out_per_chunk() {
    let (runner, _registry) = runner_with(InstanceConfig::user()).await;
    let target = stuck_store(false);
    let options = PrewarmOptions::default()
        .with_batch_size(2)
        .with_batch_timeout(Duration::from_secs(2));
    let keys: Vec<String> = vec!["a".into(), "b".into(), "c".into()];

    let started = tokio::time::Instant::now();
    let got = runner.batch_get_with("stuck", &target, keys.clone(), &options).await;
    assert_eq!(got.values, vec![None, None, None]);
    assert_eq!(got.report.failed, 3);
    assert!(got.report.errors.iter().all(|e| e.error.contains("timed out")));
    // 两个批次各自超时
    assert!(started.elapsed() >= Duration::from_secs(4));

    let deleted = runner.batch_delete_with("stuck", &target, keys, &options).await;
    assert_eq!(deleted.failed, 3);
    assert_eq!(deleted.succeeded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_set_timeout_keeps_finished_items() {
    let (runner, _registry) = runner_with(InstanceConfig::user()).await;
    let target = stuck_store(true);
    let options = PrewarmOptions::default()
        .with_batch_size(3)
        .with_batch_timeout(Duration::from_secs(1));

    let report = runner
        .batch_set_with(
            "stuck",
            &target,
            vec![
                ("a".into(), vec![1]),
                ("stuck-1".into(), vec![2]),
                ("c".into(), vec![3]),
            ],
            None,
            &options,
        )
        .await;

    assert_eq!(report.fallbacks, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);
    let failed: Vec<&str> = report.errors.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(failed, vec!["stuck-1", "c"]);
    assert_eq!(target.store.get("a").await.unwrap(), Some(vec![1]));
}

#[tokio::test]
async fn test_bulk_ops_accept_per_call_options() {
    let (runner, registry) = runner_with(InstanceConfig::new("catalog").with_max_size(100)).await;
    let items: Vec<(String, Vec<u8>)> = (0..5).map(|i| (format!("k{}", i), vec![i])).collect();

    let options = PrewarmOptions::default().with_batch_size(2);
    let report = runner
        .batch_set("catalog", items, None, Some(&options))
        .await
        .unwrap();

    assert_eq!(report.succeeded, 5);
    assert_eq!(registry.handle("catalog").unwrap().keys().await.unwrap().len(), 5);
}

// ==================== 跨线程发布 ====================

#[test]
fn test_concurrent_publishers_dispatch_synchronously() {
    let bus = Arc::new(EventBus::new());
    let counts: Arc<Mutex<std::collections::HashMap<String, usize>>> = Arc::default();

    let c = counts.clone();
    bus.subscribe("counter", EventFilter::new(), move |event| {
        // 放慢分发，让各线程的分发互相重叠
        std::thread::sleep(Duration::from_millis(1));
        *c.lock().entry(event.source.clone()).or_insert(0) += 1;
        Ok(())
    });

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let bus = bus.clone();
            let counts = counts.clone();
            std::thread::spawn(move || {
                let source = format!("worker-{}", t);
                for i in 0..25 {
                    bus.emit(
                        &source,
                        EventSeverity::Info,
                        "tick",
                        EventPayload::custom("tick", serde_json::Value::Null),
                    );
                    // 返回时本线程的事件已经被监听器处理
                    assert_eq!(counts.lock().get(&source).copied(), Some(i + 1));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(bus.stats().total_published, 100);
    assert_eq!(bus.history(&EventFilter::new(), None).len(), 100);
}

// ==================== sink ====================

fn event(severity: EventSeverity) -> CacheEvent {
    CacheEvent::new(
        "test",
        severity,
        format!("{} event", severity),
        EventPayload::custom("sample", serde_json::json!({ "severity": severity })),
    )
}

#[tokio::test]
async fn test_sink_filter_drops_low_severity() {
    let bus = EventBus::new();
    let seen: Arc<Mutex<Vec<EventSeverity>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    bus.add_sink(
        "alerts",
        Arc::new(CustomSink::new("alerts", move |event| {
            seen_clone.lock().push(event.severity);
            Ok(())
        })),
        EventFilter::new().with_min_severity(EventSeverity::Warning),
    );

    for severity in [
        EventSeverity::Info,
        EventSeverity::Warning,
        EventSeverity::Info,
        EventSeverity::Critical,
    ] {
        bus.deliver_to_sinks(&event(severity)).await;
    }

    assert_eq!(
        *seen.lock(),
        vec![EventSeverity::Warning, EventSeverity::Critical]
    );
}

#[tokio::test]
async fn test_failing_sink_does_not_block_others() {
    let bus = EventBus::new();
    let delivered = Arc::new(Mutex::new(0usize));
    let delivered_clone = delivered.clone();

    bus.add_sink(
        "broken",
        Arc::new(CustomSink::new("broken", |_| Err(CacheError::sink("down")))),
        EventFilter::new(),
    );
    bus.add_sink(
        "counter",
        Arc::new(CustomSink::new("counter", move |_| {
            *delivered_clone.lock() += 1;
            Ok(())
        })),
        EventFilter::new(),
    );

    let outcomes = bus.deliver_to_sinks(&event(EventSeverity::Error)).await;

    assert_eq!(outcomes.len(), 2);
    assert!(!outcomes[0].delivered);
    assert!(outcomes[1].delivered);
    assert_eq!(*delivered.lock(), 1);
    assert_eq!(bus.stats().sink_failures, 1);
}

#[tokio::test]
async fn test_file_sink_appends_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let sink = FileSink::new(&path);

    sink.deliver(&event(EventSeverity::Info)).await.unwrap();
    sink.deliver(&event(EventSeverity::Critical)).await.unwrap();

    let text = tokio::fs::read_to_string(&path).await.unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let parsed: CacheEvent = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(parsed.severity, EventSeverity::Critical);
}
