//! # 事件总线实现
//!
//! 同步分发的事件总线。
//!
//! ## 设计特点
//!
//! - **注册顺序**: 监听器按注册顺序调用
//! - **重入安全**: 回调内发布的事件进入当前线程的队列，由外层分发循环按发布顺序处理
//! - **线程独立**: 不同线程的发布各自在本线程同步分发，互不等待
//! - **锁不跨回调**: 分发前复制监听器列表，回调期间不持有任何锁
//! - **sink 异步投递**: 在当前 tokio runtime 上 spawn，各 sink 独立成败

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::sink::{EventSink, SinkOutcome};
use super::{EventFilter, EventStats, Subscription};
use crate::error::Result;
use crate::events::{CacheEvent, EventPayload, EventSeverity};

/// 默认历史记录容量
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// 总线实例编号，用于区分线程本地的分发队列
static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// 本线程正在分发的总线及其重入队列
    static DISPATCH_QUEUES: RefCell<HashMap<u64, VecDeque<CacheEvent>>> = RefCell::new(HashMap::new());
}

/// 分发结束 (包括 unwind) 时移除本线程的队列
struct DispatchGuard {
    bus_id: u64,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        let _ = DISPATCH_QUEUES.try_with(|queues| queues.borrow_mut().remove(&self.bus_id));
    }
}

/// 监听器回调类型
pub type ListenerFn = Arc<dyn Fn(&CacheEvent) -> Result<()> + Send + Sync>;

struct Listener {
    id: String,
    filter: EventFilter,
    callback: ListenerFn,
    once: bool,
    fired: AtomicBool,
}

struct SinkRegistration {
    id: String,
    filter: EventFilter,
    sink: Arc<dyn EventSink>,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    listener_deliveries: AtomicU64,
    listener_errors: AtomicU64,
    sink_deliveries: AtomicU64,
    sink_failures: AtomicU64,
}

/// 事件总线
pub struct EventBus {
    listeners: RwLock<Vec<Arc<Listener>>>,
    sinks: RwLock<Vec<Arc<SinkRegistration>>>,
    history: Mutex<VecDeque<CacheEvent>>,
    max_history_size: usize,
    id: u64,
    counters: Arc<Counters>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().len())
            .field("sinks", &self.sinks.read().len())
            .field("max_history_size", &self.max_history_size)
            .finish()
    }
}

impl EventBus {
    /// 创建新的事件总线实例
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_SIZE)
    }

    /// 创建带自定义历史容量的事件总线
    ///
    /// # 参数
    /// - `max_history_size`: 历史记录最大数量
    pub fn with_capacity(max_history_size: usize) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(max_history_size.min(4096))),
            max_history_size,
            id: NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed),
            counters: Arc::new(Counters::default()),
        }
    }

    /// 注册监听器
    ///
    /// 相同 ID 的监听器会被替换。
    ///
    /// # 参数
    /// - `id`: 监听器 ID
    /// - `filter`: 过滤条件
    /// - `callback`: 回调，返回错误只会被记录
    pub fn subscribe<F>(&self, id: impl Into<String>, filter: EventFilter, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.register(id.into(), filter, Arc::new(callback), false)
    }

    /// 注册一次性监听器，第一次匹配后自动移除
    pub fn subscribe_once<F>(
        &self,
        id: impl Into<String>,
        filter: EventFilter,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&CacheEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.register(id.into(), filter, Arc::new(callback), true)
    }

    fn register(&self, id: String, filter: EventFilter, callback: ListenerFn, once: bool) -> Subscription {
        let listener = Arc::new(Listener {
            id: id.clone(),
            filter,
            callback,
            once,
            fired: AtomicBool::new(false),
        });

        let mut listeners = self.listeners.write();
        if let Some(pos) = listeners.iter().position(|l| l.id == id) {
            debug!(listener_id = %id, "Replacing existing listener");
            listeners[pos] = listener;
        } else {
            listeners.push(listener);
        }
        Subscription::new(id)
    }

    /// 取消订阅
    ///
    /// # 返回
    /// - `bool`: 是否存在并移除了该监听器
    pub fn unsubscribe(&self, id: &str) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        before != listeners.len()
    }

    /// 注册 sink
    ///
    /// 相同 ID 的 sink 会被替换。
    pub fn add_sink(&self, id: impl Into<String>, sink: Arc<dyn EventSink>, filter: EventFilter) {
        let id = id.into();
        let registration = Arc::new(SinkRegistration {
            id: id.clone(),
            filter,
            sink,
        });

        let mut sinks = self.sinks.write();
        if let Some(pos) = sinks.iter().position(|s| s.id == id) {
            sinks[pos] = registration;
        } else {
            sinks.push(registration);
        }
    }

    /// 移除 sink
    pub fn remove_sink(&self, id: &str) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|s| s.id != id);
        before != sinks.len()
    }

    /// 构造并发布事件
    pub fn emit(
        &self,
        source: &str,
        severity: EventSeverity,
        message: impl Into<String>,
        payload: EventPayload,
    ) {
        self.publish(CacheEvent::new(source, severity, message, payload));
    }

    /// 发布事件
    ///
    /// 在调用线程上同步分发给监听器，返回时事件已进入历史并已通知所有匹配的监听器。
    /// 如果本线程已在分发该总线的事件 (监听器内再次发布)，事件进入本线程队列，
    /// 由外层循环在当前事件分发完后按顺序处理。其他线程的发布不受影响。
    pub fn publish(&self, event: CacheEvent) {
        let first = DISPATCH_QUEUES.with(|queues| {
            let mut queues = queues.borrow_mut();
            match queues.get_mut(&self.id) {
                Some(queue) => {
                    queue.push_back(event);
                    None
                }
                None => {
                    queues.insert(self.id, VecDeque::new());
                    Some(event)
                }
            }
        });

        let Some(mut event) = first else {
            trace!("Re-entrant publish queued");
            return;
        };

        let _guard = DispatchGuard { bus_id: self.id };
        loop {
            self.dispatch(event);

            let next = DISPATCH_QUEUES.with(|queues| {
                queues
                    .borrow_mut()
                    .get_mut(&self.id)
                    .and_then(|queue| queue.pop_front())
            });
            match next {
                Some(queued) => event = queued,
                None => break,
            }
        }
    }

    fn dispatch(&self, event: CacheEvent) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.add_to_history(event.clone());

        let listeners: Vec<Arc<Listener>> = self.listeners.read().clone();
        let mut spent = Vec::new();

        for listener in listeners.iter().filter(|l| l.filter.matches(&event)) {
            if listener.once && listener.fired.swap(true, Ordering::AcqRel) {
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| (listener.callback)(&event)));
            match outcome {
                Ok(Ok(())) => {
                    self.counters.listener_deliveries.fetch_add(1, Ordering::Relaxed);
                    trace!(
                        listener_id = %listener.id,
                        event_type = %event.event_type(),
                        "Event delivered"
                    );
                }
                Ok(Err(e)) => {
                    self.counters.listener_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        listener_id = %listener.id,
                        event_type = %event.event_type(),
                        error = %e,
                        "Listener returned error"
                    );
                }
                Err(_) => {
                    self.counters.listener_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        listener_id = %listener.id,
                        event_type = %event.event_type(),
                        "Listener panicked"
                    );
                }
            }

            if listener.once {
                spent.push(listener.id.clone());
            }
        }

        if !spent.is_empty() {
            self.listeners
                .write()
                .retain(|l| !(l.once && spent.contains(&l.id) && l.fired.load(Ordering::Acquire)));
        }

        self.spawn_sink_delivery(event);
    }

    fn add_to_history(&self, event: CacheEvent) {
        let mut history = self.history.lock();
        history.push_back(event);

        // 限制历史大小
        while history.len() > self.max_history_size {
            history.pop_front();
        }
    }

    fn matching_sinks(&self, event: &CacheEvent) -> Vec<Arc<SinkRegistration>> {
        self.sinks
            .read()
            .iter()
            .filter(|s| s.filter.matches(event))
            .cloned()
            .collect()
    }

    fn spawn_sink_delivery(&self, event: CacheEvent) {
        let targets = self.matching_sinks(&event);
        if targets.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let counters = self.counters.clone();
                handle.spawn(async move {
                    deliver_all(&targets, &event, &counters).await;
                });
            }
            Err(_) => {
                debug!(
                    event_type = %event.event_type(),
                    "No tokio runtime, sink delivery skipped"
                );
            }
        }
    }

    /// 投递给所有匹配的 sink 并等待结果
    ///
    /// 所有 sink 都会被尝试，失败互不影响。
    ///
    /// # 返回
    /// - `Vec<SinkOutcome>`: 每个匹配 sink 的投递结果，按注册顺序
    pub async fn deliver_to_sinks(&self, event: &CacheEvent) -> Vec<SinkOutcome> {
        let targets = self.matching_sinks(event);
        deliver_all(&targets, event, &self.counters).await
    }

    /// 查询历史事件
    ///
    /// # 参数
    /// - `filter`: 过滤条件
    /// - `limit`: 最多返回最近的 N 条
    ///
    /// # 返回
    /// - 按发布顺序排列的事件
    pub fn history(&self, filter: &EventFilter, limit: Option<usize>) -> Vec<CacheEvent> {
        let history = self.history.lock();
        let mut matched: Vec<CacheEvent> = history
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    /// 清空历史记录
    pub fn clear_history(&self) {
        self.history.lock().clear();
        debug!("Event history cleared");
    }

    /// 监听器数量
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// 获取统计信息
    pub fn stats(&self) -> EventStats {
        let c = &self.counters;
        EventStats {
            total_published: c.published.load(Ordering::Relaxed),
            listener_deliveries: c.listener_deliveries.load(Ordering::Relaxed),
            listener_errors: c.listener_errors.load(Ordering::Relaxed),
            sink_deliveries: c.sink_deliveries.load(Ordering::Relaxed),
            sink_failures: c.sink_failures.load(Ordering::Relaxed),
            history_size: self.history.lock().len(),
            active_listeners: self.listeners.read().len(),
            active_sinks: self.sinks.read().len(),
        }
    }
}

async fn deliver_all(
    targets: &[Arc<SinkRegistration>],
    event: &CacheEvent,
    counters: &Counters,
) -> Vec<SinkOutcome> {
    let deliveries = targets.iter().map(|reg| async move {
        match reg.sink.deliver(event).await {
            Ok(()) => {
                counters.sink_deliveries.fetch_add(1, Ordering::Relaxed);
                SinkOutcome::delivered(&reg.id)
            }
            Err(e) => {
                counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sink = %reg.id,
                    event_type = %event.event_type(),
                    error = %e,
                    "Sink delivery failed"
                );
                SinkOutcome::failed(&reg.id, e.to_string())
            }
        }
    });

    join_all(deliveries).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::event_bus::CustomSink;
    use crate::events::EventType;
    use std::sync::atomic::AtomicUsize;

    fn custom(name: &str) -> CacheEvent {
        CacheEvent::info("test", name, EventPayload::custom(name, serde_json::Value::Null))
    }

    #[test]
    fn test_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(id, EventFilter::new(), move |_| {
                order.lock().push(id);
                Ok(())
            });
        }

        bus.publish(custom("e"));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_listener_errors_are_isolated() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicUsize::new(0));

        bus.subscribe("fails", EventFilter::new(), |_| Err(CacheError::other("boom")));
        bus.subscribe("panics", EventFilter::new(), |_| panic!("listener panic"));
        let r = reached.clone();
        bus.subscribe("ok", EventFilter::new(), move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(custom("e"));

        assert_eq!(reached.load(Ordering::SeqCst), 1);
        let stats = bus.stats();
        assert_eq!(stats.listener_errors, 2);
        assert_eq!(stats.listener_deliveries, 1);
    }

    #[test]
    fn test_reentrant_publish_is_queued() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&bus);
        bus.subscribe(
            "republisher",
            EventFilter::new().with_event_type(EventType::Custom),
            move |event| {
                if event.message == "outer" {
                    if let Some(bus) = weak.upgrade() {
                        bus.publish(custom("inner"));
                    }
                }
                Ok(())
            },
        );
        let s = seen.clone();
        bus.subscribe("recorder", EventFilter::new(), move |event| {
            s.lock().push(event.message.clone());
            Ok(())
        });

        bus.publish(custom("outer"));

        // 外层事件先完整分发，然后才是内层事件
        assert_eq!(*seen.lock(), vec!["outer".to_string(), "inner".to_string()]);
        assert_eq!(bus.stats().total_published, 2);
    }

    #[test]
    fn test_publish_from_other_thread_dispatches_on_that_thread() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.subscribe("slow", EventFilter::new(), move |event| {
            if event.message == "slow" {
                std::thread::sleep(std::time::Duration::from_millis(300));
            }
            s.lock().push(event.message.clone());
            Ok(())
        });

        let other = bus.clone();
        let worker = std::thread::spawn(move || other.publish(custom("slow")));
        std::thread::sleep(std::time::Duration::from_millis(50));

        bus.publish(custom("fast"));

        // 返回时本线程的事件已分发并记入历史，不必等待另一线程的慢监听器
        assert_eq!(*seen.lock(), vec!["fast".to_string()]);
        let history = bus.history(&EventFilter::new(), None);
        assert!(history.iter().any(|e| e.message == "fast"));

        worker.join().unwrap();
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(bus.stats().total_published, 2);
    }

    #[test]
    fn test_reentrant_queue_is_per_bus() {
        let outer = Arc::new(EventBus::new());
        let inner = Arc::new(EventBus::new());
        let inner_seen = Arc::new(AtomicUsize::new(0));

        let c = inner_seen.clone();
        inner.subscribe("count", EventFilter::new(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let forward = inner.clone();
        outer.subscribe("forward", EventFilter::new(), move |event| {
            forward.publish(event.clone());
            // 另一条总线不在分发中，同步完成
            assert_eq!(forward.stats().total_published, 1);
            Ok(())
        });

        outer.publish(custom("e"));
        assert_eq!(inner_seen.load(Ordering::SeqCst), 1);
        assert_eq!(outer.stats().listener_errors, 0);
    }

    #[test]
    fn test_once_listener() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe_once("once", EventFilter::new(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(custom("a"));
        bus.publish(custom("b"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let sub = bus.subscribe("x", EventFilter::new(), |_| Ok(()));
        assert!(bus.unsubscribe(&sub.id));
        assert!(!bus.unsubscribe(&sub.id));
    }

    #[test]
    fn test_history_bounded_and_queryable() {
        let bus = EventBus::with_capacity(3);
        for i in 0..5 {
            bus.publish(custom(&format!("e{}", i)));
        }

        let all = bus.history(&EventFilter::new(), None);
        let messages: Vec<_> = all.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["e2", "e3", "e4"]);

        let last = bus.history(&EventFilter::new(), Some(1));
        assert_eq!(last[0].message, "e4");

        let none = bus.history(&EventFilter::new().with_event_type(EventType::StatsUpdated), None);
        assert!(none.is_empty());

        bus.clear_history();
        assert_eq!(bus.stats().history_size, 0);
    }

    #[tokio::test]
    async fn test_sink_severity_filter() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let d = delivered.clone();
        bus.add_sink(
            "alerts",
            Arc::new(CustomSink::new("alerts", move |_| {
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
            EventFilter::new().with_severities([
                EventSeverity::Warning,
                EventSeverity::Error,
                EventSeverity::Critical,
            ]),
        );

        let info = custom("info");
        let outcomes = bus.deliver_to_sinks(&info).await;
        assert!(outcomes.is_empty());
        bus.publish(info);
        tokio::task::yield_now().await;

        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(bus.history(&EventFilter::new(), None).len(), 1);
    }

    #[tokio::test]
    async fn test_sinks_fail_independently() {
        let bus = EventBus::new();
        bus.add_sink(
            "broken",
            Arc::new(CustomSink::new("broken", |_| Err(CacheError::sink("down")))),
            EventFilter::new(),
        );
        bus.add_sink(
            "working",
            Arc::new(CustomSink::new("working", |_| Ok(()))),
            EventFilter::new(),
        );

        let outcomes = bus.deliver_to_sinks(&custom("e")).await;
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].delivered);
        assert!(outcomes[1].delivered);

        let stats = bus.stats();
        assert_eq!(stats.sink_failures, 1);
        assert_eq!(stats.sink_deliveries, 1);

        assert!(bus.remove_sink("broken"));
        assert_eq!(bus.deliver_to_sinks(&custom("e")).await.len(), 1);
    }
}
