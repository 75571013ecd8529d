//! # Batch Runner
//!
//! 预热任务与批量 get / set / delete。
//!
//! 每批内同时进行的写入数由信号量限制为并发度，每批有独立超时，
//! 超时批次中未完成的条目记为失败。取消只阻止后续批次，进行中的批次会跑完。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::strategy::{order_by_priority, AdaptiveController, PrewarmOptions, PrewarmStrategy};
use super::task::{ItemError, PrewarmItem, PrewarmResult, TaskInfo, TaskStatus};
use super::BatchTarget;
use crate::config::ConfigRegistry;
use crate::error::Result;
use crate::event_bus::EventBus;
use crate::events::{EventPayload, EventSeverity};

const EVENT_SOURCE: &str = "batch";

/// 批量操作种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOperation {
    Get,
    Set,
    Delete,
}

impl BatchOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOperation::Get => "get",
            BatchOperation::Set => "set",
            BatchOperation::Delete => "delete",
        }
    }
}

/// 批量操作报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub instance: String,
    pub operation: BatchOperation,
    pub total: usize,
    /// 没有出错的条目数
    pub succeeded: usize,
    pub failed: usize,
    /// get: 命中数；set: 写入数；delete: 实际删除数
    pub affected: usize,
    pub errors: Vec<ItemError>,
    /// 批量原语失败、退回逐条执行的批次数
    pub fallbacks: usize,
    pub duration_ms: u64,
}

impl BatchReport {
    fn new(instance: &str, operation: BatchOperation, total: usize) -> Self {
        Self {
            instance: instance.to_string(),
            operation,
            total,
            succeeded: 0,
            failed: 0,
            affected: 0,
            errors: Vec::new(),
            fallbacks: 0,
            duration_ms: 0,
        }
    }

    fn fail(&mut self, key: &str, error: impl Into<String>) {
        self.failed += 1;
        self.errors.push(ItemError::new(key, error));
    }
}

/// 批量 get 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct BulkGetResult {
    /// 与输入键一一对应，出错的键为 `None`
    pub values: Vec<Option<Vec<u8>>>,
    pub report: BatchReport,
}

struct TaskEntry {
    info: Mutex<TaskInfo>,
    token: CancellationToken,
}

/// 单个批次的执行结果
struct BatchOutcome {
    succeeded: usize,
    errors: Vec<ItemError>,
}

/// 批量执行器
pub struct BatchRunner {
    registry: Arc<ConfigRegistry>,
    bus: Option<Arc<EventBus>>,
    defaults: PrewarmOptions,
    tasks: RwLock<HashMap<String, Arc<TaskEntry>>>,
}

impl BatchRunner {
    pub fn new(registry: Arc<ConfigRegistry>) -> Self {
        Self {
            registry,
            bus: None,
            defaults: PrewarmOptions::default(),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// 批量操作 (get / set / delete) 使用的默认选项
    pub fn with_default_options(mut self, options: PrewarmOptions) -> Self {
        self.defaults = options;
        self
    }

    pub fn default_options(&self) -> &PrewarmOptions {
        &self.defaults
    }

    fn register_task(&self, instance: &str, strategy: &PrewarmStrategy, total: usize) -> Arc<TaskEntry> {
        let id = uuid::Uuid::new_v4().to_string();
        let entry = Arc::new(TaskEntry {
            info: Mutex::new(TaskInfo::new(&id, instance, strategy.as_str(), total)),
            token: CancellationToken::new(),
        });
        self.tasks.write().insert(id, entry.clone());
        entry
    }

    /// 预热实例并等待完成
    pub async fn prewarm(
        &self,
        instance: &str,
        items: Vec<PrewarmItem>,
        strategy: PrewarmStrategy,
        options: PrewarmOptions,
    ) -> Result<PrewarmResult> {
        let handle = self.registry.handle(instance)?;
        Ok(self
            .prewarm_into(instance, Arc::new(handle), items, strategy, options)
            .await)
    }

    /// 预热指定目标并等待完成
    pub async fn prewarm_into(
        &self,
        instance: &str,
        target: Arc<dyn BatchTarget>,
        items: Vec<PrewarmItem>,
        strategy: PrewarmStrategy,
        options: PrewarmOptions,
    ) -> PrewarmResult {
        let entry = self.register_task(instance, &strategy, items.len());
        execute_prewarm(self.bus.clone(), entry, target, items, strategy, options).await
    }

    /// 后台预热，立即返回任务 id
    pub fn submit_prewarm(
        &self,
        instance: &str,
        items: Vec<PrewarmItem>,
        strategy: PrewarmStrategy,
        options: PrewarmOptions,
    ) -> Result<String> {
        let handle = self.registry.handle(instance)?;
        let entry = self.register_task(instance, &strategy, items.len());
        let id = entry.info.lock().id.clone();

        let bus = self.bus.clone();
        tokio::spawn(async move {
            execute_prewarm(bus, entry, Arc::new(handle), items, strategy, options).await;
        });
        debug!(task_id = %id, instance = %instance, "Prewarm task submitted");
        Ok(id)
    }

    /// 任务快照
    pub fn task(&self, id: &str) -> Option<TaskInfo> {
        self.tasks.read().get(id).map(|e| e.info.lock().clone())
    }

    /// 所有任务 (按创建时间排序)
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self
            .tasks
            .read()
            .values()
            .map(|e| e.info.lock().clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// 取消任务
    ///
    /// 未开始的任务直接进入 cancelled；运行中的任务在当前批次结束后停止。
    ///
    /// # 返回
    /// - 任务存在且尚未结束时返回 true
    pub fn cancel(&self, id: &str) -> bool {
        let Some(entry) = self.tasks.read().get(id).cloned() else {
            return false;
        };
        let mut info = entry.info.lock();
        if info.status.is_terminal() {
            return false;
        }
        entry.token.cancel();
        if info.status == TaskStatus::Pending {
            info.advance(TaskStatus::Cancelled);
        }
        info!(task_id = %id, "Prewarm task cancellation requested");
        true
    }

    /// 删除已结束的任务，返回删除数量
    pub fn purge_finished(&self) -> usize {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, e| !e.info.lock().status.is_terminal());
        before - tasks.len()
    }

    /// 取消所有未结束的任务
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.tasks.read().keys().cloned().collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    // ---------------------------------------------------------------------
    // 批量 get / set / delete
    // ---------------------------------------------------------------------

    /// 批量 get，`options` 为 `None` 时使用默认选项
    pub async fn batch_get(
        &self,
        instance: &str,
        keys: Vec<String>,
        options: Option<&PrewarmOptions>,
    ) -> Result<BulkGetResult> {
        let handle = self.registry.handle(instance)?;
        let options = options.unwrap_or(&self.defaults);
        Ok(self.batch_get_with(instance, &handle, keys, options).await)
    }

    /// 批量 set，`options` 为 `None` 时使用默认选项
    pub async fn batch_set(
        &self,
        instance: &str,
        items: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
        options: Option<&PrewarmOptions>,
    ) -> Result<BatchReport> {
        let handle = self.registry.handle(instance)?;
        let options = options.unwrap_or(&self.defaults);
        Ok(self.batch_set_with(instance, &handle, items, ttl, options).await)
    }

    /// 批量 delete，`options` 为 `None` 时使用默认选项
    pub async fn batch_delete(
        &self,
        instance: &str,
        keys: Vec<String>,
        options: Option<&PrewarmOptions>,
    ) -> Result<BatchReport> {
        let handle = self.registry.handle(instance)?;
        let options = options.unwrap_or(&self.defaults);
        Ok(self.batch_delete_with(instance, &handle, keys, options).await)
    }

    /// 批量 get：每批调用 `mget`，失败时逐条 `get` 并重试
    ///
    /// 每批 (包括逐条回退) 受 `options.batch_timeout` 限制，超时未完成的键记为失败。
    pub async fn batch_get_with(
        &self,
        instance: &str,
        target: &dyn BatchTarget,
        keys: Vec<String>,
        options: &PrewarmOptions,
    ) -> BulkGetResult {
        let started = Instant::now();
        let mut report = BatchReport::new(instance, BatchOperation::Get, keys.len());
        let mut values = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(options.batch_size.max(1)) {
            let mut slots: Vec<ItemSlot<Option<Vec<u8>>>> = chunk.iter().map(|_| None).collect();
            let mut fell_back = false;

            let work = async {
                match target.mget(chunk).await {
                    Ok(found) => {
                        for (slot, value) in slots.iter_mut().zip(found) {
                            *slot = Some(Ok(value));
                        }
                    }
                    Err(e) => {
                        warn!(instance = %instance, error = %e, "mget failed, falling back to single gets");
                        fell_back = true;
                        for (slot, key) in slots.iter_mut().zip(chunk) {
                            let outcome = with_retries(options.max_retries, || target.get(key)).await;
                            *slot = Some(outcome.map_err(|e| e.to_string()));
                        }
                    }
                }
            };
            let timed_out = tokio::time::timeout(options.batch_timeout, work).await.is_err();
            note_chunk(&mut report, instance, fell_back, timed_out);

            for (key, slot) in chunk.iter().zip(slots) {
                match slot {
                    Some(Ok(value)) => {
                        report.succeeded += 1;
                        if value.is_some() {
                            report.affected += 1;
                        }
                        values.push(value);
                    }
                    Some(Err(e)) => {
                        report.fail(key, e);
                        values.push(None);
                    }
                    None => {
                        report.fail(key, unfinished_reason(options, timed_out));
                        values.push(None);
                    }
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.emit_batch_completed(&report);
        BulkGetResult { values, report }
    }

    /// 批量 set：每批调用 `mset`，失败时逐条 `set` 并重试
    pub async fn batch_set_with(
        &self,
        instance: &str,
        target: &dyn BatchTarget,
        items: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
        options: &PrewarmOptions,
    ) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport::new(instance, BatchOperation::Set, items.len());

        for chunk in items.chunks(options.batch_size.max(1)) {
            let mut slots: Vec<ItemSlot<()>> = chunk.iter().map(|_| None).collect();
            let mut fell_back = false;

            let work = async {
                match target.mset(chunk.to_vec(), ttl).await {
                    Ok(()) => slots.iter_mut().for_each(|slot| *slot = Some(Ok(()))),
                    Err(e) => {
                        warn!(instance = %instance, error = %e, "mset failed, falling back to single sets");
                        fell_back = true;
                        for (slot, (key, value)) in slots.iter_mut().zip(chunk) {
                            let outcome =
                                with_retries(options.max_retries, || target.set(key, value.clone(), ttl)).await;
                            *slot = Some(outcome.map_err(|e| e.to_string()));
                        }
                    }
                }
            };
            let timed_out = tokio::time::timeout(options.batch_timeout, work).await.is_err();
            note_chunk(&mut report, instance, fell_back, timed_out);

            for ((key, _), slot) in chunk.iter().zip(slots) {
                match slot {
                    Some(Ok(())) => {
                        report.succeeded += 1;
                        report.affected += 1;
                    }
                    Some(Err(e)) => report.fail(key, e),
                    None => report.fail(key, unfinished_reason(options, timed_out)),
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.emit_batch_completed(&report);
        report
    }

    /// 批量 delete：每批调用 `mdel`，失败时逐条 `delete` 并重试
    pub async fn batch_delete_with(
        &self,
        instance: &str,
        target: &dyn BatchTarget,
        keys: Vec<String>,
        options: &PrewarmOptions,
    ) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport::new(instance, BatchOperation::Delete, keys.len());

        for chunk in keys.chunks(options.batch_size.max(1)) {
            // mdel 只返回总数，逐条结果记为 false，实际删除数单独累计
            let mut slots: Vec<ItemSlot<bool>> = chunk.iter().map(|_| None).collect();
            let mut bulk_removed = 0;
            let mut fell_back = false;

            let work = async {
                match target.mdel(chunk).await {
                    Ok(removed) => {
                        bulk_removed = removed;
                        slots.iter_mut().for_each(|slot| *slot = Some(Ok(false)));
                    }
                    Err(e) => {
                        warn!(instance = %instance, error = %e, "mdel failed, falling back to single deletes");
                        fell_back = true;
                        for (slot, key) in slots.iter_mut().zip(chunk) {
                            let outcome = with_retries(options.max_retries, || target.delete(key)).await;
                            *slot = Some(outcome.map_err(|e| e.to_string()));
                        }
                    }
                }
            };
            let timed_out = tokio::time::timeout(options.batch_timeout, work).await.is_err();
            note_chunk(&mut report, instance, fell_back, timed_out);

            report.affected += bulk_removed;
            for (key, slot) in chunk.iter().zip(slots) {
                match slot {
                    Some(Ok(removed)) => {
                        report.succeeded += 1;
                        if removed {
                            report.affected += 1;
                        }
                    }
                    Some(Err(e)) => report.fail(key, e),
                    None => report.fail(key, unfinished_reason(options, timed_out)),
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.emit_batch_completed(&report);
        report
    }

    fn emit_batch_completed(&self, report: &BatchReport) {
        debug!(
            instance = %report.instance,
            operation = report.operation.as_str(),
            total = report.total,
            failed = report.failed,
            "Batch operation completed"
        );
        let Some(bus) = &self.bus else {
            return;
        };
        let severity = if report.failed == 0 {
            EventSeverity::Info
        } else {
            EventSeverity::Warning
        };
        bus.emit(
            EVENT_SOURCE,
            severity,
            format!(
                "batch {} on {}: {}/{} succeeded",
                report.operation.as_str(),
                report.instance,
                report.succeeded,
                report.total
            ),
            EventPayload::BatchCompleted {
                instance: report.instance.clone(),
                operation: report.operation.as_str().to_string(),
                total: report.total,
                succeeded: report.succeeded,
                failed: report.failed,
                duration_ms: report.duration_ms,
            },
        );
    }
}

/// 批量操作中单个键的结果，`None` 表示批次结束时仍未完成
type ItemSlot<T> = Option<std::result::Result<T, String>>;

fn note_chunk(report: &mut BatchReport, instance: &str, fell_back: bool, timed_out: bool) {
    if fell_back {
        report.fallbacks += 1;
    }
    if timed_out {
        warn!(
            instance = %instance,
            operation = report.operation.as_str(),
            "Batch operation chunk timed out"
        );
    }
}

fn unfinished_reason(options: &PrewarmOptions, timed_out: bool) -> String {
    if timed_out {
        format!("batch timed out after {}ms", options.batch_timeout.as_millis())
    } else {
        "no result returned for key".to_string()
    }
}

/// 执行一次，失败后最多再重试 `retries` 次
async fn with_retries<T, F, Fut>(retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= retries || e.is_store_closed() => return Err(e),
            Err(e) => {
                attempt += 1;
                debug!(attempt = attempt, error = %e, "Retrying item");
            }
        }
    }
}

/// 执行一个批次：拆成 `concurrency` 组并发写入，整批受超时限制
async fn run_batch(
    target: &Arc<dyn BatchTarget>,
    batch: &[PrewarmItem],
    concurrency: usize,
    options: &PrewarmOptions,
) -> BatchOutcome {
    let concurrency = concurrency.max(1);
    let semaphore = Semaphore::new(concurrency);
    let results: Mutex<Vec<Option<std::result::Result<(), String>>>> = Mutex::new(vec![None; batch.len()]);
    let group_size = batch.len().div_ceil(concurrency).max(1);

    let groups = batch
        .chunks(group_size)
        .enumerate()
        .map(|(group, items)| {
            let semaphore = &semaphore;
            let results = &results;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                for (offset, item) in items.iter().enumerate() {
                    let index = group * group_size + offset;
                    let ttl = item.ttl.or(options.ttl);
                    let outcome = target
                        .set(&item.key, item.value.clone(), ttl)
                        .await
                        .map_err(|e| e.to_string());
                    results.lock()[index] = Some(outcome);
                }
            }
        });

    let timed_out = tokio::time::timeout(options.batch_timeout, join_all(groups))
        .await
        .is_err();

    let results = results.into_inner();
    let mut outcome = BatchOutcome {
        succeeded: 0,
        errors: Vec::new(),
    };
    for (item, result) in batch.iter().zip(results) {
        match result {
            Some(Ok(())) => outcome.succeeded += 1,
            Some(Err(e)) => outcome.errors.push(ItemError::new(&item.key, e)),
            None => outcome.errors.push(ItemError::new(
                &item.key,
                format!("batch timed out after {}ms", options.batch_timeout.as_millis()),
            )),
        }
    }
    if timed_out {
        warn!(
            destination = %target.target_name(),
            items = batch.len(),
            "Prewarm batch timed out"
        );
    }
    outcome
}

async fn execute_prewarm(
    bus: Option<Arc<EventBus>>,
    entry: Arc<TaskEntry>,
    target: Arc<dyn BatchTarget>,
    mut items: Vec<PrewarmItem>,
    strategy: PrewarmStrategy,
    options: PrewarmOptions,
) -> PrewarmResult {
    let started = Instant::now();
    let total = items.len();
    let (task_id, instance) = {
        let info = entry.info.lock();
        (info.id.clone(), info.instance.clone())
    };

    let mut controller = match &strategy {
        PrewarmStrategy::Adaptive(settings) => Some(AdaptiveController::new(
            settings.clone(),
            options.batch_size,
            options.concurrency,
        )),
        _ => None,
    };
    let mut result = PrewarmResult {
        task_id: task_id.clone(),
        instance: instance.clone(),
        status: TaskStatus::Running,
        total,
        completed: 0,
        failed: 0,
        errors: Vec::new(),
        batches: 0,
        duration_ms: 0,
        final_batch_size: options.batch_size.max(1),
        final_concurrency: options.concurrency.max(1),
        adjustments: Vec::new(),
    };

    let started_running = entry.info.lock().advance(TaskStatus::Running);
    if !started_running {
        // 开始前已被取消
        result.status = TaskStatus::Cancelled;
        finish(&bus, &entry, &mut result, started);
        return result;
    }

    if let Some(bus) = &bus {
        bus.emit(
            EVENT_SOURCE,
            EventSeverity::Info,
            format!("prewarm of {} items into {} started", total, instance),
            EventPayload::PrewarmStarted {
                task_id: task_id.clone(),
                instance: instance.clone(),
                total,
                strategy: strategy.as_str().to_string(),
            },
        );
    }

    if strategy == PrewarmStrategy::Priority {
        order_by_priority(&mut items);
    }

    let mut cursor = 0;
    let mut cancelled = false;
    while cursor < total {
        if entry.token.is_cancelled() {
            cancelled = true;
            break;
        }

        let (batch_size, concurrency) = match (&strategy, &controller) {
            (PrewarmStrategy::Adaptive(_), Some(c)) => (c.batch_size(), c.concurrency()),
            (PrewarmStrategy::Priority, _) => (options.batch_size.max(1), 1),
            _ => (options.batch_size.max(1), options.concurrency.max(1)),
        };
        result.final_batch_size = batch_size;
        result.final_concurrency = concurrency;

        let end = (cursor + batch_size).min(total);
        let batch_started = Instant::now();
        let outcome = run_batch(&target, &items[cursor..end], concurrency, &options).await;
        let elapsed = batch_started.elapsed();

        result.completed += outcome.succeeded;
        result.failed += outcome.errors.len();
        result.errors.extend(outcome.errors);
        {
            let mut info = entry.info.lock();
            info.completed = result.completed;
            info.failed = result.failed;
        }

        if let Some(c) = controller.as_mut() {
            if let Some(adjustment) = c.record(result.batches, elapsed) {
                debug!(
                    task_id = %task_id,
                    batch_size = adjustment.batch_size,
                    concurrency = adjustment.concurrency,
                    avg_batch_ms = adjustment.avg_batch_ms,
                    "Adaptive prewarm adjusted"
                );
                result.final_batch_size = adjustment.batch_size;
                result.final_concurrency = adjustment.concurrency;
                result.adjustments.push(adjustment);
            }
        }

        result.batches += 1;
        cursor = end;

        if strategy == PrewarmStrategy::Immediate && !options.inter_batch_delay.is_zero() && cursor < total {
            tokio::select! {
                _ = entry.token.cancelled() => {}
                _ = tokio::time::sleep(options.inter_batch_delay) => {}
            }
        }
    }

    result.status = if cancelled {
        TaskStatus::Cancelled
    } else if result.failed > 0 {
        TaskStatus::Failed
    } else {
        TaskStatus::Completed
    };
    finish(&bus, &entry, &mut result, started);
    result
}

fn finish(bus: &Option<Arc<EventBus>>, entry: &TaskEntry, result: &mut PrewarmResult, started: Instant) {
    result.duration_ms = started.elapsed().as_millis() as u64;
    {
        let mut info = entry.info.lock();
        info.advance(result.status);
        info.completed = result.completed;
        info.failed = result.failed;
        info.result = Some(result.clone());
    }

    info!(
        task_id = %result.task_id,
        instance = %result.instance,
        status = %result.status,
        completed = result.completed,
        failed = result.failed,
        duration_ms = result.duration_ms,
        "Prewarm finished"
    );

    let Some(bus) = bus else {
        return;
    };
    match result.status {
        TaskStatus::Completed => bus.emit(
            EVENT_SOURCE,
            EventSeverity::Info,
            format!("prewarm of {} completed", result.instance),
            EventPayload::PrewarmCompleted {
                task_id: result.task_id.clone(),
                instance: result.instance.clone(),
                total: result.total,
                completed: result.completed,
                duration_ms: result.duration_ms,
            },
        ),
        TaskStatus::Failed => bus.emit(
            EVENT_SOURCE,
            EventSeverity::Error,
            format!(
                "prewarm of {} failed for {} of {} items",
                result.instance, result.failed, result.total
            ),
            EventPayload::PrewarmFailed {
                task_id: result.task_id.clone(),
                instance: result.instance.clone(),
                total: result.total,
                completed: result.completed,
                failed: result.failed,
                error: result
                    .errors
                    .first()
                    .map(|e| format!("{}: {}", e.key, e.error))
                    .unwrap_or_default(),
            },
        ),
        TaskStatus::Cancelled => bus.emit(
            EVENT_SOURCE,
            EventSeverity::Warning,
            format!("prewarm of {} cancelled", result.instance),
            EventPayload::PrewarmCancelled {
                task_id: result.task_id.clone(),
                instance: result.instance.clone(),
                completed: result.completed,
            },
        ),
        TaskStatus::Pending | TaskStatus::Running => {}
    }
}
