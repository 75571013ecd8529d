//! # Cache Store
//!
//! 有界、带 TTL 的缓存存储引擎。
//!
//! ## 特性
//!
//! - 容量上限：条目数永不超过 `max_size`
//! - TTL 支持：读到过期条目视为未命中并立即删除
//! - 淘汰策略：优先淘汰最早过期的条目，没有任何条目带 TTL 时退化为 LRU
//! - 后台过期清理 (`cleanup_interval`)
//! - 线程安全 (`tokio::sync::RwLock` + 原子计数器)
//!
//! `expired` 和 `evicted` 是两个独立计数器：过期清理只增加 `expired`，
//! 容量淘汰只增加 `evicted`。
//!
//! ## 示例
//!
//! ```rust,no_run
//! use cachekeeper_core::cache::{CacheStore, InstanceConfig};
//!
//! # async fn example() -> cachekeeper_core::error::Result<()> {
//! let store = CacheStore::new(InstanceConfig::user());
//! store.set("key", b"value".to_vec(), None).await?;
//! assert_eq!(store.get("key").await?, Some(b"value".to_vec()));
//!
//! let stats = store.get_stats().await?;
//! println!("Hit rate: {:.2}%", stats.hit_rate * 100.0);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::config::{InstanceConfig, ENTRY_OVERHEAD_BYTES};
use crate::error::{CacheError, Result};
use crate::scheduler::{PeriodicTask, TickControl};

/// 合成延迟探测使用的保留键
pub const PROBE_KEY: &str = "__cachekeeper_probe__";

/// 缓存统计计数器
#[derive(Debug, Default)]
pub struct StoreMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    clears: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
    errors: AtomicU64,
    last_error: parking_lot::Mutex<Option<String>>,
}

impl StoreMetrics {
    /// 创建新的统计实例
    pub fn new() -> Self {
        Self::default()
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    fn record_expired(&self, count: u64) {
        if count > 0 {
            self.expired.fetch_add(count, Ordering::Relaxed);
        }
    }

    fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, message: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(message.into());
    }

    /// 命中次数
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// 未命中次数
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// 过期删除次数
    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    /// 容量淘汰次数
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// 计算命中率 (0.0 - 1.0)，没有读请求时为 0
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            return 0.0;
        }
        (hits as f64) / (total as f64)
    }
}

/// 缓存统计快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub instance: String,
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// 估算内存占用 (字节)
    pub memory_usage: usize,
    pub sets: u64,
    pub deletes: u64,
    pub clears: u64,
    pub expired: u64,
    pub evicted: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

impl StoreStats {
    /// 利用率 size / max_size
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        self.size as f64 / self.max_size as f64
    }

    /// 读请求总数
    pub fn total_reads(&self) -> u64 {
        self.hits + self.misses
    }
}

/// 缓存健康状态
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    /// 当前缓存大小
    pub size: usize,
    /// 缓存容量
    pub capacity: usize,
    /// 利用率 (0.0 - 1.0)
    pub utilization: f64,
    /// 命中率
    pub hit_rate: f64,
    /// 是否健康
    pub is_healthy: bool,
}

/// 迁移用的条目快照
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: Vec<u8>,
    /// 剩余 TTL，`None` 表示不过期
    pub remaining_ttl: Option<Duration>,
}

/// 缓存条目
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    inserted_at: Instant,
    expires_at: Option<Instant>,
    last_accessed: Instant,
    access_count: u64,
    /// 写入顺序 (覆盖写会刷新)
    insertion_seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    fn record_access(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    fn footprint(key: &str, value: &[u8]) -> usize {
        key.len() + value.len() + ENTRY_OVERHEAD_BYTES
    }
}

/// 存储内部状态
#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
    size_bytes: usize,
}

impl StoreState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.size_bytes = self
            .size_bytes
            .saturating_sub(CacheEntry::footprint(key, &entry.value));
        Some(entry)
    }

    /// 移除过期的条目，返回移除数量
    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove(key);
        }
        expired_keys.len()
    }

    /// 选出淘汰对象：最早过期者优先，没有带 TTL 的条目时取最久未访问者
    fn select_victim(&self) -> Option<String> {
        let soonest = self
            .entries
            .iter()
            .filter_map(|(key, entry)| entry.expires_at.map(|at| (at, entry.insertion_seq, key)))
            .min();
        if let Some((_, _, key)) = soonest {
            return Some(key.clone());
        }

        self.entries
            .iter()
            .map(|(key, entry)| (entry.last_accessed, entry.insertion_seq, key))
            .min()
            .map(|(_, _, key)| key.clone())
    }
}

/// 有界 TTL 缓存存储
pub struct CacheStore {
    name: String,
    config: InstanceConfig,
    state: RwLock<StoreState>,
    metrics: Arc<StoreMetrics>,
    closed: AtomicBool,
    sweeper: parking_lot::Mutex<Option<PeriodicTask>>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CacheStore {
    /// 创建新的缓存存储 (不启动后台清理)
    pub fn new(config: InstanceConfig) -> Self {
        Self {
            name: config.instance_type.clone(),
            config,
            state: RwLock::new(StoreState::default()),
            metrics: Arc::new(StoreMetrics::new()),
            closed: AtomicBool::new(false),
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    /// 创建缓存存储并启动后台过期清理任务
    ///
    /// 需要在 tokio runtime 内调用。
    pub fn spawn(config: InstanceConfig) -> Arc<Self> {
        let store = Arc::new(Self::new(config));
        store.start_cleanup();
        store
    }

    /// 实例名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 获取配置
    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// 获取统计指标 (内部引用)
    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    /// 是否已被销毁
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            self.metrics
                .record_error(format!("operation on closed store '{}'", self.name));
            return Err(CacheError::store_closed(&self.name));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // 单键操作的加锁内实现，批量操作复用同一逻辑
    // ---------------------------------------------------------------------

    fn get_locked(&self, state: &mut StoreState, key: &str, now: Instant) -> Option<Vec<u8>> {
        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.metrics.record_miss();
                return None;
            }
        };

        if expired {
            // 过期，视为未命中
            state.remove(key);
            self.metrics.record_expired(1);
            self.metrics.record_miss();
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.record_access(now);
        self.metrics.record_hit();
        Some(entry.value.clone())
    }

    fn set_locked(
        &self,
        state: &mut StoreState,
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
        now: Instant,
    ) {
        let max_size = self.config.max_size;
        if max_size == 0 {
            return;
        }

        let expires_at = ttl.or_else(|| self.config.default_ttl()).map(|ttl| now + ttl);
        let seq = state.next_seq();
        let footprint = CacheEntry::footprint(&key, &value);

        if let Some(old) = state.remove(&key) {
            let entry = CacheEntry {
                value,
                inserted_at: now,
                expires_at,
                last_accessed: now,
                access_count: old.access_count,
                insertion_seq: seq,
            };
            state.entries.insert(key, entry);
            state.size_bytes += footprint;
            self.metrics.record_set();
            return;
        }

        if state.entries.len() >= max_size {
            // 先清理过期条目，仍然满时再做容量淘汰
            let purged = state.purge_expired(now);
            self.metrics.record_expired(purged as u64);

            while state.entries.len() >= max_size {
                match state.select_victim() {
                    Some(victim) => {
                        state.remove(&victim);
                        self.metrics.record_evicted();
                        tracing::debug!(instance = %self.name, key = %victim, "Cache evicted");
                    }
                    None => break,
                }
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at,
                last_accessed: now,
                access_count: 0,
                insertion_seq: seq,
            },
        );
        state.size_bytes += footprint;
        self.metrics.record_set();
    }

    fn delete_locked(&self, state: &mut StoreState, key: &str, now: Instant) -> bool {
        match state.remove(key) {
            Some(entry) if entry.is_expired(now) => {
                self.metrics.record_expired(1);
                false
            }
            Some(_) => {
                self.metrics.record_delete();
                true
            }
            None => false,
        }
    }

    // ---------------------------------------------------------------------
    // 公共 API
    // ---------------------------------------------------------------------

    /// 获取缓存值
    ///
    /// 未命中或过期返回 `Ok(None)`；存储已销毁返回 `StoreClosed`。
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        if !self.config.enabled {
            return Ok(None);
        }

        let mut state = self.state.write().await;
        Ok(self.get_locked(&mut state, key, Instant::now()))
    }

    /// 添加或更新缓存
    ///
    /// # 参数
    /// - `key`: 缓存键
    /// - `value`: 缓存值
    /// - `ttl`: 可选的 TTL，默认使用配置的 default_ttl
    pub async fn set(&self, key: impl Into<String>, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        if !self.config.enabled {
            return Ok(());
        }

        let mut state = self.state.write().await;
        self.set_locked(&mut state, key.into(), value, ttl, Instant::now());
        Ok(())
    }

    /// 删除缓存条目，返回是否删除了一个存活条目
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        if !self.config.enabled {
            return Ok(false);
        }

        let mut state = self.state.write().await;
        Ok(self.delete_locked(&mut state, key, Instant::now()))
    }

    /// 批量获取，结果与输入键一一对应
    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.ensure_open()?;
        if !self.config.enabled {
            return Ok(vec![None; keys.len()]);
        }

        // 获取锁一次，按顺序逐键读取
        let mut state = self.state.write().await;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| self.get_locked(&mut state, key, now))
            .collect())
    }

    /// 批量设置
    pub async fn mset(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        if !self.config.enabled {
            return Ok(());
        }

        let mut state = self.state.write().await;
        let now = Instant::now();
        for (key, value) in items {
            self.set_locked(&mut state, key, value, ttl, now);
        }
        Ok(())
    }

    /// 批量删除，返回实际删除的条目数
    pub async fn mdel(&self, keys: &[String]) -> Result<usize> {
        self.ensure_open()?;
        if !self.config.enabled {
            return Ok(0);
        }

        let mut state = self.state.write().await;
        let now = Instant::now();
        Ok(keys
            .iter()
            .filter(|key| self.delete_locked(&mut state, key, now))
            .count())
    }

    /// 清空缓存
    pub async fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        state.entries.clear();
        state.size_bytes = 0;
        self.metrics.record_clear();
        Ok(())
    }

    /// 检查是否包含指定的存活键 (不计入命中统计)
    pub async fn contains(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let state = self.state.read().await;
        let now = Instant::now();
        Ok(state
            .entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false))
    }

    /// 当前条目数 (可能包含尚未清理的过期条目)
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// 是否为空
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 存活键快照，按写入顺序排列
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let state = self.state.read().await;
        let now = Instant::now();
        let mut live: Vec<(u64, &String)> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (entry.insertion_seq, key))
            .collect();
        live.sort_unstable_by_key(|(seq, _)| *seq);
        Ok(live.into_iter().map(|(_, key)| key.clone()).collect())
    }

    /// 存活条目快照 (按写入顺序，附剩余 TTL)
    pub async fn snapshot(&self) -> Result<Vec<SnapshotEntry>> {
        self.ensure_open()?;
        let state = self.state.read().await;
        let now = Instant::now();
        let mut live: Vec<(u64, SnapshotEntry)> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| {
                (
                    entry.insertion_seq,
                    SnapshotEntry {
                        key: key.clone(),
                        value: entry.value.clone(),
                        remaining_ttl: entry.expires_at.map(|at| at.saturating_duration_since(now)),
                    },
                )
            })
            .collect();
        live.sort_unstable_by_key(|(seq, _)| *seq);
        Ok(live.into_iter().map(|(_, entry)| entry).collect())
    }

    /// 按快照顺序回放条目 (配置迁移使用)
    ///
    /// 保留每个条目的剩余 TTL，没有 TTL 的条目保持不过期；
    /// 超出容量时丢弃最早写入的条目。不计入 `sets` 统计。
    ///
    /// # 返回
    /// - `usize`: 实际回放的条目数
    pub async fn restore(&self, entries: Vec<SnapshotEntry>) -> Result<usize> {
        self.ensure_open()?;
        if !self.config.enabled || self.config.max_size == 0 {
            return Ok(0);
        }

        let skip = entries.len().saturating_sub(self.config.max_size);
        let mut state = self.state.write().await;
        let now = Instant::now();
        let mut restored = 0;

        for entry in entries.into_iter().skip(skip) {
            if state.entries.len() >= self.config.max_size && !state.entries.contains_key(&entry.key) {
                break;
            }
            let seq = state.next_seq();
            state.remove(&entry.key);
            state.size_bytes += CacheEntry::footprint(&entry.key, &entry.value);
            state.entries.insert(
                entry.key,
                CacheEntry {
                    value: entry.value,
                    inserted_at: now,
                    expires_at: entry.remaining_ttl.map(|ttl| now + ttl),
                    last_accessed: now,
                    access_count: 0,
                    insertion_seq: seq,
                },
            );
            restored += 1;
        }
        Ok(restored)
    }

    /// 条目在缓存中的存活时长
    pub async fn entry_age(&self, key: &str) -> Option<Duration> {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .map(|entry| entry.inserted_at.elapsed())
    }

    /// 移除过期的条目
    ///
    /// 通常由后台任务定期调用。
    ///
    /// # 返回
    /// - `usize`: 移除的条目数
    pub async fn purge_expired(&self) -> Result<usize> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        let count = state.purge_expired(Instant::now());
        self.metrics.record_expired(count as u64);
        Ok(count)
    }

    /// 获取统计快照
    pub async fn get_stats(&self) -> Result<StoreStats> {
        self.ensure_open()?;
        let (size, memory_usage) = {
            let state = self.state.read().await;
            (state.entries.len(), state.size_bytes)
        };
        let m = &self.metrics;

        Ok(StoreStats {
            instance: self.name.clone(),
            size,
            max_size: self.config.max_size,
            hits: m.hits(),
            misses: m.misses(),
            hit_rate: m.hit_rate(),
            memory_usage,
            sets: m.sets.load(Ordering::Relaxed),
            deletes: m.deletes.load(Ordering::Relaxed),
            clears: m.clears.load(Ordering::Relaxed),
            expired: m.expired(),
            evicted: m.evicted(),
            errors: m.errors.load(Ordering::Relaxed),
            last_error: m.last_error.lock().clone(),
        })
    }

    /// 获取缓存健康状态
    pub async fn health(&self) -> Result<CacheHealth> {
        let stats = self.get_stats().await?;
        Ok(CacheHealth {
            size: stats.size,
            capacity: stats.max_size,
            utilization: stats.utilization(),
            hit_rate: stats.hit_rate,
            // 命中率 > 50% 视为健康
            is_healthy: stats.hit_rate > 0.5 || stats.total_reads() == 0,
        })
    }

    /// 合成延迟探测
    ///
    /// 在写锁内对保留键执行一次写入并取回删除，返回耗时。
    /// 不计入统计；存储已满或保留键已被占用时只测量加锁往返，不会淘汰或覆盖真实条目。
    pub async fn probe(&self) -> Result<Duration> {
        self.ensure_open()?;
        let started = std::time::Instant::now();
        {
            let mut state = self.state.write().await;
            if state.entries.len() < self.config.max_size && !state.entries.contains_key(PROBE_KEY) {
                let now = Instant::now();
                let seq = state.next_seq();
                state.entries.insert(
                    PROBE_KEY.to_string(),
                    CacheEntry {
                        value: Vec::new(),
                        inserted_at: now,
                        expires_at: None,
                        last_accessed: now,
                        access_count: 0,
                        insertion_seq: seq,
                    },
                );
                if let Some(entry) = state.entries.remove(PROBE_KEY) {
                    tracing::trace!(instance = %self.name, seq = entry.insertion_seq, "Latency probe round trip");
                }
            }
        }
        Ok(started.elapsed())
    }

    /// 启动后台过期清理任务
    ///
    /// 任务只持有弱引用，存储释放或销毁后自动退出。
    pub fn start_cleanup(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn(
            format!("cache-sweep:{}", self.name),
            self.config.cleanup_interval(),
            move || {
                let weak = weak.clone();
                async move {
                    let Some(store) = weak.upgrade() else {
                        return TickControl::Stop;
                    };
                    match store.purge_expired().await {
                        Ok(count) => {
                            if count > 0 {
                                tracing::debug!(
                                    instance = %store.name,
                                    count = count,
                                    "Removed expired cache entries"
                                );
                            }
                            TickControl::Continue
                        }
                        Err(_) => TickControl::Stop,
                    }
                }
            },
        );

        if let Some(previous) = self.sweeper.lock().replace(task) {
            previous.stop();
        }
    }

    /// 销毁存储：停止后台清理并释放所有条目
    ///
    /// 之后的任何操作都会返回 `StoreClosed`。
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.sweeper.lock().take() {
            task.stop();
        }

        let mut state = self.state.write().await;
        state.entries.clear();
        state.size_bytes = 0;
        tracing::debug!(instance = %self.name, "Cache store closed");
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_size: usize) -> InstanceConfig {
        InstanceConfig::new("test").with_max_size(max_size)
    }

    #[tokio::test]
    async fn test_basic_get_set() {
        let store = CacheStore::new(config(10));

        store.set("key1", b"value1".to_vec(), None).await.unwrap();

        assert_eq!(store.get("key1").await.unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get("key2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hit_rate() {
        let store = CacheStore::new(config(10));
        assert_eq!(store.get_stats().await.unwrap().hit_rate, 0.0);

        store.set("key1", b"value1".to_vec(), None).await.unwrap();
        store.get("key1").await.unwrap();
        store.get("key2").await.unwrap();
        store.get("key1").await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_lru_fallback_without_ttl() {
        let store = CacheStore::new(config(3).without_default_ttl());

        store.set("key1", b"v1".to_vec(), None).await.unwrap();
        store.set("key2", b"v2".to_vec(), None).await.unwrap();
        store.set("key3", b"v3".to_vec(), None).await.unwrap();

        // 访问 key1，使其变为最近访问
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.get("key1").await.unwrap();

        // 添加第 4 个条目，应该淘汰 key2
        store.set("key4", b"v4".to_vec(), None).await.unwrap();

        assert!(store.contains("key1").await.unwrap());
        assert!(!store.contains("key2").await.unwrap());
        assert!(store.contains("key3").await.unwrap());
        assert!(store.contains("key4").await.unwrap());

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.expired, 0);
    }

    #[tokio::test]
    async fn test_evicts_soonest_expiry_first() {
        let store = CacheStore::new(config(3).without_default_ttl());

        store.set("long", b"a".to_vec(), Some(Duration::from_secs(600))).await.unwrap();
        store.set("short", b"b".to_vec(), Some(Duration::from_secs(10))).await.unwrap();
        store.set("forever", b"c".to_vec(), None).await.unwrap();

        store.set("new", b"d".to_vec(), None).await.unwrap();

        assert!(!store.contains("short").await.unwrap());
        assert!(store.contains("long").await.unwrap());
        assert!(store.contains("forever").await.unwrap());
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let store = CacheStore::new(config(10).with_default_ttl(Duration::from_millis(100)));

        store.set("key1", b"value1".to_vec(), None).await.unwrap();
        assert_eq!(store.get("key1").await.unwrap(), Some(b"value1".to_vec()));

        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(store.get("key1").await.unwrap(), None);
        assert!(store.keys().await.unwrap().is_empty());

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.evicted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_store_purges_expired_before_evicting() {
        let store = CacheStore::new(config(2).without_default_ttl());
        store.set("a", b"1".to_vec(), Some(Duration::from_millis(10))).await.unwrap();
        store.set("b", b"2".to_vec(), None).await.unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        store.set("c", b"3".to_vec(), None).await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.evicted, 0);
        assert_eq!(store.keys().await.unwrap(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_batch_ops_match_single_ops() {
        let store = CacheStore::new(config(10));
        store
            .mset(
                vec![
                    ("a".to_string(), b"1".to_vec()),
                    ("b".to_string(), b"2".to_vec()),
                ],
                None,
            )
            .await
            .unwrap();

        let values = store
            .mget(&["a".to_string(), "x".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(b"1".to_vec()), None, Some(b"2".to_vec())]);

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 2);

        let removed = store.mdel(&["a".to_string(), "x".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.keys().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_insertion_order() {
        let store = CacheStore::new(config(10));
        store.set("a", b"1".to_vec(), None).await.unwrap();
        store.set("b", b"2".to_vec(), None).await.unwrap();
        store.set("a", b"3".to_vec(), None).await.unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_memory_estimate() {
        let store = CacheStore::new(config(10));
        store.set("ab", vec![0u8; 10], None).await.unwrap();
        assert_eq!(store.get_stats().await.unwrap().memory_usage, 2 + 10 + ENTRY_OVERHEAD_BYTES);

        store.set("ab", vec![0u8; 4], None).await.unwrap();
        assert_eq!(store.get_stats().await.unwrap().memory_usage, 2 + 4 + ENTRY_OVERHEAD_BYTES);

        store.delete("ab").await.unwrap();
        assert_eq!(store.get_stats().await.unwrap().memory_usage, 0);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = CacheStore::new(config(10));
        store.set("a", b"1".to_vec(), None).await.unwrap();
        store.close().await;

        assert!(matches!(
            store.set("b", b"2".to_vec(), None).await,
            Err(CacheError::StoreClosed(_))
        ));
        assert!(matches!(store.delete("a").await, Err(CacheError::StoreClosed(_))));
        assert!(store.get_stats().await.is_err());
        assert_eq!(store.metrics().errors.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_disabled_store() {
        let store = CacheStore::new(config(10).with_enabled(false));
        store.set("key1", b"value1".to_vec(), None).await.unwrap();

        // 缓存禁用时，get 总是返回 None
        assert_eq!(store.get("key1").await.unwrap(), None);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_counts_expired() {
        let store = CacheStore::spawn(
            config(10)
                .with_default_ttl(Duration::from_millis(50))
                .with_cleanup_interval(Duration::from_millis(100)),
        );
        store.set("a", b"1".to_vec(), None).await.unwrap();
        store.set("b", b"2".to_vec(), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.len().await, 0);
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.expired, 2);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_keeps_newest_and_remaining_ttl() {
        let source = CacheStore::new(config(10).without_default_ttl());
        for i in 0..5 {
            source
                .set(format!("k{}", i), vec![i as u8], Some(Duration::from_secs(100)))
                .await
                .unwrap();
        }
        source.set("forever", b"x".to_vec(), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;

        let snapshot = source.snapshot().await.unwrap();
        assert_eq!(snapshot[0].remaining_ttl, Some(Duration::from_secs(60)));

        // 目标实例带默认 TTL，但回放的条目保持原有的过期设置
        let target = CacheStore::new(config(3).with_default_ttl(Duration::from_secs(1)));
        assert_eq!(target.restore(snapshot).await.unwrap(), 3);
        assert_eq!(
            target.keys().await.unwrap(),
            vec!["k3".to_string(), "k4".to_string(), "forever".to_string()]
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(target.keys().await.unwrap(), vec!["forever".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_keeps_counters() {
        let store = CacheStore::new(config(10));
        store.set("a", b"1".to_vec(), None).await.unwrap();
        store.get("a").await.unwrap();
        store.clear().await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.clears, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_probe_leaves_no_trace() {
        let store = CacheStore::new(config(2));
        store.set("a", b"1".to_vec(), None).await.unwrap();
        store.probe().await.unwrap();

        store.set("b", b"2".to_vec(), None).await.unwrap();
        store.probe().await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.sets, 2);
        assert_eq!(stats.hits + stats.misses, 0);
        assert_eq!(stats.evicted, 0);
        assert!(!store.contains(PROBE_KEY).await.unwrap());

        store.close().await;
        assert!(store.probe().await.unwrap_err().is_store_closed());
    }

    #[tokio::test]
    async fn test_probe_keeps_user_entry_under_reserved_key() {
        let store = CacheStore::new(config(10));
        store.set(PROBE_KEY, b"mine".to_vec(), None).await.unwrap();
        let before = store.get_stats().await.unwrap();

        store.probe().await.unwrap();

        assert_eq!(store.get(PROBE_KEY).await.unwrap(), Some(b"mine".to_vec()));
        let after = store.get_stats().await.unwrap();
        assert_eq!(after.size, 1);
        assert_eq!(after.memory_usage, before.memory_usage);
    }
}
