//! # Cache Module
//!
//! 缓存引擎：有界容量、TTL 过期、后台清理。
//!
//! ## 模块
//!
//! - `config`: 实例配置与预设
//! - `store`: 缓存存储引擎
//! - `batch_ops`: 读写 trait 边界 (单键 + 批量)

pub mod batch_ops;
pub mod config;
pub mod store;

pub use batch_ops::{BatchCacheOps, CacheOps};
pub use config::InstanceConfig;
pub use store::{CacheHealth, CacheStore, SnapshotEntry, StoreMetrics, StoreStats, PROBE_KEY};
