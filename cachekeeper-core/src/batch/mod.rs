//! # Batch
//!
//! 批量读写与缓存预热。
//!
//! ## 模块
//!
//! - `task`: 预热条目、任务状态与结果
//! - `strategy`: immediate / priority / adaptive 策略与选项
//! - `runner`: 执行器，后台任务管理与批量 get / set / delete
//!
//! ## 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cachekeeper_core::batch::{BatchRunner, PrewarmItem, PrewarmOptions, PrewarmStrategy};
//! use cachekeeper_core::config::ConfigRegistry;
//!
//! # async fn example(registry: Arc<ConfigRegistry>) -> cachekeeper_core::error::Result<()> {
//! let runner = BatchRunner::new(registry);
//! let items = vec![PrewarmItem::new("user:1", b"alice".to_vec()).with_priority(10)];
//! let result = runner
//!     .prewarm("user", items, PrewarmStrategy::Priority, PrewarmOptions::default())
//!     .await?;
//! println!("{} of {} items written", result.completed, result.total);
//! # Ok(())
//! # }
//! ```

pub mod runner;
pub mod strategy;
pub mod task;

use crate::cache::{BatchCacheOps, CacheStore};
use crate::config::InstanceHandle;

pub use runner::{BatchOperation, BatchReport, BatchRunner, BulkGetResult};
pub use strategy::{AdaptiveController, AdaptiveSettings, PrewarmOptions, PrewarmStrategy};
pub use task::{Adjustment, ItemError, PrewarmItem, PrewarmResult, TaskInfo, TaskStatus};

/// 执行器写入的目标
pub trait BatchTarget: BatchCacheOps {
    /// 用于日志和事件的目标名称
    fn target_name(&self) -> &str;
}

impl BatchTarget for InstanceHandle {
    fn target_name(&self) -> &str {
        self.name()
    }
}

impl BatchTarget for CacheStore {
    fn target_name(&self) -> &str {
        self.name()
    }
}
