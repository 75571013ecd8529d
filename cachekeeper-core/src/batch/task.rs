//! # 预热任务
//!
//! 任务状态单调推进：`pending → running → completed | failed | cancelled`，
//! `pending` 也可以直接进入 `cancelled`。终态不会再改变。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 预热条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrewarmItem {
    pub key: String,
    pub value: Vec<u8>,
    /// 优先级，越大越先写入 (仅 priority 策略使用)
    #[serde(default)]
    pub priority: i32,
    /// 覆盖 `PrewarmOptions::ttl`
    #[serde(default)]
    pub ttl: Option<Duration>,
}

impl PrewarmItem {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            priority: 0,
            ttl: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 是否允许从当前状态转到 `next`
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending, TaskStatus::Cancelled) => true,
            (TaskStatus::Running, s) => s.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个条目的失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub key: String,
    pub error: String,
}

impl ItemError {
    pub fn new(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            error: error.into(),
        }
    }
}

/// 自适应策略的一次调整
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    /// 触发调整的批次序号 (从 0 开始)
    pub after_batch: usize,
    /// 窗口内的平均批次耗时
    pub avg_batch_ms: f64,
    pub batch_size: usize,
    pub concurrency: usize,
}

/// 预热结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrewarmResult {
    pub task_id: String,
    pub instance: String,
    pub status: TaskStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub errors: Vec<ItemError>,
    pub batches: usize,
    pub duration_ms: u64,
    pub final_batch_size: usize,
    pub final_concurrency: usize,
    pub adjustments: Vec<Adjustment>,
}

impl PrewarmResult {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// 任务信息快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub instance: String,
    pub strategy: String,
    pub status: TaskStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<PrewarmResult>,
}

impl TaskInfo {
    pub fn new(id: impl Into<String>, instance: impl Into<String>, strategy: impl Into<String>, total: usize) -> Self {
        Self {
            id: id.into(),
            instance: instance.into(),
            strategy: strategy.into(),
            status: TaskStatus::Pending,
            total,
            completed: 0,
            failed: 0,
            created_at: Utc::now(),
            finished_at: None,
            result: None,
        }
    }

    /// 推进状态，不合法的转换被忽略
    ///
    /// # 返回
    /// - 是否发生了转换
    pub fn advance(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }
}
