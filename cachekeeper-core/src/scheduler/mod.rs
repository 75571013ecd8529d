//! # Scheduler
//!
//! 定时任务基础设施。

pub mod ticker;

pub use ticker::{PeriodicTask, TickControl};
