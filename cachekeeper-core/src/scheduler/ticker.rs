//! # 周期任务
//!
//! ticker + cancellation token 的组合，所有定时轮询 (过期清理、监控采样、
//! 报告生成、分析采集) 都通过它启动和停止。
//!
//! 任务的生命周期绑定在持有者上：`stop()` 或 drop 都会取消任务。

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// 单次 tick 之后是否继续
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    /// 继续下一次 tick
    Continue,
    /// 结束任务 (例如持有者已被释放)
    Stop,
}

/// 周期任务句柄
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// 启动周期任务
    ///
    /// 第一次执行发生在一个完整周期之后，而不是立即执行。
    ///
    /// # 参数
    /// - `name`: 任务名称 (用于日志)
    /// - `period`: 执行周期，0 会被提升为 1ms
    /// - `tick`: 每个周期执行的异步闭包
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickControl> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let child = token.clone();
        let task_name = name.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval 的第一次 tick 立即完成
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = child.cancelled() => {
                        debug!(task = %task_name, "Periodic task cancelled");
                        break;
                    }
                    _ = timer.tick() => {
                        trace!(task = %task_name, "Periodic task tick");
                        if tick().await == TickControl::Stop {
                            debug!(task = %task_name, "Periodic task stopped by owner");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    /// 任务名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 是否仍在运行
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// 停止任务 (不等待当前 tick 结束)
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// 停止任务并等待其退出
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let task = PeriodicTask::spawn("test", Duration::from_millis(100), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                TickControl::Continue
            }
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(task.is_running());

        task.shutdown().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_tick() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let task = PeriodicTask::spawn("self-stop", Duration::from_millis(10), move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) >= 1 {
                    TickControl::Stop
                } else {
                    TickControl::Continue
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(!task.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let task = PeriodicTask::spawn("dropped", Duration::from_millis(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                TickControl::Continue
            }
        });
        drop(task);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
