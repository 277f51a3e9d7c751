use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};

struct Task {
    name: &'static str,
    stop: oneshot::Sender<()>,
}

/// 全局定时任务管理器
///
/// 每个任务是一个独立的 tokio 任务：固定周期的 ticker 加一个停止信号。
/// 停止信号只在两次执行之间生效，正在执行的一轮会完整跑完。
pub struct Scheduler {
    tasks: Mutex<HashMap<u64, Task>>,
    next_id: AtomicU64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 固定间隔执行任务，首次执行在 `first_delay` 之后
    ///
    /// 每轮结束后无论成功与否都会等待下一个周期，直到 `remove` 或 `shutdown`。
    pub fn add_interval<F, Fut>(
        &self,
        name: &'static str,
        first_delay: Duration,
        period: Duration,
        mut task_gen: F,
    ) -> u64
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let period = period.max(Duration::from_secs(1));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + first_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => task_gen().await,
                }
            }
            debug!(target: "Scheduler", "定时任务 [{}] 已停止", name);
        });

        self.lock().insert(id, Task { name, stop: stop_tx });
        debug!(target: "Scheduler", "已注册定时任务 [{}] (#{}, 周期 {:?})", name, id, period);
        id
    }

    pub fn remove(&self, id: u64) {
        if let Some(task) = self.lock().remove(&id) {
            let _ = task.stop.send(());
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        let mut tasks = self.lock();
        if !tasks.is_empty() {
            info!(target: "Scheduler", "正在清理定时任务 ({} 个)...", tasks.len());
        }
        for (_, task) in tasks.drain() {
            debug!(target: "Scheduler", "停止 [{}]", task.name);
            let _ = task.stop.send(());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Task>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn interval_runs_until_removed() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let id = scheduler.add_interval(
            "count",
            Duration::from_secs(1),
            Duration::from_secs(10),
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            },
        );
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        scheduler.remove(id);
        assert!(scheduler.is_empty());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let c = counter.clone();
            scheduler.add_interval("t", Duration::ZERO, Duration::from_secs(5), move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.shutdown();
        let seen = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
        assert!(scheduler.is_empty());
    }
}
