// 设备存活定时器
//
// 每个设备一个定时器：心跳到达时推迟截止时间，超时后从表中移除并回调一次。

use crate::{Gb28181Error, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// 超时回调，参数为设备 ID
pub type ExpireCallback = Box<dyn FnOnce(String) -> BoxFuture<'static, ()> + Send>;

struct TimerEntry {
    generation: u64,
    interval: Duration,
    deadline: Instant,
    task: JoinHandle<()>,
}

type TimerTable = Arc<Mutex<HashMap<String, TimerEntry>>>;

/// 存活定时器表
#[derive(Clone, Default)]
pub struct LivenessScheduler {
    timers: TimerTable,
    generation: Arc<AtomicU64>,
}

impl LivenessScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动定时器；已存在时返回 `AlreadyRunning`
    pub async fn start(
        &self,
        device_id: &str,
        interval: Duration,
        on_expire: ExpireCallback,
    ) -> Result<()> {
        let mut timers = self.timers.lock().await;
        if timers.contains_key(device_id) {
            return Err(Gb28181Error::AlreadyRunning(device_id.to_string()));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + interval;
        let task = tokio::spawn(watch(
            Arc::clone(&self.timers),
            device_id.to_string(),
            generation,
            deadline,
            on_expire,
        ));

        timers.insert(
            device_id.to_string(),
            TimerEntry {
                generation,
                interval,
                deadline,
                task,
            },
        );

        debug!(
            target: "gb28181::sip",
            device_id = %device_id,
            interval_secs = interval.as_secs(),
            "liveness timer started"
        );
        Ok(())
    }

    /// 以原间隔推迟截止时间；不存在时返回 `TimerNotFound`
    pub async fn reset(&self, device_id: &str) -> Result<()> {
        let mut timers = self.timers.lock().await;
        match timers.get_mut(device_id) {
            Some(entry) => {
                entry.deadline = Instant::now() + entry.interval;
                Ok(())
            }
            None => Err(Gb28181Error::TimerNotFound(device_id.to_string())),
        }
    }

    /// 取消定时器，可重复调用
    pub async fn cancel(&self, device_id: &str) {
        let mut timers = self.timers.lock().await;
        if let Some(entry) = timers.remove(device_id) {
            entry.task.abort();
            debug!(target: "gb28181::sip", device_id = %device_id, "liveness timer cancelled");
        }
    }

    pub async fn is_tracking(&self, device_id: &str) -> bool {
        self.timers.lock().await.contains_key(device_id)
    }

    pub async fn len(&self) -> usize {
        self.timers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.timers.lock().await.is_empty()
    }

    /// 取消全部定时器（进程退出）
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, entry) in timers.drain() {
            entry.task.abort();
        }
        info!(target: "gb28181::sip", count, "liveness scheduler stopped");
    }
}

async fn watch(
    timers: TimerTable,
    device_id: String,
    generation: u64,
    mut deadline: Instant,
    on_expire: ExpireCallback,
) {
    loop {
        tokio::time::sleep_until(deadline).await;

        let mut guard = timers.lock().await;
        match guard.get(&device_id) {
            Some(entry) if entry.generation == generation => {
                if entry.deadline > Instant::now() {
                    deadline = entry.deadline;
                    continue;
                }
                guard.remove(&device_id);
            }
            // 已被取消或被新的定时器替换
            _ => return,
        }
        drop(guard);

        info!(target: "gb28181::sip", device_id = %device_id, "liveness timer expired");
        on_expire(device_id).await;
        return;
    }
}
