// 异步查询关联表
//
// 向设备下发查询后，应答会以独立的 SIP MESSAGE 到达。
// 等待方按 `{命令类}:{设备ID}` 注册，应答处理器按同一个 key 交付结果。

use crate::{Gb28181Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// 需要等待应答的命令类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryClass {
    DeviceInfo,
    DeviceStatus,
    DeviceConfig,
}

impl QueryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::DeviceInfo => "query-device-info",
            QueryClass::DeviceStatus => "query-device-status",
            QueryClass::DeviceConfig => "query-device-config",
        }
    }

    pub fn key(&self, device_id: &str) -> String {
        format!("{}:{}", self.as_str(), device_id)
    }
}

enum Outcome<V> {
    Value(V),
    Failed(String),
}

struct PendingEntry<V> {
    id: u64,
    tx: oneshot::Sender<Outcome<V>>,
}

/// 关联表
///
/// 移除条目与交付结果在同一步完成：超时与应答竞争时只有一方能从表中取走条目。
pub struct CorrelationRegistry<V> {
    pending: DashMap<String, PendingEntry<V>>,
    next_id: AtomicU64,
}

impl<V: Send + 'static> CorrelationRegistry<V> {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// 注册等待方，同一个 key 只能有一个未完成的等待
    pub fn register(self: &Arc<Self>, key: impl Into<String>) -> Result<Waiter<V>> {
        let key = key.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(key.clone()) {
            Entry::Occupied(_) => Err(Gb28181Error::DuplicateKey(key)),
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry { id, tx });
                tracing::debug!(target: "gb28181::sip", key = %key, "waiter registered");
                Ok(Waiter {
                    registry: Arc::clone(self),
                    key,
                    id,
                    rx: Some(rx),
                })
            }
        }
    }

    /// 注册并等待
    pub async fn wait(self: &Arc<Self>, key: impl Into<String>, timeout: Duration) -> Result<V> {
        self.register(key)?.wait(timeout).await
    }

    /// 交付应答；没有等待方时返回 false（迟到或主动上报的应答直接丢弃）
    pub fn resolve_if_present(&self, key: &str, value: V) -> bool {
        match self.pending.remove(key) {
            Some((_, entry)) => entry.tx.send(Outcome::Value(value)).is_ok(),
            None => false,
        }
    }

    /// 让等待方以 `Failed` 结束
    pub fn fail(&self, key: &str, reason: impl Into<String>) -> bool {
        match self.pending.remove(key) {
            Some((_, entry)) => entry.tx.send(Outcome::Failed(reason.into())).is_ok(),
            None => false,
        }
    }

    /// 未完成的等待数
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    fn remove_owned(&self, key: &str, id: u64) -> bool {
        self.pending.remove_if(key, |_, entry| entry.id == id).is_some()
    }
}

impl<V: Send + 'static> Default for CorrelationRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// 已注册的等待方，drop 时自动注销
pub struct Waiter<V: Send + 'static> {
    registry: Arc<CorrelationRegistry<V>>,
    key: String,
    id: u64,
    rx: Option<oneshot::Receiver<Outcome<V>>>,
}

impl<V: Send + 'static> Waiter<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn wait(mut self, timeout: Duration) -> Result<V> {
        let Some(mut rx) = self.rx.take() else {
            return Err(Gb28181Error::Failed(format!("{} already consumed", self.key)));
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(outcome) => self.finish(outcome),
            Err(_) => {
                if self.registry.remove_owned(&self.key, self.id) {
                    tracing::debug!(target: "gb28181::sip", key = %self.key, "waiter timed out");
                    return Err(Gb28181Error::Timeout(self.key.clone()));
                }
                // 应答方已取走条目，结果已经或即将写入
                let outcome = rx.await;
                self.finish(outcome)
            }
        }
    }

    fn finish(
        &self,
        outcome: std::result::Result<Outcome<V>, oneshot::error::RecvError>,
    ) -> Result<V> {
        match outcome {
            Ok(Outcome::Value(value)) => Ok(value),
            Ok(Outcome::Failed(reason)) => Err(Gb28181Error::Failed(reason)),
            Err(_) => Err(Gb28181Error::Failed(format!(
                "{} dropped without an answer",
                self.key
            ))),
        }
    }
}

impl<V: Send + 'static> Drop for Waiter<V> {
    fn drop(&mut self) {
        self.registry.remove_owned(&self.key, self.id);
    }
}
