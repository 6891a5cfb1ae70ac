// 缓存接口：按设备的 CSeq 计数

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 缓存 trait
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// 原子自增，首次调用返回 1
    async fn increment_sequence(&self, key: &str) -> Result<u64>;
}

/// CSeq 计数 key
pub fn cseq_key(device_id: &str) -> String {
    format!("gb28181:cseq:{}", device_id)
}

/// 内存缓存（用于开发和测试）
pub struct MemoryCache {
    values: Arc<RwLock<HashMap<String, Value>>>,
    sequences: Arc<RwLock<HashMap<String, u64>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            values: Arc::new(RwLock::new(HashMap::new())),
            sequences: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 已保存的键值与计数器总数
    pub async fn len(&self) -> usize {
        self.values.read().await.len() + self.sequences.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.read().await;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().await;
        values.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().await;
        values.remove(key);
        Ok(())
    }

    async fn increment_sequence(&self, key: &str) -> Result<u64> {
        let mut sequences = self.sequences.write().await;
        let seq = sequences.entry(key.to_string()).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }
}
