// 设备/通道存储接口
//
// 信令核心只通过 DeviceStore 读写设备状态，持久化方式由实现方决定。

use crate::device::{BasicConfig, Channel, Device, DeviceInfo, DeviceStatus};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// 设备存储 trait
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// 按 ID 查询设备
    async fn get_device_by_id(&self, device_id: &str) -> Result<Option<Device>>;

    /// 写入 DeviceInfo 应答中的描述信息
    async fn update_device_info(&self, info: &DeviceInfo) -> Result<()>;

    /// 写入 ConfigDownload 应答中的基本参数
    async fn update_device_basic_config(&self, device_id: &str, config: &BasicConfig)
        -> Result<()>;

    /// 设备上线（不存在时创建）
    async fn device_online(&self, device: &Device) -> Result<()>;

    /// 设备离线；未知设备忽略
    async fn device_offline(&self, device_id: &str) -> Result<()>;

    /// 记录心跳时间
    async fn device_keepalive(&self, device_id: &str) -> Result<()>;

    /// 同步一次目录应答
    ///
    /// `announced_total` 是应答声明的 SumNum，分页投递时可能大于本批数量。
    async fn sync_channels(
        &self,
        device_id: &str,
        channels: Vec<Channel>,
        announced_total: Option<u32>,
    ) -> Result<()>;

    /// 列出所有设备
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// 列出设备下的通道
    async fn list_channels(&self, device_id: &str) -> Result<Vec<Channel>>;
}

/// 内存设备存储（用于开发和测试）
///
/// 目录按通道 ID 合并，多批分页应答逐步补全。
pub struct MemoryDeviceStore {
    devices: Arc<RwLock<HashMap<String, Device>>>,
    channels: Arc<RwLock<HashMap<String, BTreeMap<String, Channel>>>>,
    announced: Arc<RwLock<HashMap<String, u32>>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            channels: Arc::new(RwLock::new(HashMap::new())),
            announced: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 最近一次目录应答声明的总数
    pub async fn announced_total(&self, device_id: &str) -> Option<u32> {
        self.announced.read().await.get(device_id).copied()
    }

    /// 目录是否已收齐
    pub async fn catalog_complete(&self, device_id: &str) -> bool {
        let Some(total) = self.announced_total(device_id).await else {
            return false;
        };
        let received = self
            .channels
            .read()
            .await
            .get(device_id)
            .map(|c| c.len())
            .unwrap_or(0);
        received >= total as usize
    }
}

impl Default for MemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn set_if_present(target: &mut String, value: &str) {
    if !value.is_empty() {
        *target = value.to_string();
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get_device_by_id(&self, device_id: &str) -> Result<Option<Device>> {
        let devices = self.devices.read().await;
        Ok(devices.get(device_id).cloned())
    }

    async fn update_device_info(&self, info: &DeviceInfo) -> Result<()> {
        let mut devices = self.devices.write().await;
        let device = devices
            .entry(info.device_id.clone())
            .or_insert_with(|| Device::new(info.device_id.clone(), "", 0));

        set_if_present(&mut device.name, &info.name);
        set_if_present(&mut device.manufacturer, &info.manufacturer);
        set_if_present(&mut device.model, &info.model);
        set_if_present(&mut device.firmware, &info.firmware);
        Ok(())
    }

    async fn update_device_basic_config(
        &self,
        device_id: &str,
        config: &BasicConfig,
    ) -> Result<()> {
        let mut devices = self.devices.write().await;
        if let Some(device) = devices.get_mut(device_id) {
            device.basic_config = Some(config.clone());
        }
        Ok(())
    }

    async fn device_online(&self, device: &Device) -> Result<()> {
        let mut devices = self.devices.write().await;
        let now = Utc::now();
        let entry = devices
            .entry(device.device_id.clone())
            .or_insert_with(|| device.clone());

        entry.ip = device.ip.clone();
        entry.port = device.port;
        entry.transport = device.transport.clone();
        entry.expires = device.expires;
        entry.status = DeviceStatus::Online;
        entry.register_time = Some(now);
        entry.last_keepalive = Some(now);

        tracing::info!("Device online: {}", device.device_id);
        Ok(())
    }

    async fn device_offline(&self, device_id: &str) -> Result<()> {
        let mut devices = self.devices.write().await;
        if let Some(device) = devices.get_mut(device_id) {
            device.status = DeviceStatus::Offline;
            tracing::info!("Device offline: {}", device_id);
        }
        Ok(())
    }

    async fn device_keepalive(&self, device_id: &str) -> Result<()> {
        let mut devices = self.devices.write().await;
        if let Some(device) = devices.get_mut(device_id) {
            device.last_keepalive = Some(Utc::now());
        }
        Ok(())
    }

    async fn sync_channels(
        &self,
        device_id: &str,
        channels: Vec<Channel>,
        announced_total: Option<u32>,
    ) -> Result<()> {
        let count = channels.len();
        {
            let mut all = self.channels.write().await;
            let merged = all.entry(device_id.to_string()).or_default();
            for channel in channels {
                merged.insert(channel.channel_id.clone(), channel);
            }
        }

        if let Some(total) = announced_total {
            self.announced
                .write()
                .await
                .insert(device_id.to_string(), total);
        }

        tracing::debug!(
            "Catalog synced: {} ({} items, announced {:?})",
            device_id,
            count,
            announced_total
        );
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let devices = self.devices.read().await;
        let mut list: Vec<Device> = devices.values().cloned().collect();
        list.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(list)
    }

    async fn list_channels(&self, device_id: &str) -> Result<Vec<Channel>> {
        let channels = self.channels.read().await;
        Ok(channels
            .get(device_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }
}
