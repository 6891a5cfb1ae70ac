// GB28181 设备与通道模型

use crate::manscdp::{BasicParam, CatalogItem, DeviceInfoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// 设备状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Unregistered, // 未注册
    Online,       // 在线
    Offline,      // 离线
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::Unregistered => "unregistered",
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// GB28181 设备
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    /// 设备 ID（20位国标编码）
    pub device_id: String,

    /// 设备名称
    pub name: String,

    pub manufacturer: String,

    pub model: String,

    pub firmware: String,

    /// 设备 IP 地址
    pub ip: String,

    /// 设备端口
    pub port: u16,

    /// 传输协议（UDP/TCP）
    pub transport: String,

    /// 设备状态
    pub status: DeviceStatus,

    /// 注册时间
    pub register_time: Option<DateTime<Utc>>,

    /// 最后心跳时间
    pub last_keepalive: Option<DateTime<Utc>>,

    /// 注册有效期（秒）
    pub expires: u32,

    /// 基本参数配置（ConfigDownload 应答）
    pub basic_config: Option<BasicConfig>,
}

impl Device {
    pub fn new(device_id: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            device_id: device_id.into(),
            name: String::new(),
            manufacturer: String::new(),
            model: String::new(),
            firmware: String::new(),
            ip: ip.into(),
            port,
            transport: "UDP".to_string(),
            status: DeviceStatus::Unregistered,
            register_time: None,
            last_keepalive: None,
            expires: 0,
            basic_config: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    /// 设备的 SIP 地址
    pub fn sip_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// 设备描述信息（DeviceInfo 应答）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
    pub channel_count: Option<u32>,
}

impl From<&DeviceInfoResponse> for DeviceInfo {
    fn from(resp: &DeviceInfoResponse) -> Self {
        Self {
            device_id: resp.device_id.clone(),
            name: resp.device_name.clone(),
            manufacturer: resp.manufacturer.clone(),
            model: resp.model.clone(),
            firmware: resp.firmware.clone(),
            channel_count: resp.channel,
        }
    }
}

/// 设备基本参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BasicConfig {
    pub name: String,
    pub expiration: Option<u32>,
    pub heartbeat_interval: Option<u32>,
    pub heartbeat_count: Option<u32>,
}

impl From<&BasicParam> for BasicConfig {
    fn from(param: &BasicParam) -> Self {
        Self {
            name: param.name.clone(),
            expiration: param.expiration,
            heartbeat_interval: param.heart_beat_interval,
            heartbeat_count: param.heart_beat_count,
        }
    }
}

/// 设备通道（摄像头）
///
/// `parent_id` 只记录上级编号，不保证形成树。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    /// 通道 ID（20位国标编码）
    pub channel_id: String,

    /// 所属设备 ID
    pub device_id: String,

    pub parent_id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub owner: String,
    pub civil_code: String,
    pub address: String,
    pub parental: String,
    pub safety_way: String,
    pub register_way: String,
    pub secrecy: String,

    /// 通道状态（ON/OFF）
    pub status: String,

    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

impl Channel {
    pub fn from_catalog_item(device_id: &str, item: CatalogItem) -> Self {
        Self {
            channel_id: item.device_id,
            device_id: device_id.to_string(),
            parent_id: item.parent_id,
            name: item.name,
            manufacturer: item.manufacturer,
            model: item.model,
            owner: item.owner,
            civil_code: item.civil_code,
            address: item.address,
            parental: item.parental,
            safety_way: item.safety_way,
            register_way: item.register_way,
            secrecy: item.secrecy,
            status: item.status,
            longitude: item.longitude,
            latitude: item.latitude,
        }
    }

    pub fn is_on(&self) -> bool {
        self.status.eq_ignore_ascii_case("ON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_device_is_unregistered() {
        let device = Device::new("34020000001320000001", "192.168.1.100", 5060);
        assert_eq!(device.status, DeviceStatus::Unregistered);
        assert_eq!(device.sip_addr(), "192.168.1.100:5060");
        assert!(device.register_time.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&DeviceStatus::Online).unwrap();
        assert_eq!(json, "\"online\"");
        assert_eq!(DeviceStatus::Offline.to_string(), "offline");
    }
}
