// GB28181 MANSCDP 消息结构
// 设备上报的通知与查询应答

use serde::{Deserialize, Deserializer};
use std::str::FromStr;

/// 数值字段宽松解析
///
/// 设备常发送 `<SN></SN>`、`<Longitude/>` 或超范围的值，
/// 这些情况按缺失处理，不让整条消息解码失败。
fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let text = String::deserialize(deserializer)?;
    Ok(text.trim().parse().ok())
}

/// 心跳通知（Notify:Keepalive）
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Keepalive {
    pub cmd_type: String,

    #[serde(rename = "SN", default, deserialize_with = "lenient_number")]
    pub sn: Option<u32>,

    #[serde(rename = "DeviceID", default)]
    pub device_id: String,

    /// OK / ERROR
    ///
    /// 故障子设备列表 `<Info>` 不解析
    #[serde(default)]
    pub status: String,
}

/// 设备信息应答（Response:DeviceInfo）
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfoResponse {
    pub cmd_type: String,

    #[serde(rename = "SN", default, deserialize_with = "lenient_number")]
    pub sn: Option<u32>,

    #[serde(rename = "DeviceID", default)]
    pub device_id: String,

    #[serde(default)]
    pub result: String,

    #[serde(default)]
    pub device_name: String,

    #[serde(default)]
    pub manufacturer: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub firmware: String,

    /// 通道数
    #[serde(default, deserialize_with = "lenient_number")]
    pub channel: Option<u32>,
}

/// 设备状态应答（Response:DeviceStatus）
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceStatusResponse {
    pub cmd_type: String,

    #[serde(rename = "SN", default, deserialize_with = "lenient_number")]
    pub sn: Option<u32>,

    #[serde(rename = "DeviceID", default)]
    pub device_id: String,

    #[serde(default)]
    pub result: String,

    /// ONLINE / OFFLINE
    #[serde(default)]
    pub online: String,

    /// 部分厂商使用 Status 表示 OK/ONLINE
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub encode: String,

    #[serde(default)]
    pub record: String,

    #[serde(default)]
    pub device_time: String,
}

impl DeviceStatusResponse {
    pub fn is_online(&self) -> bool {
        self.online.eq_ignore_ascii_case("ONLINE")
            || self.status.eq_ignore_ascii_case("OK")
            || self.status.eq_ignore_ascii_case("ONLINE")
    }
}

/// 目录应答（Response:Catalog）
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogResponse {
    pub cmd_type: String,

    #[serde(rename = "SN", default, deserialize_with = "lenient_number")]
    pub sn: Option<u32>,

    #[serde(rename = "DeviceID", default)]
    pub device_id: String,

    /// 声明的目录总数，分页时多个应答共享同一个 SN
    #[serde(
        rename = "SumNum",
        alias = "SunNum",
        default,
        deserialize_with = "lenient_number"
    )]
    pub sum_num: Option<u32>,

    #[serde(default)]
    pub device_list: Option<DeviceList>,
}

impl CatalogResponse {
    pub fn into_items(self) -> Vec<CatalogItem> {
        self.device_list.map(|l| l.items).unwrap_or_default()
    }
}

/// 设备列表
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceList {
    #[serde(rename = "@Num", default, deserialize_with = "lenient_number")]
    pub num: Option<u32>,

    #[serde(rename = "Item", default)]
    pub items: Vec<CatalogItem>,
}

/// 目录项（通道信息）
///
/// 标志位字段保留原始字符串，设备经常发送空值。
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogItem {
    #[serde(rename = "DeviceID")]
    pub device_id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub manufacturer: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub civil_code: String,

    #[serde(default)]
    pub address: String,

    /// 是否有子设备（1-有，0-没有）
    #[serde(default)]
    pub parental: String,

    #[serde(rename = "ParentID", default)]
    pub parent_id: String,

    #[serde(default)]
    pub safety_way: String,

    #[serde(default)]
    pub register_way: String,

    #[serde(default)]
    pub secrecy: String,

    /// ON / OFF
    #[serde(default)]
    pub status: String,

    #[serde(default, deserialize_with = "lenient_number")]
    pub longitude: Option<f64>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub latitude: Option<f64>,
}

/// 设备配置查询应答（Response:ConfigDownload）
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigDownloadResponse {
    pub cmd_type: String,

    #[serde(rename = "SN", default, deserialize_with = "lenient_number")]
    pub sn: Option<u32>,

    #[serde(rename = "DeviceID", default)]
    pub device_id: String,

    #[serde(default)]
    pub result: String,

    #[serde(default)]
    pub basic_param: Option<BasicParam>,
}

/// 基本参数配置
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct BasicParam {
    #[serde(default)]
    pub name: String,

    #[serde(default, deserialize_with = "lenient_number")]
    pub expiration: Option<u32>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub heart_beat_interval: Option<u32>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub heart_beat_count: Option<u32>,
}

/// 报警通知（Notify:Alarm）
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AlarmNotify {
    pub cmd_type: String,

    #[serde(rename = "SN", default, deserialize_with = "lenient_number")]
    pub sn: Option<u32>,

    #[serde(rename = "DeviceID", default)]
    pub device_id: String,

    #[serde(default)]
    pub alarm_priority: String,

    #[serde(default)]
    pub alarm_method: String,

    #[serde(default)]
    pub alarm_time: String,

    #[serde(default)]
    pub alarm_description: String,
}

/// 移动位置通知（Notify:MobilePosition）
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MobilePositionNotify {
    pub cmd_type: String,

    #[serde(rename = "SN", default, deserialize_with = "lenient_number")]
    pub sn: Option<u32>,

    #[serde(rename = "DeviceID", default)]
    pub device_id: String,

    #[serde(default)]
    pub time: String,

    #[serde(default, deserialize_with = "lenient_number")]
    pub longitude: Option<f64>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub latitude: Option<f64>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub speed: Option<f64>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub direction: Option<f64>,
}

/// 异步查询的应答，经关联表交给等待方
#[derive(Debug, Clone, PartialEq)]
pub enum QueryAnswer {
    DeviceInfo(DeviceInfoResponse),
    DeviceStatus(DeviceStatusResponse),
    DeviceConfig(ConfigDownloadResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manscdp::decoder::decode;

    #[test]
    fn test_parse_catalog_response() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
<CmdType>Catalog</CmdType>
<SN>123</SN>
<DeviceID>34020000001110000001</DeviceID>
<SumNum>2</SumNum>
<DeviceList Num="2">
<Item>
<DeviceID>34020000001320000001</DeviceID>
<Name>摄像头1</Name>
<Manufacturer>海康威视</Manufacturer>
<Model>DS-2CD3T46WD</Model>
<Owner>Owner</Owner>
<CivilCode>CivilCode</CivilCode>
<Address>Address</Address>
<Parental>0</Parental>
<ParentID>34020000001110000001</ParentID>
<SafetyWay>0</SafetyWay>
<RegisterWay>1</RegisterWay>
<Secrecy>0</Secrecy>
<Status>ON</Status>
</Item>
<Item>
<DeviceID>34020000001320000002</DeviceID>
<Name>摄像头2</Name>
<Manufacturer>大华</Manufacturer>
<ParentID>34020000001110000001</ParentID>
<Status>OFF</Status>
</Item>
</DeviceList>
</Response>"#;

        let msg: CatalogResponse = decode(xml.as_bytes()).unwrap();

        assert_eq!(msg.cmd_type, "Catalog");
        assert_eq!(msg.sn, Some(123));
        assert_eq!(msg.sum_num, Some(2));

        let list = msg.device_list.clone().unwrap();
        assert_eq!(list.num, Some(2));

        let items = msg.into_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "摄像头1");
        assert_eq!(items[0].register_way, "1");
        assert_eq!(items[1].manufacturer, "大华");
        assert_eq!(items[1].status, "OFF");
        assert!(items[1].model.is_empty());
    }

    #[test]
    fn test_parse_minimal_catalog() {
        let xml = r#"<Response>
<CmdType>Catalog</CmdType>
<SN>1</SN>
<DeviceID>34020000001320000001</DeviceID>
<SumNum>0</SumNum>
</Response>"#;

        let msg: CatalogResponse = decode(xml.as_bytes()).unwrap();
        assert_eq!(msg.sum_num, Some(0));
        assert!(msg.into_items().is_empty());
    }

    #[test]
    fn test_parse_config_download() {
        let xml = r#"<Response>
<CmdType>ConfigDownload</CmdType>
<SN>9876</SN>
<DeviceID>34020000001320000001</DeviceID>
<Result>OK</Result>
<BasicParam>
<Name>IPC</Name>
<Expiration>3600</Expiration>
<HeartBeatInterval>60</HeartBeatInterval>
<HeartBeatCount>3</HeartBeatCount>
</BasicParam>
</Response>"#;

        let msg: ConfigDownloadResponse = decode(xml.as_bytes()).unwrap();
        let param = msg.basic_param.unwrap();
        assert_eq!(param.name, "IPC");
        assert_eq!(param.heart_beat_interval, Some(60));
        assert_eq!(param.heart_beat_count, Some(3));
    }

    #[test]
    fn test_device_status_online() {
        let xml = r#"<Response><CmdType>DeviceStatus</CmdType><SN>7</SN>
<DeviceID>34020000001320000001</DeviceID><Result>OK</Result><Online>ONLINE</Online><Status>OK</Status></Response>"#;

        let msg: DeviceStatusResponse = decode(xml.as_bytes()).unwrap();
        assert!(msg.is_online());
    }

    /// 带故障子设备列表的心跳
    #[test]
    fn test_keepalive_with_fault_info() {
        let xml = r#"<?xml version="1.0" encoding="GB2312"?>
<Notify>
<CmdType>Keepalive</CmdType>
<SN>43</SN>
<DeviceID>34020000001320000001</DeviceID>
<Status>OK</Status>
<Info>
<DeviceID>34020000001320000011</DeviceID>
<DeviceID>34020000001320000012</DeviceID>
</Info>
</Notify>"#;

        let msg: Keepalive = decode(xml.as_bytes()).unwrap();
        assert_eq!(msg.device_id, "34020000001320000001");
        assert_eq!(msg.status, "OK");
        assert_eq!(msg.sn, Some(43));
    }

    #[test]
    fn test_keepalive_empty_or_oversized_sn() {
        let empty = "<Notify><CmdType>Keepalive</CmdType><SN></SN><DeviceID>34020000001320000001</DeviceID><Status>OK</Status></Notify>";
        let msg: Keepalive = decode(empty.as_bytes()).unwrap();
        assert_eq!(msg.sn, None);
        assert_eq!(msg.status, "OK");

        let large = "<Notify><CmdType>Keepalive</CmdType><SN>17000000000</SN><DeviceID>34020000001320000001</DeviceID><Status>OK</Status></Notify>";
        let msg: Keepalive = decode(large.as_bytes()).unwrap();
        assert_eq!(msg.sn, None);
        assert_eq!(msg.device_id, "34020000001320000001");

        let self_closing = "<Notify><CmdType>Keepalive</CmdType><SN/><DeviceID>34020000001320000001</DeviceID></Notify>";
        let msg: Keepalive = decode(self_closing.as_bytes()).unwrap();
        assert_eq!(msg.sn, None);
    }

    /// 经纬度为空的目录项
    #[test]
    fn test_catalog_item_empty_coordinates() {
        let xml = r#"<Response>
<CmdType>Catalog</CmdType>
<SN>5</SN>
<DeviceID>34020000001320000001</DeviceID>
<SumNum>2</SumNum>
<DeviceList Num="2">
<Item><DeviceID>34020000001310000001</DeviceID><Name>Gate</Name><Longitude></Longitude><Latitude></Latitude></Item>
<Item><DeviceID>34020000001310000002</DeviceID><Name>Lobby</Name><Longitude>116.397</Longitude><Latitude/></Item>
</DeviceList>
</Response>"#;

        let items = decode::<CatalogResponse>(xml.as_bytes()).unwrap().into_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].longitude, None);
        assert_eq!(items[0].latitude, None);
        assert_eq!(items[1].longitude, Some(116.397));
        assert_eq!(items[1].latitude, None);
    }

    #[test]
    fn test_device_info_empty_numeric_fields() {
        let xml = r#"<Response>
<CmdType>DeviceInfo</CmdType>
<SN></SN>
<DeviceID>34020000001320000001</DeviceID>
<Result>OK</Result>
<DeviceName>IPC</DeviceName>
<Channel></Channel>
</Response>"#;

        let msg: DeviceInfoResponse = decode(xml.as_bytes()).unwrap();
        assert_eq!(msg.result, "OK");
        assert_eq!(msg.device_name, "IPC");
        assert_eq!(msg.sn, None);
        assert_eq!(msg.channel, None);
    }

    #[test]
    fn test_config_download_unparsable_numbers() {
        let xml = r#"<Response><CmdType>ConfigDownload</CmdType><SN>1</SN>
<DeviceID>34020000001320000001</DeviceID><Result>OK</Result>
<BasicParam><Name>IPC</Name><Expiration></Expiration><HeartBeatInterval>60s</HeartBeatInterval><HeartBeatCount> 3 </HeartBeatCount></BasicParam></Response>"#;

        let param = decode::<ConfigDownloadResponse>(xml.as_bytes())
            .unwrap()
            .basic_param
            .unwrap();
        assert_eq!(param.expiration, None);
        assert_eq!(param.heart_beat_interval, None);
        assert_eq!(param.heart_beat_count, Some(3));
    }
}
