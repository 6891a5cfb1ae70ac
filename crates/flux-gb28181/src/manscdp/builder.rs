// MANSCDP 下发消息体生成（Query / Control）

use crate::{Gb28181Error, Result};
use encoding_rs::GBK;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use rand::Rng;
use std::io::Cursor;

/// 查询类命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Catalog,
    DeviceInfo,
    DeviceStatus,
    RecordInfo,
    Alarm,
    ConfigDownload,
    PresetQuery,
    MobilePosition,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Catalog => "Catalog",
            QueryType::DeviceInfo => "DeviceInfo",
            QueryType::DeviceStatus => "DeviceStatus",
            QueryType::RecordInfo => "RecordInfo",
            QueryType::Alarm => "Alarm",
            QueryType::ConfigDownload => "ConfigDownload",
            QueryType::PresetQuery => "PresetQuery",
            QueryType::MobilePosition => "MobilePosition",
        }
    }
}

/// 控制类命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    DeviceConfig,
    DeviceControl,
}

impl ControlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::DeviceConfig => "DeviceConfig",
            ControlType::DeviceControl => "DeviceControl",
        }
    }
}

/// 基本参数（DeviceConfig / BasicParam）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicParams {
    pub name: String,
    pub expiration: u32,
    pub heartbeat_interval: u32,
    pub heartbeat_count: u32,
}

/// 附加字段，按添加顺序写在 DeviceID 之后
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    FilePath(String),
    PtzCmd(String),
    BasicParams(BasicParams),
    /// 报警查询/订阅范围（全部级别、全部方式）
    AlarmQuery,
    ConfigType(String),
    TeleBoot,
    Interval(u32),
    Custom(String, String),
}

/// 下发给设备的 MANSCDP 文档
#[derive(Debug, Clone)]
pub struct ManscdpBody {
    root: &'static str,
    cmd_type: &'static str,
    sn: u32,
    device_id: String,
    fields: Vec<Field>,
}

impl ManscdpBody {
    pub fn query(cmd: QueryType, device_id: impl Into<String>) -> Self {
        Self::new("Query", cmd.as_str(), device_id.into())
    }

    pub fn control(cmd: ControlType, device_id: impl Into<String>) -> Self {
        Self::new("Control", cmd.as_str(), device_id.into())
    }

    fn new(root: &'static str, cmd_type: &'static str, device_id: String) -> Self {
        Self {
            root,
            cmd_type,
            sn: next_sn(),
            device_id,
            fields: Vec::new(),
        }
    }

    pub fn with(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_sn(mut self, sn: u32) -> Self {
        self.sn = sn;
        self
    }

    pub fn sn(&self) -> u32 {
        self.sn
    }

    pub fn cmd_type(&self) -> &'static str {
        self.cmd_type
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// 生成 XML 文本（声明为 GB2312）
    pub fn to_xml(&self) -> Result<String> {
        let bytes = self
            .render()
            .map_err(|e| Gb28181Error::Encode(format!("{} body: {}", self.cmd_type, e)))?;
        String::from_utf8(bytes).map_err(|e| Gb28181Error::Encode(e.to_string()))
    }

    /// 生成 GB2312 编码的消息体字节
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let xml = self.to_xml()?;
        let (bytes, _, _) = GBK.encode(&xml);
        Ok(bytes.into_owned())
    }

    fn render(&self) -> quick_xml::Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("GB2312"), None)))?;
        writer.write_event(Event::Start(BytesStart::new(self.root)))?;
        text_element(&mut writer, "CmdType", self.cmd_type)?;
        text_element(&mut writer, "SN", &self.sn.to_string())?;
        text_element(&mut writer, "DeviceID", &self.device_id)?;

        for field in &self.fields {
            match field {
                Field::FilePath(path) => text_element(&mut writer, "FilePath", path)?,
                Field::PtzCmd(cmd) => text_element(&mut writer, "PTZCmd", cmd)?,
                Field::BasicParams(params) => {
                    writer.write_event(Event::Start(BytesStart::new("BasicParam")))?;
                    text_element(&mut writer, "Name", &params.name)?;
                    text_element(&mut writer, "Expiration", &params.expiration.to_string())?;
                    text_element(
                        &mut writer,
                        "HeartBeatInterval",
                        &params.heartbeat_interval.to_string(),
                    )?;
                    text_element(
                        &mut writer,
                        "HeartBeatCount",
                        &params.heartbeat_count.to_string(),
                    )?;
                    writer.write_event(Event::End(BytesEnd::new("BasicParam")))?;
                }
                Field::AlarmQuery => {
                    text_element(&mut writer, "StartAlarmPriority", "0")?;
                    text_element(&mut writer, "EndAlarmPriority", "0")?;
                    text_element(&mut writer, "AlarmMethod", "0")?;
                }
                Field::ConfigType(kind) => text_element(&mut writer, "ConfigType", kind)?,
                Field::TeleBoot => text_element(&mut writer, "TeleBoot", "Boot")?,
                Field::Interval(secs) => text_element(&mut writer, "Interval", &secs.to_string())?,
                Field::Custom(key, value) => text_element(&mut writer, key, value)?,
            }
        }

        writer.write_event(Event::End(BytesEnd::new(self.root)))?;
        Ok(writer.into_inner().into_inner())
    }
}

fn text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// 生成十进制伪随机序列号
pub fn next_sn() -> u32 {
    rand::thread_rng().gen_range(1..1_000_000)
}
