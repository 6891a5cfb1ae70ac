// SIP 消息解析和生成
// 只覆盖信令面需要的部分：请求行/状态行、头部、原始字节消息体

use crate::{Gb28181Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// SIP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipMethod {
    Register,
    Message,
    Subscribe,
    Notify,
    Options,
    Invite,
    Ack,
    Bye,
    Cancel,
    Info,
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SipMethod::Register => "REGISTER",
            SipMethod::Message => "MESSAGE",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Options => "OPTIONS",
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Info => "INFO",
        };
        f.write_str(s)
    }
}

impl FromStr for SipMethod {
    type Err = Gb28181Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "REGISTER" => Ok(SipMethod::Register),
            "MESSAGE" => Ok(SipMethod::Message),
            "SUBSCRIBE" => Ok(SipMethod::Subscribe),
            "NOTIFY" => Ok(SipMethod::Notify),
            "OPTIONS" => Ok(SipMethod::Options),
            "INVITE" => Ok(SipMethod::Invite),
            "ACK" => Ok(SipMethod::Ack),
            "BYE" => Ok(SipMethod::Bye),
            "CANCEL" => Ok(SipMethod::Cancel),
            "INFO" => Ok(SipMethod::Info),
            other => Err(Gb28181Error::Sip(format!("Unknown method: {}", other))),
        }
    }
}

/// 响应时需要从请求原样带回的头部
const DIALOG_HEADERS: [&str; 5] = ["Via", "From", "To", "Call-ID", "CSeq"];

/// SIP 请求
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub method: SipMethod,
    pub uri: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    /// 原始消息体，编码由 MANSCDP 层负责
    pub body: Bytes,
}

impl SipRequest {
    pub fn new(method: SipMethod, uri: String) -> Self {
        Self {
            method,
            uri,
            version: "SIP/2.0".to_string(),
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// 头部查询（大小写不敏感）
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// From 头部中的用户部分，即国标设备编码
    pub fn from_user(&self) -> Option<&str> {
        self.header("From").and_then(sip_user)
    }

    /// Expires 头部
    pub fn expires(&self) -> Option<u32> {
        self.header("Expires").and_then(|v| v.trim().parse().ok())
    }

    pub fn has_authorization(&self) -> bool {
        self.header("Authorization").is_some()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!("{} {} {}\r\n", self.method, self.uri, self.version);
        encode(head, &self.headers, &self.body)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (start_line, headers, body) = split_message(data)?;

        let parts: Vec<&str> = start_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(Gb28181Error::Sip(format!("Invalid request line: {}", start_line)));
        }

        Ok(Self {
            method: parts[0].parse()?,
            uri: parts[1].to_string(),
            version: parts[2].to_string(),
            headers,
            body,
        })
    }
}

/// SIP 响应
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub version: String,
    pub status_code: u16,
    pub reason_phrase: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl SipResponse {
    pub fn new(status_code: u16, reason_phrase: impl Into<String>) -> Self {
        Self {
            version: "SIP/2.0".to_string(),
            status_code,
            reason_phrase: reason_phrase.into(),
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    /// 根据请求生成响应，复制对话相关头部
    pub fn for_request(req: &SipRequest, status_code: u16, reason_phrase: impl Into<String>) -> Self {
        let mut resp = Self::new(status_code, reason_phrase);
        for key in DIALOG_HEADERS {
            if let Some(value) = req.header(key) {
                resp.add_header(key, value);
            }
        }
        resp
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!("{} {} {}\r\n", self.version, self.status_code, self.reason_phrase);
        encode(head, &self.headers, &self.body)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (start_line, headers, body) = split_message(data)?;

        let parts: Vec<&str> = start_line.splitn(3, ' ').collect();
        if parts.len() != 3 {
            return Err(Gb28181Error::Sip(format!("Invalid status line: {}", start_line)));
        }
        let status_code = parts[1]
            .parse::<u16>()
            .map_err(|_| Gb28181Error::Sip(format!("Invalid status code: {}", parts[1])))?;

        Ok(Self {
            version: parts[0].to_string(),
            status_code,
            reason_phrase: parts[2].to_string(),
            headers,
            body,
        })
    }
}

/// SIP 消息（请求或响应）
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.starts_with(b"SIP/") {
            Ok(SipMessage::Response(SipResponse::from_bytes(data)?))
        } else {
            Ok(SipMessage::Request(SipRequest::from_bytes(data)?))
        }
    }
}

/// 从 `<sip:user@host>;tag=x` 形式中取出 user
pub fn sip_user(value: &str) -> Option<&str> {
    let start = value.find("sip:")? + 4;
    let rest = &value[start..];
    let end = rest.find('@')?;
    let user = &rest[..end];
    if user.is_empty() {
        None
    } else {
        Some(user)
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn encode(mut head: String, headers: &HashMap<String, String>, body: &[u8]) -> Vec<u8> {
    for (key, value) in headers {
        if key.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        head.push_str(&format!("{}: {}\r\n", key, value));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

type Parts = (String, HashMap<String, String>, Bytes);

fn split_message(data: &[u8]) -> Result<Parts> {
    if data.is_empty() {
        return Err(Gb28181Error::Sip("Empty SIP message".to_string()));
    }

    let (head, rest) = match data.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) => (&data[..pos], &data[pos + 4..]),
        None => (data, &data[data.len()..]),
    };

    // 头部按 ASCII 处理，消息体保持原始字节
    let head = String::from_utf8_lossy(head);
    let mut lines = head.split("\r\n");
    let start_line = lines
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Gb28181Error::Sip("Missing start line".to_string()))?
        .to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some(pos) = line.find(':') {
            let key = line[..pos].trim().to_string();
            let value = line[pos + 1..].trim().to_string();
            headers.insert(key, value);
        }
    }

    let declared = find_header(&headers, "Content-Length").and_then(|v| v.parse::<usize>().ok());
    let body = match declared {
        Some(len) if len <= rest.len() => &rest[..len],
        _ => rest,
    };

    Ok((start_line, headers, Bytes::copy_from_slice(body)))
}
