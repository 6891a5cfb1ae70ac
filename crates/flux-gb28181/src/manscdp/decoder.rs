// MANSCDP 消息体解码
//
// 设备上报的 XML 可能是 UTF-8，也可能是 GB2312/GBK/GB18030，且经常声明错误或不声明。
// 解码分两层：
// 1. 按 XML 声明的编码转为 UTF-8 后解析
// 2. 失败时强制按 GBK 转码原始字节后重试（目录/配置类消息使用）

use crate::{Gb28181Error, Result};
use encoding_rs::{Encoding, GB18030, GBK, UTF_8};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// 路由键：`{根元素}:{CmdType}`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandKey {
    pub root: String,
    pub cmd_type: String,
}

impl CommandKey {
    pub fn new(root: impl Into<String>, cmd_type: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            cmd_type: cmd_type.into(),
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.root, self.cmd_type)
    }
}

/// 读取 XML 声明中的 encoding
pub fn declared_encoding(body: &[u8]) -> Option<&'static Encoding> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    let start = body.iter().position(|b| !b.is_ascii_whitespace())?;
    let body = &body[start..];
    if !body.starts_with(b"<?xml") {
        return None;
    }

    let end = body.windows(2).position(|w| w == b"?>")?;
    let decl = std::str::from_utf8(&body[..end]).ok()?;
    let pos = decl.find("encoding")?;
    let rest = decl[pos + "encoding".len()..].trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let label = &rest[1..];
    let label = &label[..label.find(quote)?];

    Encoding::for_label(label.trim().as_bytes())
}

fn is_legacy_chinese(encoding: &'static Encoding) -> bool {
    encoding == GBK || encoding == GB18030
}

/// 第一层：按声明编码转为 UTF-8
///
/// 声明 GB2312/GBK/GB18030 的按 GB18030 解码（兼容三者）；
/// 声明 UTF-8 或未声明时要求字节是合法 UTF-8。
pub fn to_utf8(body: &[u8]) -> Result<Cow<'_, str>> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);

    match declared_encoding(body) {
        Some(encoding) if is_legacy_chinese(encoding) => {
            let (text, _) = GB18030.decode_without_bom_handling(body);
            Ok(text)
        }
        Some(encoding) if encoding != UTF_8 => {
            let (text, _) = encoding.decode_without_bom_handling(body);
            Ok(text)
        }
        _ => std::str::from_utf8(body)
            .map(Cow::Borrowed)
            .map_err(|e| Gb28181Error::Decode(format!("body is not valid UTF-8: {}", e))),
    }
}

/// 第二层：无视声明，强制 GBK 转码
pub fn force_legacy(body: &[u8]) -> Cow<'_, str> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    let (text, _) = GBK.decode_without_bom_handling(body);
    text
}

/// 宽松取文本：先按声明编码，失败再 GBK
fn lenient_text(body: &[u8]) -> Cow<'_, str> {
    to_utf8(body).unwrap_or_else(|_| force_legacy(body))
}

fn parse_str<T: DeserializeOwned>(text: &str) -> Result<T> {
    quick_xml::de::from_str(text.trim())
        .map_err(|e| Gb28181Error::Decode(format!("Failed to parse MANSCDP XML: {}", e)))
}

/// 完整解码（第一层）
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let text = to_utf8(body)?;
    parse_str(&text)
}

/// 完整解码，第一层失败后强制 GBK 转码重试
pub fn decode_with_fallback<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    match decode(body) {
        Ok(value) => Ok(value),
        Err(primary) => {
            tracing::debug!(
                target: "gb28181::manscdp",
                error = %primary,
                "primary decode failed, retrying with GBK transcode",
            );
            let text = force_legacy(body);
            parse_str(&text).map_err(|fallback| {
                Gb28181Error::Decode(format!(
                    "{}; after GBK transcode: {}",
                    decode_reason(primary),
                    decode_reason(fallback)
                ))
            })
        }
    }
}

fn decode_reason(e: Gb28181Error) -> String {
    match e {
        Gb28181Error::Decode(reason) => reason,
        other => other.to_string(),
    }
}

/// 扫描根元素名和 CmdType，不要求文档完整合法
///
/// 找不到 CmdType 时 cmd_type 为空字符串。
pub fn extract_command_type(body: &[u8]) -> CommandKey {
    let text = lenient_text(body);
    let mut reader = Reader::from_str(&text);
    reader.trim_text(true);

    let mut key = CommandKey::default();
    let mut in_cmd_type = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if key.root.is_empty() {
                    key.root = name.clone();
                }
                in_cmd_type = name == "CmdType";
            }
            Ok(Event::Empty(e)) => {
                if key.root.is_empty() {
                    key.root = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                }
            }
            Ok(Event::Text(t)) if in_cmd_type => {
                if let Ok(value) = t.unescape() {
                    key.cmd_type = value.trim().to_string();
                }
                break;
            }
            Ok(Event::End(_)) if in_cmd_type => break,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    key
}

/// 取单个元素的文本，如 `Result`
pub fn extract_field(body: &[u8], field: &str) -> Option<String> {
    let text = lenient_text(body);
    let mut reader = Reader::from_str(&text);
    reader.trim_text(true);

    let mut inside = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                inside = e.local_name().as_ref() == field.as_bytes();
            }
            Ok(Event::Text(t)) if inside => {
                return t.unescape().ok().map(|v| v.trim().to_string());
            }
            Ok(Event::End(_)) if inside => return None,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Sample {
        cmd_type: String,
        #[serde(default)]
        name: String,
    }

    fn gbk(text: &str) -> Vec<u8> {
        let (bytes, _, unmappable) = GBK.encode(text);
        assert!(!unmappable);
        bytes.into_owned()
    }

    #[test]
    fn test_extract_command_type_minimal() {
        let key = extract_command_type(b"<Notify><CmdType>Keepalive</CmdType></Notify>");
        assert_eq!(key.to_string(), "Notify:Keepalive");
    }

    #[test]
    fn test_extract_command_type_with_declaration() {
        let body = gbk("<?xml version=\"1.0\" encoding=\"GB2312\"?>\r\n<Response>\r\n<CmdType>Catalog</CmdType>\r\n<Name>摄像头</Name>\r\n</Response>");
        assert_eq!(extract_command_type(&body), CommandKey::new("Response", "Catalog"));
    }

    #[test]
    fn test_extract_command_type_missing_cmd_type() {
        let key = extract_command_type(b"<Notify><SN>1</SN></Notify>");
        assert_eq!(key.root, "Notify");
        assert!(key.cmd_type.is_empty());
    }

    #[test]
    fn test_extract_command_type_tolerates_truncation() {
        let key = extract_command_type(b"<Response><CmdType>DeviceInfo</CmdType><SN>17</S");
        assert_eq!(key.to_string(), "Response:DeviceInfo");
    }

    #[test]
    fn test_extract_field() {
        let body = b"<Response><CmdType>DeviceConfig</CmdType><Result>ERROR</Result></Response>";
        assert_eq!(extract_field(body, "Result").as_deref(), Some("ERROR"));
        assert_eq!(extract_field(body, "Missing"), None);
    }

    #[test]
    fn test_declared_encoding() {
        assert_eq!(
            declared_encoding(b"<?xml version=\"1.0\" encoding=\"GB2312\"?><a/>"),
            Some(GBK)
        );
        assert_eq!(
            declared_encoding(b"<?xml version='1.0' encoding='UTF-8'?><a/>"),
            Some(UTF_8)
        );
        assert_eq!(declared_encoding(b"<a/>"), None);
    }

    #[test]
    fn test_decode_declared_gb2312() {
        let body = gbk("<?xml version=\"1.0\" encoding=\"GB2312\"?><Response><CmdType>Catalog</CmdType><Name>摄像头1</Name></Response>");
        let sample: Sample = decode(&body).unwrap();
        assert_eq!(sample.cmd_type, "Catalog");
        assert_eq!(sample.name, "摄像头1");
    }

    #[test]
    fn test_decode_mislabelled_body_needs_fallback() {
        let body = gbk("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><CmdType>Catalog</CmdType><Name>大华</Name></Response>");

        assert!(matches!(decode::<Sample>(&body), Err(Gb28181Error::Decode(_))));

        let sample: Sample = decode_with_fallback(&body).unwrap();
        assert_eq!(sample.name, "大华");
    }

    #[test]
    fn test_decode_with_fallback_reports_both_failures() {
        let err = decode_with_fallback::<Sample>(b"<Response><SN>1</SN>").unwrap_err();
        assert!(matches!(err, Gb28181Error::Decode(_)));

        let message = err.to_string();
        assert_eq!(message.matches("Decode error").count(), 1, "{}", message);
        assert!(message.contains("after GBK transcode"));
    }
}
