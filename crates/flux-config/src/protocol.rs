use serde::{Deserialize, Serialize};

/// 协议配置（泛型，支持不同协议的服务器配置）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProtocolConfig<T> {
    #[serde(default)]
    pub server: T,
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
}

impl<T> ProtocolConfig<T> {
    /// 配置的 Webhook 地址，未配置或为空时返回 None
    pub fn webhook_url(&self) -> Option<&str> {
        self.notify
            .as_ref()
            .and_then(|n| n.webhook_url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// 设备状态变更通知配置
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}
