// MESSAGE 分发：按 `{根元素}:{CmdType}` 选择处理器

use crate::lifecycle::{DeviceLifecycle, Reply, ReplySink};
use crate::manscdp::{extract_command_type, CommandKey};
use crate::sip::SipRequest;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// 支持的 MANSCDP 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Keepalive,
    AlarmNotify,
    MobilePositionNotify,
    DeviceInfo,
    DeviceConfig,
    Catalog,
    DeviceStatus,
    ConfigDownload,
    AlarmSubscription,
    MobilePositionSubscription,
}

impl Command {
    pub fn classify(key: &CommandKey) -> Option<Self> {
        let command = match (key.root.as_str(), key.cmd_type.as_str()) {
            ("Notify", "Keepalive") => Command::Keepalive,
            ("Notify", "Alarm") => Command::AlarmNotify,
            ("Notify", "MobilePosition") => Command::MobilePositionNotify,
            ("Response", "DeviceInfo") => Command::DeviceInfo,
            ("Response", "DeviceConfig") => Command::DeviceConfig,
            ("Response", "Catalog") => Command::Catalog,
            ("Response", "DeviceStatus") => Command::DeviceStatus,
            ("Response", "ConfigDownload") => Command::ConfigDownload,
            ("Response", "Alarm") => Command::AlarmSubscription,
            ("Response", "MobilePosition") => Command::MobilePositionSubscription,
            _ => return None,
        };
        Some(command)
    }
}

/// MESSAGE 路由
pub struct MessageRouter {
    lifecycle: Arc<DeviceLifecycle>,
}

impl MessageRouter {
    pub fn new(lifecycle: Arc<DeviceLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<DeviceLifecycle> {
        &self.lifecycle
    }

    pub async fn route(&self, req: &SipRequest, sink: &dyn ReplySink) -> Result<()> {
        if req.body.is_empty() {
            debug!(target: "gb28181::sip", "MESSAGE with empty body");
            return sink.reply(Reply::Ok).await;
        }

        let key = extract_command_type(&req.body);
        let Some(command) = Command::classify(&key) else {
            warn!(target: "gb28181::sip", command = %key, "Unsupported MESSAGE command");
            return Ok(());
        };
        debug!(target: "gb28181::sip", command = %key, "Dispatching MESSAGE");

        let lifecycle = &self.lifecycle;
        match command {
            Command::Keepalive => lifecycle.on_keepalive(req, sink).await,
            Command::AlarmNotify => lifecycle.on_alarm_notify(req, sink).await,
            Command::MobilePositionNotify => lifecycle.on_mobile_position_notify(req, sink).await,
            Command::DeviceInfo => lifecycle.on_device_info(req, sink).await,
            Command::DeviceConfig => lifecycle.on_device_config_response(req, sink).await,
            Command::Catalog => lifecycle.on_catalog(req, sink).await,
            Command::DeviceStatus => lifecycle.on_device_status(req, sink).await,
            Command::ConfigDownload => lifecycle.on_config_download(req, sink).await,
            Command::AlarmSubscription => {
                lifecycle.on_subscription_response(req, "Alarm", sink).await
            }
            Command::MobilePositionSubscription => {
                lifecycle
                    .on_subscription_response(req, "MobilePosition", sink)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_keys() {
        let keys = [
            ("Notify", "Keepalive", Command::Keepalive),
            ("Notify", "Alarm", Command::AlarmNotify),
            ("Notify", "MobilePosition", Command::MobilePositionNotify),
            ("Response", "DeviceInfo", Command::DeviceInfo),
            ("Response", "DeviceConfig", Command::DeviceConfig),
            ("Response", "Catalog", Command::Catalog),
            ("Response", "DeviceStatus", Command::DeviceStatus),
            ("Response", "ConfigDownload", Command::ConfigDownload),
            ("Response", "Alarm", Command::AlarmSubscription),
            ("Response", "MobilePosition", Command::MobilePositionSubscription),
        ];
        for (root, cmd, expected) in keys {
            assert_eq!(Command::classify(&CommandKey::new(root, cmd)), Some(expected));
        }
    }

    #[test]
    fn test_classify_unknown_keys() {
        assert_eq!(Command::classify(&CommandKey::new("Query", "Catalog")), None);
        assert_eq!(Command::classify(&CommandKey::new("Notify", "")), None);
        assert_eq!(Command::classify(&CommandKey::default()), None);
    }
}
