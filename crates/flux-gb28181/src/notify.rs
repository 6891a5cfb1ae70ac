// 设备上下线通知

use crate::device::DeviceStatus;
use crate::{Gb28181Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(3);

/// 状态变更事件
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusEvent {
    pub device_id: String,
    pub status: DeviceStatus,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(device_id: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            device_id: device_id.into(),
            status,
            timestamp: Utc::now(),
        }
    }
}

/// 状态通知 trait
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, event: &StatusEvent) -> Result<()>;

    fn name(&self) -> &str;
}

/// 未配置通知地址时使用
pub struct NoopNotifier;

#[async_trait]
impl StatusNotifier for NoopNotifier {
    async fn notify(&self, _event: &StatusEvent) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Webhook 通知：POST JSON 事件
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| Gb28181Error::Notify(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StatusNotifier for WebhookNotifier {
    async fn notify(&self, event: &StatusEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| Gb28181Error::Notify(format!("POST {} failed: {}", self.url, e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Gb28181Error::Notify(format!(
                "Webhook failed with status: {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json() {
        let event = StatusEvent::new("34020000001320000001", DeviceStatus::Offline);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["device_id"], "34020000001320000001");
        assert_eq!(value["status"], "offline");
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_reports_error() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:1/hook").unwrap();
        let event = StatusEvent::new("34020000001320000001", DeviceStatus::Online);
        let err = notifier.notify(&event).await.unwrap_err();
        assert!(matches!(err, Gb28181Error::Notify(_)));
    }
}
