// 平台下发命令：查询、配置、控制、订阅

use crate::cache::{cseq_key, Cache};
use crate::correlation::{CorrelationRegistry, QueryClass};
use crate::device::Device;
use crate::manscdp::{
    BasicParams, ConfigDownloadResponse, ControlType, DeviceStatusResponse, Field, ManscdpBody,
    QueryAnswer, QueryType,
};
use crate::sip::SipMethod;
use crate::store::DeviceStore;
use crate::{Gb28181Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, Instrument};

/// 订阅默认有效期（秒）
const SUBSCRIBE_EXPIRES: u32 = 3600;

/// 一条待发送的请求
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: SipMethod,
    /// 请求 URI 中的用户部分（设备或通道 ID）
    pub target_id: String,
    pub body: Vec<u8>,
    pub cseq: u64,
    pub sn: u32,
    /// SUBSCRIBE 的 Expires
    pub subscription_expires: Option<u32>,
}

/// 出站传输
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, device: &Device, request: OutboundRequest) -> Result<()>;
}

/// 设备控制器
pub struct DeviceController {
    store: Arc<dyn DeviceStore>,
    cache: Arc<dyn Cache>,
    outbound: Arc<dyn Outbound>,
    correlations: Arc<CorrelationRegistry<QueryAnswer>>,
    query_timeout: Duration,
}

impl DeviceController {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        cache: Arc<dyn Cache>,
        outbound: Arc<dyn Outbound>,
        correlations: Arc<CorrelationRegistry<QueryAnswer>>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            outbound,
            correlations,
            query_timeout,
        }
    }

    /// 目录查询，应答异步写入存储
    pub async fn query_catalog(&self, device_id: &str) -> Result<u32> {
        let body = ManscdpBody::query(QueryType::Catalog, device_id);
        let sn = body.sn();
        self.send_message(device_id, device_id, body).await?;
        info!(target: "gb28181::sip", %device_id, sn, "Sent catalog query to device");
        Ok(sn)
    }

    /// 设备信息查询，不等待应答
    pub async fn query_device_info(&self, device_id: &str) -> Result<()> {
        let body = ManscdpBody::query(QueryType::DeviceInfo, device_id);
        self.send_message(device_id, device_id, body).await?;
        info!(target: "gb28181::sip", %device_id, "Sent DeviceInfo query to device");
        Ok(())
    }

    /// 设备状态查询，等待应答
    pub async fn query_device_status(&self, device_id: &str) -> Result<DeviceStatusResponse> {
        let body = ManscdpBody::query(QueryType::DeviceStatus, device_id);
        match self.request(QueryClass::DeviceStatus, device_id, body).await? {
            QueryAnswer::DeviceStatus(resp) => Ok(resp),
            other => Err(unexpected_answer(QueryClass::DeviceStatus, &other)),
        }
    }

    /// 基本参数查询，等待应答
    pub async fn query_device_config(&self, device_id: &str) -> Result<ConfigDownloadResponse> {
        let body = ManscdpBody::query(QueryType::ConfigDownload, device_id)
            .with(Field::ConfigType("BasicParam".to_string()));
        match self.request(QueryClass::DeviceConfig, device_id, body).await? {
            QueryAnswer::DeviceConfig(resp) => Ok(resp),
            other => Err(unexpected_answer(QueryClass::DeviceConfig, &other)),
        }
    }

    /// 修改基本参数，结果由 Response:DeviceConfig 异步返回
    pub async fn configure_basic_params(&self, device_id: &str, params: BasicParams) -> Result<()> {
        let body = ManscdpBody::control(ControlType::DeviceConfig, device_id)
            .with(Field::BasicParams(params));
        self.send_message(device_id, device_id, body).await
    }

    /// 云台控制
    pub async fn ptz_control(&self, device_id: &str, channel_id: &str, ptz_cmd: &str) -> Result<()> {
        let body = ManscdpBody::control(ControlType::DeviceControl, channel_id)
            .with(Field::PtzCmd(ptz_cmd.to_string()));
        self.send_message(device_id, channel_id, body).await
    }

    /// 远程重启
    pub async fn reboot(&self, device_id: &str) -> Result<()> {
        let body = ManscdpBody::control(ControlType::DeviceControl, device_id).with(Field::TeleBoot);
        self.send_message(device_id, device_id, body).await
    }

    /// 订阅报警
    pub async fn subscribe_alarm(&self, device_id: &str) -> Result<()> {
        let body = ManscdpBody::query(QueryType::Alarm, device_id).with(Field::AlarmQuery);
        self.send_subscribe(device_id, body).await
    }

    /// 订阅移动位置，`interval` 为上报间隔（秒）
    pub async fn subscribe_mobile_position(&self, device_id: &str, interval: u32) -> Result<()> {
        let body =
            ManscdpBody::query(QueryType::MobilePosition, device_id).with(Field::Interval(interval));
        self.send_subscribe(device_id, body).await
    }

    pub fn correlations(&self) -> &Arc<CorrelationRegistry<QueryAnswer>> {
        &self.correlations
    }

    /// 先注册等待方再发送，避免应答早于发送返回而丢失
    async fn request(
        &self,
        class: QueryClass,
        device_id: &str,
        body: ManscdpBody,
    ) -> Result<QueryAnswer> {
        let key = class.key(device_id);
        let span = info_span!("gb28181.sip.request", %key, sn = body.sn());

        async {
            let waiter = self.correlations.register(key.clone())?;
            self.send_message(device_id, device_id, body).await?;
            waiter.wait(self.query_timeout).await
        }
        .instrument(span)
        .await
    }

    async fn send_message(&self, device_id: &str, target_id: &str, body: ManscdpBody) -> Result<()> {
        self.send(device_id, target_id, SipMethod::Message, body, None)
            .await
    }

    async fn send_subscribe(&self, device_id: &str, body: ManscdpBody) -> Result<()> {
        self.send(
            device_id,
            device_id,
            SipMethod::Subscribe,
            body,
            Some(SUBSCRIBE_EXPIRES),
        )
        .await?;
        info!(target: "gb28181::sip", %device_id, "Sent SUBSCRIBE to device");
        Ok(())
    }

    async fn send(
        &self,
        device_id: &str,
        target_id: &str,
        method: SipMethod,
        body: ManscdpBody,
        subscription_expires: Option<u32>,
    ) -> Result<()> {
        let device = self
            .store
            .get_device_by_id(device_id)
            .await?
            .ok_or_else(|| Gb28181Error::DeviceNotFound(device_id.to_string()))?;

        let cseq = self.cache.increment_sequence(&cseq_key(device_id)).await?;
        let request = OutboundRequest {
            method,
            target_id: target_id.to_string(),
            sn: body.sn(),
            body: body.to_bytes()?,
            cseq,
            subscription_expires,
        };

        self.outbound.send(&device, request).await
    }
}

fn unexpected_answer(class: QueryClass, answer: &QueryAnswer) -> Gb28181Error {
    Gb28181Error::Failed(format!("{} answered with {:?}", class.as_str(), answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::manscdp::{decode, extract_command_type, extract_field};
    use crate::store::MemoryDeviceStore;
    use tokio::sync::Mutex;

    const DEVICE: &str = "34020000001320000001";

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<OutboundRequest>>,
    }

    #[async_trait]
    impl Outbound for Recorder {
        async fn send(&self, _device: &Device, request: OutboundRequest) -> Result<()> {
            self.sent.lock().await.push(request);
            Ok(())
        }
    }

    async fn controller(timeout: Duration) -> (Arc<DeviceController>, Arc<Recorder>) {
        let store = Arc::new(MemoryDeviceStore::new());
        store
            .device_online(&Device::new(DEVICE, "192.168.1.100", 5060))
            .await
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let controller = DeviceController::new(
            store,
            Arc::new(MemoryCache::new()),
            recorder.clone(),
            Arc::new(CorrelationRegistry::new()),
            timeout,
        );
        (Arc::new(controller), recorder)
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let (controller, recorder) = controller(Duration::from_secs(1)).await;
        let err = controller.query_catalog("unknown").await.unwrap_err();
        assert!(matches!(err, Gb28181Error::DeviceNotFound(_)));
        assert!(recorder.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_cseq_increments_per_device() {
        let (controller, recorder) = controller(Duration::from_secs(1)).await;
        controller.query_catalog(DEVICE).await.unwrap();
        controller.query_device_info(DEVICE).await.unwrap();

        let sent = recorder.sent.lock().await;
        assert_eq!(sent[0].cseq, 1);
        assert_eq!(sent[1].cseq, 2);
        assert_eq!(
            extract_command_type(&sent[1].body).to_string(),
            "Query:DeviceInfo"
        );
    }

    #[tokio::test]
    async fn test_ptz_targets_channel() {
        let (controller, recorder) = controller(Duration::from_secs(1)).await;
        controller
            .ptz_control(DEVICE, "34020000001320000011", "A50F010800FA00B7")
            .await
            .unwrap();

        let sent = recorder.sent.lock().await;
        assert_eq!(sent[0].target_id, "34020000001320000011");
        assert_eq!(
            extract_field(&sent[0].body, "PTZCmd").as_deref(),
            Some("A50F010800FA00B7")
        );
    }

    #[tokio::test]
    async fn test_subscribe_alarm() {
        let (controller, recorder) = controller(Duration::from_secs(1)).await;
        controller.subscribe_alarm(DEVICE).await.unwrap();

        let sent = recorder.sent.lock().await;
        assert_eq!(sent[0].method, SipMethod::Subscribe);
        assert_eq!(sent[0].subscription_expires, Some(SUBSCRIBE_EXPIRES));
    }

    #[tokio::test]
    async fn test_query_device_status_resolved() {
        let (controller, _recorder) = controller(Duration::from_secs(5)).await;

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.query_device_status(DEVICE).await })
        };

        let key = QueryClass::DeviceStatus.key(DEVICE);
        while !controller.correlations().is_pending(&key) {
            tokio::task::yield_now().await;
        }

        let answer: DeviceStatusResponse = decode(
            b"<Response><CmdType>DeviceStatus</CmdType><SN>1</SN><DeviceID>34020000001320000001</DeviceID><Result>OK</Result><Online>ONLINE</Online></Response>",
        )
        .unwrap();
        assert!(controller
            .correlations()
            .resolve_if_present(&key, QueryAnswer::DeviceStatus(answer)));

        let resp = task.await.unwrap().unwrap();
        assert!(resp.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_device_config_timeout() {
        let (controller, recorder) = controller(Duration::from_secs(10)).await;

        let err = controller.query_device_config(DEVICE).await.unwrap_err();
        assert!(matches!(err, Gb28181Error::Timeout(_)));
        assert_eq!(controller.correlations().pending(), 0);

        let sent = recorder.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(
            extract_field(&sent[0].body, "ConfigType").as_deref(),
            Some("BasicParam")
        );
    }
}
