// 设备生命周期处理
//
// 注册/注销、心跳、查询应答与通知的处理逻辑。
// 每个处理器先通过 ReplySink 应答，再更新存储与定时器。

use crate::cache::Cache;
use crate::config::SipServerConfig;
use crate::control::{DeviceController, Outbound};
use crate::correlation::{CorrelationRegistry, QueryClass};
use crate::device::{BasicConfig, Channel, Device, DeviceInfo, DeviceStatus};
use crate::liveness::{ExpireCallback, LivenessScheduler};
use crate::manscdp::{
    decode, decode_with_fallback, extract_field, AlarmNotify, CatalogResponse,
    ConfigDownloadResponse, DeviceInfoResponse, DeviceStatusResponse, Keepalive,
    MobilePositionNotify, QueryAnswer,
};
use crate::notify::{StatusEvent, StatusNotifier};
use crate::sip::SipRequest;
use crate::store::DeviceStore;
use crate::{Gb28181Error, Result};
use async_trait::async_trait;
use futures::FutureExt;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

const RESULT_OK: &str = "OK";

/// 处理器给出的应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// 200 OK
    Ok,
    /// 200 OK，附带 Expires/Date
    Registered { expires: u32 },
    /// 401 Unauthorized
    Challenge { www_authenticate: String },
    /// 404 Not Found
    NotFound(String),
    /// 400 Bad Request
    BadRequest(String),
}

/// 应答出口（UDP 事务或测试记录器）
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, reply: Reply) -> Result<()>;
}

/// 设备生命周期
pub struct DeviceLifecycle {
    config: SipServerConfig,
    store: Arc<dyn DeviceStore>,
    correlations: Arc<CorrelationRegistry<QueryAnswer>>,
    liveness: LivenessScheduler,
    notifier: Arc<dyn StatusNotifier>,
    controller: Arc<DeviceController>,
}

impl DeviceLifecycle {
    pub fn new(
        config: SipServerConfig,
        store: Arc<dyn DeviceStore>,
        cache: Arc<dyn Cache>,
        outbound: Arc<dyn Outbound>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        let correlations = Arc::new(CorrelationRegistry::new());
        let controller = Arc::new(DeviceController::new(
            store.clone(),
            cache,
            outbound,
            correlations.clone(),
            config.query_timeout(),
        ));

        Self {
            config,
            store,
            correlations,
            liveness: LivenessScheduler::new(),
            notifier,
            controller,
        }
    }

    pub fn config(&self) -> &SipServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }

    pub fn controller(&self) -> &Arc<DeviceController> {
        &self.controller
    }

    pub fn correlations(&self) -> &Arc<CorrelationRegistry<QueryAnswer>> {
        &self.correlations
    }

    pub fn liveness(&self) -> &LivenessScheduler {
        &self.liveness
    }

    /// 处理 REGISTER
    pub async fn on_register(
        &self,
        req: &SipRequest,
        source: SocketAddr,
        sink: &dyn ReplySink,
    ) -> Result<()> {
        let Some(device_id) = req.from_user().map(str::to_string) else {
            warn!(target: "gb28181::sip", remote = %source, "REGISTER without device ID in From");
            return sink
                .reply(Reply::BadRequest("missing device ID".to_string()))
                .await;
        };

        let span = info_span!("gb28181.sip.register", %device_id, remote = %source);
        async {
            if !req.has_authorization() {
                return self.challenge(&device_id, source, sink).await;
            }

            let Some(expires) = req.expires() else {
                warn!(target: "gb28181::sip", "REGISTER without a valid Expires header");
                return sink
                    .reply(Reply::BadRequest("missing or invalid Expires".to_string()))
                    .await;
            };

            if expires == 0 {
                return self.unregister(&device_id, sink).await;
            }

            let mut device = match self.store.get_device_by_id(&device_id).await {
                Ok(Some(device)) => device,
                Ok(None) => {
                    debug!(target: "gb28181::sip", "Device not found in store, creating");
                    Device::new(device_id.clone(), source.ip().to_string(), source.port())
                }
                Err(e) => {
                    error!(target: "gb28181::sip", error = %e, "Failed to load device");
                    Device::new(device_id.clone(), source.ip().to_string(), source.port())
                }
            };
            device.ip = source.ip().to_string();
            device.port = source.port();
            device.expires = expires;

            sink.reply(Reply::Registered { expires }).await?;

            if let Err(e) = self.store.device_online(&device).await {
                error!(target: "gb28181::sip", error = %e, "Failed to mark device online");
            }
            self.arm_liveness(&device_id).await;
            self.publish(StatusEvent::new(device_id.clone(), DeviceStatus::Online));

            let controller = self.controller.clone();
            let id = device_id.clone();
            tokio::spawn(async move {
                if let Err(e) = controller.query_device_info(&id).await {
                    warn!(target: "gb28181::sip", device_id = %id, error = %e, "DeviceInfo query failed");
                }
            });

            info!(target: "gb28181::sip", expires, "Device registered");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn challenge(
        &self,
        device_id: &str,
        source: SocketAddr,
        sink: &dyn ReplySink,
    ) -> Result<()> {
        let nonce = make_nonce(device_id, source);
        let www_authenticate = format!(
            "Digest realm=\"{}\", nonce=\"{}\", algorithm=MD5, qop=\"auth\"",
            self.config.sip_domain, nonce
        );
        sink.reply(Reply::Challenge { www_authenticate }).await?;

        info!(target: "gb28181::sip", "Sent 401 Unauthorized for REGISTER");
        Ok(())
    }

    async fn unregister(&self, device_id: &str, sink: &dyn ReplySink) -> Result<()> {
        sink.reply(Reply::Registered { expires: 0 }).await?;

        if let Err(e) = self.store.device_offline(device_id).await {
            error!(target: "gb28181::sip", error = %e, "Failed to mark device offline");
        }
        self.liveness.cancel(device_id).await;
        self.publish(StatusEvent::new(device_id, DeviceStatus::Offline));

        info!(target: "gb28181::sip", "Device unregistered");
        Ok(())
    }

    /// 处理 Notify:Keepalive
    pub async fn on_keepalive(&self, req: &SipRequest, sink: &dyn ReplySink) -> Result<()> {
        // 结构不规范的心跳仍按单字段提取处理，避免误判离线
        let (body_id, status) = match decode::<Keepalive>(&req.body) {
            Ok(keepalive) => (keepalive.device_id, keepalive.status),
            Err(e) => {
                debug!(target: "gb28181::sip", error = %e, "Keepalive decode failed, extracting fields");
                (
                    extract_field(&req.body, "DeviceID").unwrap_or_default(),
                    extract_field(&req.body, "Status").unwrap_or_default(),
                )
            }
        };

        let Some(device_id) = req
            .from_user()
            .map(str::to_string)
            .or_else(|| non_empty(&body_id))
        else {
            return sink
                .reply(Reply::BadRequest("missing device ID".to_string()))
                .await;
        };

        let span = info_span!("gb28181.sip.keepalive", %device_id, %status);
        async {
            match self.store.get_device_by_id(&device_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(target: "gb28181::sip", "Keepalive from unknown device");
                    return sink
                        .reply(Reply::NotFound(format!("device {} not found", device_id)))
                        .await;
                }
                Err(e) => {
                    error!(target: "gb28181::sip", error = %e, "Failed to load device");
                    return sink.reply(Reply::Ok).await;
                }
            }

            if let Err(e) = self.store.device_keepalive(&device_id).await {
                debug!(target: "gb28181::sip", error = %e, "Failed to update keepalive time");
            }
            self.arm_liveness(&device_id).await;

            debug!(target: "gb28181::sip", "Keepalive received from device");
            sink.reply(Reply::Ok).await
        }
        .instrument(span)
        .await
    }

    /// 处理 Response:Catalog
    pub async fn on_catalog(&self, req: &SipRequest, sink: &dyn ReplySink) -> Result<()> {
        let result = self.sync_catalog(req).await;
        // 无论解析是否成功都确认收到
        sink.reply(Reply::Ok).await?;
        result
    }

    async fn sync_catalog(&self, req: &SipRequest) -> Result<()> {
        let catalog: CatalogResponse = match decode_with_fallback(&req.body) {
            Ok(catalog) => catalog,
            Err(e) => {
                error!(target: "gb28181::sip", error = %e, "Failed to decode catalog response");
                return Ok(());
            }
        };

        let Some(device_id) = answer_device_id(&catalog.device_id, req) else {
            warn!(target: "gb28181::sip", "Catalog response without device ID");
            return Ok(());
        };

        let span = info_span!(
            "gb28181.sip.catalog_response",
            %device_id,
            sn = catalog.sn.unwrap_or(0),
            sum_num = catalog.sum_num.unwrap_or(0)
        );
        async {
            let announced = catalog.sum_num;
            let channels: Vec<Channel> = catalog
                .into_items()
                .into_iter()
                .map(|item| Channel::from_catalog_item(&device_id, item))
                .collect();

            info!(
                target: "gb28181::sip",
                channels = channels.len(),
                "Received catalog from device",
            );

            if let Err(e) = self
                .store
                .sync_channels(&device_id, channels, announced)
                .await
            {
                error!(target: "gb28181::sip", error = %e, "Failed to sync channels");
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// 处理 Response:DeviceInfo
    pub async fn on_device_info(&self, req: &SipRequest, sink: &dyn ReplySink) -> Result<()> {
        let resp: DeviceInfoResponse = match decode(&req.body) {
            Ok(resp) => resp,
            Err(e) => {
                error!(target: "gb28181::sip", error = %e, "Failed to decode DeviceInfo response");
                return Ok(());
            }
        };
        let Some(device_id) = answer_device_id(&resp.device_id, req) else {
            warn!(target: "gb28181::sip", "DeviceInfo response without device ID");
            return Ok(());
        };

        let span = info_span!(
            "gb28181.sip.device_info_response",
            %device_id,
            device_name = %resp.device_name,
            manufacturer = %resp.manufacturer,
            model = %resp.model,
            firmware = %resp.firmware
        );
        async {
            sink.reply(Reply::Ok).await?;

            let key = QueryClass::DeviceInfo.key(&device_id);
            if !is_ok(&resp.result) {
                error!(target: "gb28181::sip", result = %resp.result, "DeviceInfo query failed on device");
                self.correlations.fail(&key, format!("Result={}", resp.result));
                return Ok(());
            }

            let mut info = DeviceInfo::from(&resp);
            info.device_id = device_id.clone();
            if let Err(e) = self.store.update_device_info(&info).await {
                error!(target: "gb28181::sip", error = %e, "Failed to update device info");
            }

            self.correlations
                .resolve_if_present(&key, QueryAnswer::DeviceInfo(resp.clone()));
            info!(target: "gb28181::sip", "Updated device info");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// 处理 Response:DeviceStatus
    pub async fn on_device_status(&self, req: &SipRequest, sink: &dyn ReplySink) -> Result<()> {
        let resp: DeviceStatusResponse = match decode(&req.body) {
            Ok(resp) => resp,
            Err(e) => {
                error!(target: "gb28181::sip", error = %e, "Failed to decode DeviceStatus response");
                return Ok(());
            }
        };
        let Some(device_id) = answer_device_id(&resp.device_id, req) else {
            warn!(target: "gb28181::sip", "DeviceStatus response without device ID");
            return Ok(());
        };

        let span = info_span!(
            "gb28181.sip.device_status_response",
            %device_id,
            online = %resp.online,
            result = %resp.result
        );
        async {
            sink.reply(Reply::Ok).await?;

            let key = QueryClass::DeviceStatus.key(&device_id);
            let delivered = if !resp.result.is_empty() && !is_ok(&resp.result) {
                self.correlations
                    .fail(&key, format!("Result={}", resp.result))
            } else {
                self.correlations
                    .resolve_if_present(&key, QueryAnswer::DeviceStatus(resp.clone()))
            };

            debug!(target: "gb28181::sip", delivered, "DeviceStatus response received");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// 处理 Response:ConfigDownload
    pub async fn on_config_download(&self, req: &SipRequest, sink: &dyn ReplySink) -> Result<()> {
        let result = self.apply_config_download(req).await;
        sink.reply(Reply::Ok).await?;
        result
    }

    async fn apply_config_download(&self, req: &SipRequest) -> Result<()> {
        let resp: ConfigDownloadResponse = match decode_with_fallback(&req.body) {
            Ok(resp) => resp,
            Err(e) => {
                error!(target: "gb28181::sip", error = %e, "Failed to decode ConfigDownload response");
                return Ok(());
            }
        };
        let Some(device_id) = answer_device_id(&resp.device_id, req) else {
            warn!(target: "gb28181::sip", "ConfigDownload response without device ID");
            return Ok(());
        };

        let key = QueryClass::DeviceConfig.key(&device_id);
        if !is_ok(&resp.result) {
            warn!(target: "gb28181::sip", %device_id, result = %resp.result, "ConfigDownload failed on device");
            self.correlations.fail(&key, format!("Result={}", resp.result));
            return Ok(());
        }

        if let Some(param) = &resp.basic_param {
            let config = BasicConfig::from(param);
            if let Err(e) = self
                .store
                .update_device_basic_config(&device_id, &config)
                .await
            {
                error!(target: "gb28181::sip", %device_id, error = %e, "Failed to update basic config");
            }
        }

        let delivered = self
            .correlations
            .resolve_if_present(&key, QueryAnswer::DeviceConfig(resp));
        debug!(target: "gb28181::sip", %device_id, delivered, "ConfigDownload response received");
        Ok(())
    }

    /// 处理 Response:DeviceConfig（配置修改结果）
    pub async fn on_device_config_response(
        &self,
        req: &SipRequest,
        sink: &dyn ReplySink,
    ) -> Result<()> {
        self.log_result(req, "DeviceConfig");
        sink.reply(Reply::Ok).await
    }

    /// 处理 Response:Alarm / Response:MobilePosition（订阅结果）
    pub async fn on_subscription_response(
        &self,
        req: &SipRequest,
        subscription: &str,
        sink: &dyn ReplySink,
    ) -> Result<()> {
        self.log_result(req, subscription);
        sink.reply(Reply::Ok).await
    }

    fn log_result(&self, req: &SipRequest, command: &str) {
        let device_id = req.from_user().unwrap_or_default();
        match extract_field(&req.body, "Result") {
            None => error!(target: "gb28181::sip", %device_id, command, "Response without Result field"),
            Some(result) if is_ok(&result) => {
                debug!(target: "gb28181::sip", %device_id, command, "Device accepted request")
            }
            Some(result) => {
                error!(target: "gb28181::sip", %device_id, command, %result, "Device rejected request")
            }
        }
    }

    /// 处理 Notify:Alarm
    pub async fn on_alarm_notify(&self, req: &SipRequest, sink: &dyn ReplySink) -> Result<()> {
        match decode_with_fallback::<AlarmNotify>(&req.body) {
            Ok(alarm) => info!(
                target: "gb28181::sip",
                device_id = %alarm.device_id,
                priority = %alarm.alarm_priority,
                method = %alarm.alarm_method,
                time = %alarm.alarm_time,
                description = %alarm.alarm_description,
                "Alarm received"
            ),
            Err(e) => warn!(target: "gb28181::sip", error = %e, "Failed to decode alarm notify"),
        }
        sink.reply(Reply::Ok).await
    }

    /// 处理 Notify:MobilePosition
    pub async fn on_mobile_position_notify(
        &self,
        req: &SipRequest,
        sink: &dyn ReplySink,
    ) -> Result<()> {
        match decode_with_fallback::<MobilePositionNotify>(&req.body) {
            Ok(pos) => debug!(
                target: "gb28181::sip",
                device_id = %pos.device_id,
                longitude = pos.longitude.unwrap_or_default(),
                latitude = pos.latitude.unwrap_or_default(),
                "Mobile position received"
            ),
            Err(e) => warn!(target: "gb28181::sip", error = %e, "Failed to decode mobile position"),
        }
        sink.reply(Reply::Ok).await
    }

    /// 停止所有存活定时器
    pub async fn shutdown(&self) {
        self.liveness.shutdown().await;
    }

    /// 推迟存活定时器，不存在时新建
    async fn arm_liveness(&self, device_id: &str) {
        match self.liveness.reset(device_id).await {
            Ok(()) => {}
            Err(Gb28181Error::TimerNotFound(_)) => {
                match self
                    .liveness
                    .start(device_id, self.config.keepalive_timeout(), self.expire_callback())
                    .await
                {
                    // 并发心跳已经建好
                    Ok(()) | Err(Gb28181Error::AlreadyRunning(_)) => {}
                    Err(e) => {
                        error!(target: "gb28181::sip", %device_id, error = %e, "Failed to start liveness timer")
                    }
                }
            }
            Err(e) => {
                error!(target: "gb28181::sip", %device_id, error = %e, "Failed to reset liveness timer")
            }
        }
    }

    fn expire_callback(&self) -> ExpireCallback {
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        Box::new(move |device_id| {
            async move {
                if let Err(e) = store.device_offline(&device_id).await {
                    error!(target: "gb28181::sip", %device_id, error = %e, "Failed to mark device offline");
                }
                let event = StatusEvent::new(device_id, DeviceStatus::Offline);
                deliver(notifier.as_ref(), &event).await;
            }
            .boxed()
        })
    }

    fn publish(&self, event: StatusEvent) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            deliver(notifier.as_ref(), &event).await;
        });
    }
}

async fn deliver(notifier: &dyn StatusNotifier, event: &StatusEvent) {
    if let Err(e) = notifier.notify(event).await {
        warn!(
            target: "gb28181::sip",
            device_id = %event.device_id,
            notifier = notifier.name(),
            error = %e,
            "Status notification failed"
        );
    }
}

fn is_ok(result: &str) -> bool {
    result.trim().eq_ignore_ascii_case(RESULT_OK)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// 应答中的设备 ID：优先消息体，其次 From
fn answer_device_id(body_id: &str, req: &SipRequest) -> Option<String> {
    non_empty(body_id).or_else(|| req.from_user().map(str::to_string))
}

/// 注册挑战用的随机 nonce
fn make_nonce(device_id: &str, source: SocketAddr) -> String {
    let salt: u64 = rand::thread_rng().gen();
    let source = format!(
        "{}:{}:{}:{}",
        device_id,
        source,
        chrono::Utc::now().timestamp_millis(),
        salt
    );
    format!("{:x}", md5::compute(source))
}
