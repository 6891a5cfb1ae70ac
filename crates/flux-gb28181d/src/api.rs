// 设备管理 HTTP API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use flux_gb28181::manscdp::BasicParams;
use flux_gb28181::{BasicConfig, DeviceController, DeviceStore, Gb28181Error};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

type ApiResult<T = Json<Value>> = std::result::Result<T, StatusCode>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DeviceStore>,
    pub controller: Arc<DeviceController>,
}

#[derive(Debug, Deserialize)]
struct PtzRequest {
    channel_id: String,
    /// 8 字节 PTZ 指令的十六进制表示
    command: String,
}

#[derive(Debug, Deserialize)]
struct BasicParamsRequest {
    name: String,
    expiration: u32,
    heartbeat_interval: u32,
    heartbeat_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SubscribeRequest {
    Alarm,
    MobilePosition {
        #[serde(default = "default_position_interval")]
        interval: u32,
    },
}

fn default_position_interval() -> u32 {
    5
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/gb28181/devices", get(list_devices))
        .route("/api/v1/gb28181/devices/:device_id", get(get_device))
        .route(
            "/api/v1/gb28181/devices/:device_id/channels",
            get(list_device_channels),
        )
        .route(
            "/api/v1/gb28181/devices/:device_id/catalog",
            post(query_catalog),
        )
        .route(
            "/api/v1/gb28181/devices/:device_id/status",
            get(query_device_status),
        )
        .route(
            "/api/v1/gb28181/devices/:device_id/config",
            get(query_device_config).put(configure_basic_params),
        )
        .route("/api/v1/gb28181/devices/:device_id/ptz", post(ptz_control))
        .route("/api/v1/gb28181/devices/:device_id/reboot", post(reboot))
        .route(
            "/api/v1/gb28181/devices/:device_id/subscriptions",
            post(subscribe),
        )
        .with_state(state)
}

fn map_error_to_status(device_id: &str, e: Gb28181Error) -> StatusCode {
    let status = match &e {
        Gb28181Error::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        Gb28181Error::DuplicateKey(_) => StatusCode::CONFLICT,
        Gb28181Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Gb28181Error::Failed(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(target: "gb28181d", %device_id, status = status.as_u16(), "request failed: {}", e);
    status
}

async fn list_devices(State(state): State<AppState>) -> ApiResult {
    let devices = state
        .store
        .list_devices()
        .await
        .map_err(|e| map_error_to_status("*", e))?;

    Ok(Json(json!({ "devices": devices })))
}

async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult {
    let Some(device) = state
        .store
        .get_device_by_id(&device_id)
        .await
        .map_err(|e| map_error_to_status(&device_id, e))?
    else {
        return Err(StatusCode::NOT_FOUND);
    };

    Ok(Json(json!({ "device": device })))
}

async fn list_device_channels(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult {
    let known = state
        .store
        .get_device_by_id(&device_id)
        .await
        .map_err(|e| map_error_to_status(&device_id, e))?
        .is_some();
    if !known {
        return Err(StatusCode::NOT_FOUND);
    }

    let channels = state
        .store
        .list_channels(&device_id)
        .await
        .map_err(|e| map_error_to_status(&device_id, e))?;

    Ok(Json(json!({ "channels": channels })))
}

async fn query_catalog(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let sn = state
        .controller
        .query_catalog(&device_id)
        .await
        .map_err(|e| map_error_to_status(&device_id, e))?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "sent", "sn": sn }))))
}

async fn query_device_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult {
    let resp = state
        .controller
        .query_device_status(&device_id)
        .await
        .map_err(|e| map_error_to_status(&device_id, e))?;

    Ok(Json(json!({
        "device_id": device_id,
        "online": resp.is_online(),
        "result": resp.result,
        "status": resp.status,
        "encode": resp.encode,
        "record": resp.record,
        "device_time": resp.device_time,
    })))
}

async fn query_device_config(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult {
    let resp = state
        .controller
        .query_device_config(&device_id)
        .await
        .map_err(|e| map_error_to_status(&device_id, e))?;

    let basic = resp.basic_param.as_ref().map(BasicConfig::from);
    Ok(Json(json!({
        "device_id": device_id,
        "result": resp.result,
        "basic_param": basic,
    })))
}

async fn configure_basic_params(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<BasicParamsRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if req.heartbeat_interval == 0 || req.heartbeat_count == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let params = BasicParams {
        name: req.name,
        expiration: req.expiration,
        heartbeat_interval: req.heartbeat_interval,
        heartbeat_count: req.heartbeat_count,
    };
    state
        .controller
        .configure_basic_params(&device_id, params)
        .await
        .map_err(|e| map_error_to_status(&device_id, e))?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "sent" }))))
}

async fn ptz_control(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<PtzRequest>,
) -> ApiResult {
    if !is_ptz_command(&req.command) {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .controller
        .ptz_control(&device_id, &req.channel_id, &req.command.to_ascii_uppercase())
        .await
        .map_err(|e| map_error_to_status(&device_id, e))?;

    Ok(Json(json!({ "status": "ok" })))
}

async fn reboot(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult {
    state
        .controller
        .reboot(&device_id)
        .await
        .map_err(|e| map_error_to_status(&device_id, e))?;

    Ok(Json(json!({ "status": "ok" })))
}

async fn subscribe(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<SubscribeRequest>,
) -> ApiResult {
    let result = match req {
        SubscribeRequest::Alarm => state.controller.subscribe_alarm(&device_id).await,
        SubscribeRequest::MobilePosition { interval } => {
            state
                .controller
                .subscribe_mobile_position(&device_id, interval)
                .await
        }
    };
    result.map_err(|e| map_error_to_status(&device_id, e))?;

    Ok(Json(json!({ "status": "ok" })))
}

/// PTZCmd 固定 8 字节
fn is_ptz_command(command: &str) -> bool {
    command.len() == 16 && command.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use flux_gb28181::manscdp::{decode, extract_command_type, DeviceStatusResponse, QueryAnswer};
    use flux_gb28181::{
        CorrelationRegistry, Device, MemoryCache, MemoryDeviceStore, Outbound, OutboundRequest,
        QueryClass, Result,
    };
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    const DEVICE: &str = "34020000001320000001";

    /// 记录下发请求；收到 DeviceStatus 查询时立即应答
    struct FakeDevice {
        correlations: Arc<CorrelationRegistry<QueryAnswer>>,
        answer_status: bool,
        sent: Mutex<Vec<OutboundRequest>>,
    }

    #[async_trait]
    impl Outbound for FakeDevice {
        async fn send(&self, device: &Device, request: OutboundRequest) -> Result<()> {
            let key = extract_command_type(&request.body);
            if self.answer_status && key.to_string() == "Query:DeviceStatus" {
                let xml = format!(
                    "<Response><CmdType>DeviceStatus</CmdType><SN>{}</SN><DeviceID>{}</DeviceID><Result>OK</Result><Online>ONLINE</Online><Status>OK</Status></Response>",
                    request.sn, device.device_id
                );
                let resp: DeviceStatusResponse = decode(xml.as_bytes())?;
                self.correlations.resolve_if_present(
                    &QueryClass::DeviceStatus.key(&device.device_id),
                    QueryAnswer::DeviceStatus(resp),
                );
            }
            self.sent.lock().await.push(request);
            Ok(())
        }
    }

    struct TestApp {
        app: Router,
        store: Arc<MemoryDeviceStore>,
        correlations: Arc<CorrelationRegistry<QueryAnswer>>,
        device: Arc<FakeDevice>,
    }

    fn test_app(answer_status: bool) -> TestApp {
        let store = Arc::new(MemoryDeviceStore::new());
        let correlations = Arc::new(CorrelationRegistry::new());
        let device = Arc::new(FakeDevice {
            correlations: correlations.clone(),
            answer_status,
            sent: Mutex::new(Vec::new()),
        });
        let controller = Arc::new(DeviceController::new(
            store.clone(),
            Arc::new(MemoryCache::new()),
            device.clone(),
            correlations.clone(),
            Duration::from_millis(50),
        ));

        let app = router(AppState {
            store: store.clone(),
            controller,
        });
        TestApp {
            app,
            store,
            correlations,
            device,
        }
    }

    async fn register_device(store: &MemoryDeviceStore) {
        store
            .device_online(&Device::new(DEVICE, "192.168.1.100", 5060))
            .await
            .unwrap();
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let t = test_app(false);
        let resp = t.app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_and_get_devices() {
        let t = test_app(false);
        register_device(&t.store).await;

        let resp = t
            .app
            .clone()
            .oneshot(get("/api/v1/gb28181/devices"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = json_body(resp).await;
        assert_eq!(v["devices"][0]["device_id"], DEVICE);
        assert_eq!(v["devices"][0]["status"], "online");

        let resp = t
            .app
            .clone()
            .oneshot(get(&format!("/api/v1/gb28181/devices/{}", DEVICE)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = t
            .app
            .oneshot(get("/api/v1/gb28181/devices/34020000001320000099"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_channels_of_unknown_device() {
        let t = test_app(false);
        let resp = t
            .app
            .oneshot(get(&format!("/api/v1/gb28181/devices/{}/channels", DEVICE)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_query_catalog_accepted() {
        let t = test_app(false);
        register_device(&t.store).await;

        let resp = t
            .app
            .oneshot(post_json(
                &format!("/api/v1/gb28181/devices/{}/catalog", DEVICE),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(json_body(resp).await["sn"].as_u64().unwrap() > 0);

        let sent = t.device.sent.lock().await;
        assert_eq!(extract_command_type(&sent[0].body).to_string(), "Query:Catalog");
    }

    #[tokio::test]
    async fn test_device_status_answered() {
        let t = test_app(true);
        register_device(&t.store).await;

        let resp = t
            .app
            .oneshot(get(&format!("/api/v1/gb28181/devices/{}/status", DEVICE)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = json_body(resp).await;
        assert_eq!(v["online"], true);
        assert_eq!(v["result"], "OK");
        assert_eq!(t.correlations.pending(), 0);
    }

    #[tokio::test]
    async fn test_device_status_error_mapping() {
        let t = test_app(false);
        let uri = format!("/api/v1/gb28181/devices/{}/status", DEVICE);

        // 未注册设备
        let resp = t.app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        register_device(&t.store).await;

        // 设备不应答
        let resp = t.app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);

        // 已有同类查询未完成
        let _pending = t
            .correlations
            .register(QueryClass::DeviceStatus.key(DEVICE))
            .unwrap();
        let resp = t.app.oneshot(get(&uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_ptz_command_validation() {
        let t = test_app(false);
        register_device(&t.store).await;
        let uri = format!("/api/v1/gb28181/devices/{}/ptz", DEVICE);

        let resp = t
            .app
            .clone()
            .oneshot(post_json(
                &uri,
                json!({ "channel_id": "34020000001310000001", "command": "zoom" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = t
            .app
            .oneshot(post_json(
                &uri,
                json!({ "channel_id": "34020000001310000001", "command": "a50f010800fa0000" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let sent = t.device.sent.lock().await;
        assert_eq!(sent[0].target_id, "34020000001310000001");
        assert!(String::from_utf8_lossy(&sent[0].body).contains("A50F010800FA0000"));
    }

    #[tokio::test]
    async fn test_subscribe_mobile_position() {
        let t = test_app(false);
        register_device(&t.store).await;

        let resp = t
            .app
            .oneshot(post_json(
                &format!("/api/v1/gb28181/devices/{}/subscriptions", DEVICE),
                json!({ "kind": "mobile_position", "interval": 10 }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let sent = t.device.sent.lock().await;
        assert_eq!(
            extract_command_type(&sent[0].body).to_string(),
            "Query:MobilePosition"
        );
        assert_eq!(sent[0].subscription_expires, Some(3600));
    }

    #[tokio::test]
    async fn test_configure_basic_params() {
        let t = test_app(false);
        register_device(&t.store).await;

        let req = Request::builder()
            .uri(format!("/api/v1/gb28181/devices/{}/config", DEVICE))
            .method("PUT")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "name": "IPC",
                    "expiration": 3600,
                    "heartbeat_interval": 60,
                    "heartbeat_count": 3
                })
                .to_string(),
            ))
            .unwrap();
        let resp = t.app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let sent = t.device.sent.lock().await;
        assert_eq!(
            extract_command_type(&sent[0].body).to_string(),
            "Control:DeviceConfig"
        );
    }
}
