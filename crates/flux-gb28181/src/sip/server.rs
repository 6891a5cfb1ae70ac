// GB28181 SIP 服务器
// UDP 收发：REGISTER 交给生命周期处理，MESSAGE 交给路由

use super::message::{SipMessage, SipMethod, SipRequest, SipResponse};
use crate::cache::Cache;
use crate::config::SipServerConfig;
use crate::control::{DeviceController, Outbound, OutboundRequest};
use crate::device::Device;
use crate::lifecycle::{DeviceLifecycle, Reply, ReplySink};
use crate::notify::StatusNotifier;
use crate::router::MessageRouter;
use crate::store::DeviceStore;
use crate::{Gb28181Error, Result};
use async_trait::async_trait;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, info_span, warn, Instrument};

const MAX_DATAGRAM: usize = 65536;

/// GB28181 SIP 服务器
pub struct SipServer {
    config: SipServerConfig,
    socket: Arc<UdpSocket>,
    lifecycle: Arc<DeviceLifecycle>,
    router: MessageRouter,
}

impl SipServer {
    /// 绑定 UDP 端口并组装处理器
    pub async fn bind(
        config: SipServerConfig,
        store: Arc<dyn DeviceStore>,
        cache: Arc<dyn Cache>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(&config.bind_addr).await.map_err(|e| {
            Gb28181Error::Sip(format!("Failed to bind UDP socket {}: {}", config.bind_addr, e))
        })?;
        let socket = Arc::new(socket);

        info!(
            target: "gb28181::sip",
            "GB28181 SIP server listening on {}",
            socket.local_addr()?
        );

        let outbound = Arc::new(UdpOutbound::new(socket.clone(), config.clone()));
        let lifecycle = Arc::new(DeviceLifecycle::new(
            config.clone(),
            store,
            cache,
            outbound,
            notifier,
        ));
        let router = MessageRouter::new(lifecycle.clone());

        Ok(Arc::new(Self {
            config,
            socket,
            lifecycle,
            router,
        }))
    }

    /// 主接收循环，每个数据报一个任务
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(target: "gb28181::sip", "GB28181 SIP server started");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    let data = buf[..len].to_vec();
                    let server = self.clone();

                    tokio::spawn(async move {
                        if let Err(e) = server.handle_datagram(data, addr).await {
                            error!(target: "gb28181::sip", "Failed to handle message from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!(target: "gb28181::sip", "Failed to receive UDP packet: {}", e);
                }
            }
        }
    }

    async fn handle_datagram(&self, data: Vec<u8>, addr: SocketAddr) -> Result<()> {
        let span = info_span!(
            "gb28181.sip.handle_message",
            remote = %addr,
            bytes = data.len()
        );

        async {
            match SipMessage::from_bytes(&data)? {
                SipMessage::Request(req) => self.handle_request(req, addr).await,
                SipMessage::Response(resp) => {
                    debug!(
                        target: "gb28181::sip",
                        status = resp.status_code,
                        reason = %resp.reason_phrase,
                        cseq = resp.header("CSeq").unwrap_or_default(),
                        "Received SIP response"
                    );
                    Ok(())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_request(&self, req: SipRequest, addr: SocketAddr) -> Result<()> {
        let sink = UdpReply {
            socket: &self.socket,
            addr,
            request: &req,
            user_agent: &self.config.user_agent,
        };

        match req.method {
            SipMethod::Register => self.lifecycle.on_register(&req, addr, &sink).await,
            SipMethod::Message => self.router.route(&req, &sink).await,
            SipMethod::Ack => Ok(()),
            other => {
                warn!(target: "gb28181::sip", method = %other, "Unsupported SIP method");
                sink.send(SipResponse::for_request(&req, 405, "Method Not Allowed"))
                    .await
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &SipServerConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<DeviceLifecycle> {
        &self.lifecycle
    }

    pub fn controller(&self) -> &Arc<DeviceController> {
        self.lifecycle.controller()
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        self.lifecycle.store()
    }

    /// 停止存活定时器
    pub async fn shutdown(&self) {
        self.lifecycle.shutdown().await;
        info!(target: "gb28181::sip", "GB28181 SIP server stopped");
    }
}

/// 对一个请求的 UDP 应答
struct UdpReply<'a> {
    socket: &'a UdpSocket,
    addr: SocketAddr,
    request: &'a SipRequest,
    user_agent: &'a str,
}

impl UdpReply<'_> {
    async fn send(&self, mut response: SipResponse) -> Result<()> {
        response.add_header("User-Agent", self.user_agent);
        self.socket.send_to(&response.to_bytes(), self.addr).await?;

        debug!(
            target: "gb28181::sip",
            "Sent SIP response to {}: {} {}",
            self.addr,
            response.status_code,
            response.reason_phrase
        );
        Ok(())
    }
}

#[async_trait]
impl<'a> ReplySink for UdpReply<'a> {
    async fn reply(&self, reply: Reply) -> Result<()> {
        let response = match reply {
            Reply::Ok => SipResponse::for_request(self.request, 200, "OK"),
            Reply::Registered { expires } => {
                let mut resp = SipResponse::for_request(self.request, 200, "OK");
                resp.add_header("Expires", expires.to_string());
                resp.add_header(
                    "Date",
                    chrono::Local::now()
                        .format("%Y-%m-%dT%H:%M:%S%.3f")
                        .to_string(),
                );
                resp
            }
            Reply::Challenge { www_authenticate } => {
                let mut resp = SipResponse::for_request(self.request, 401, "Unauthorized");
                resp.add_header("WWW-Authenticate", www_authenticate);
                resp
            }
            Reply::NotFound(reason) => SipResponse::for_request(self.request, 404, reason),
            Reply::BadRequest(reason) => {
                debug!(target: "gb28181::sip", %reason, "Rejecting request");
                SipResponse::for_request(self.request, 400, "Bad Request")
            }
        };
        self.send(response).await
    }
}

/// 出站请求：MESSAGE / SUBSCRIBE
pub struct UdpOutbound {
    socket: Arc<UdpSocket>,
    config: SipServerConfig,
}

impl UdpOutbound {
    pub fn new(socket: Arc<UdpSocket>, config: SipServerConfig) -> Self {
        Self { socket, config }
    }

    fn build(&self, device: &Device, request: &OutboundRequest) -> Result<SipRequest> {
        let local_port = self.socket.local_addr()?.port();
        let host = self.config.local_host();
        let tag: u32 = rand::thread_rng().gen();
        let call_id: u64 = rand::thread_rng().gen();

        let mut req = SipRequest::new(
            request.method,
            format!("sip:{}@{}", request.target_id, device.sip_addr()),
        );
        req.add_header(
            "Via",
            format!(
                "SIP/2.0/UDP {}:{};rport;branch=z9hG4bK{}{}",
                host, local_port, request.sn, request.cseq
            ),
        );
        req.add_header(
            "From",
            format!(
                "<sip:{}@{}>;tag={}",
                self.config.sip_id, self.config.sip_domain, tag
            ),
        );
        req.add_header(
            "To",
            format!("<sip:{}@{}>", request.target_id, self.config.sip_domain),
        );
        req.add_header("Call-ID", format!("{:x}@{}", call_id, host));
        req.add_header("CSeq", format!("{} {}", request.cseq, request.method));
        req.add_header("Content-Type", "Application/MANSCDP+xml");
        req.add_header("Max-Forwards", "70");
        req.add_header("User-Agent", self.config.user_agent.clone());

        if let Some(expires) = request.subscription_expires {
            req.add_header("Event", "presence");
            req.add_header("Expires", expires.to_string());
            req.add_header(
                "Contact",
                format!("<sip:{}@{}:{}>", self.config.sip_id, host, local_port),
            );
        }

        req.set_body(request.body.clone());
        Ok(req)
    }
}

#[async_trait]
impl Outbound for UdpOutbound {
    async fn send(&self, device: &Device, request: OutboundRequest) -> Result<()> {
        let addr: SocketAddr = device
            .sip_addr()
            .parse()
            .map_err(|e| Gb28181Error::Sip(format!("Invalid address {}: {}", device.sip_addr(), e)))?;

        let req = self.build(device, &request)?;
        self.socket.send_to(&req.to_bytes(), addr).await?;

        debug!(
            target: "gb28181::sip",
            device_id = %device.device_id,
            method = %request.method,
            cseq = request.cseq,
            sn = request.sn,
            "Sent SIP request"
        );
        Ok(())
    }
}
