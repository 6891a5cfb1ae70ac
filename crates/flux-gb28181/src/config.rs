// SIP 服务器配置

use crate::{Gb28181Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// SIP 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SipServerConfig {
    /// 监听地址
    pub bind_addr: String,

    /// SIP 域（同时作为 Digest realm）
    pub sip_domain: String,

    /// SIP ID（平台 ID）
    pub sip_id: String,

    /// 心跳超时（秒），超过未收到心跳判定离线
    pub keepalive_timeout_secs: u64,

    /// 同步查询等待应答的超时（秒）
    pub query_timeout_secs: u64,

    pub user_agent: String,
}

impl Default for SipServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5060".to_string(),
            sip_domain: "3402000000".to_string(),
            sip_id: "34020000002000000001".to_string(),
            // 国标默认心跳 60 秒，3 次未收到判定离线
            keepalive_timeout_secs: 180,
            query_timeout_secs: 10,
            user_agent: "flux-gb28181".to_string(),
        }
    }
}

impl SipServerConfig {
    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// 校验配置：监听地址可解析，超时不为 0
    pub fn validate(&self) -> Result<()> {
        self.bind_addr.parse::<SocketAddr>().map_err(|e| {
            Gb28181Error::Config(format!("invalid bind_addr {}: {}", self.bind_addr, e))
        })?;
        if self.sip_domain.is_empty() {
            return Err(Gb28181Error::Config("sip_domain must not be empty".to_string()));
        }
        if self.keepalive_timeout_secs == 0 {
            return Err(Gb28181Error::Config(
                "keepalive_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.query_timeout_secs == 0 {
            return Err(Gb28181Error::Config(
                "query_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// 监听地址中的主机部分
    pub fn local_host(&self) -> &str {
        self.bind_addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(self.bind_addr.as_str())
    }
}
