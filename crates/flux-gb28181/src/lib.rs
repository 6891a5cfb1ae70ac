// GB28181 信令服务
//
// 设备注册、心跳保活、MANSCDP 查询应答关联与设备控制。

pub mod cache;
pub mod config;
pub mod control;
pub mod correlation;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod liveness;
pub mod manscdp;
pub mod notify;
pub mod router;
pub mod sip;
pub mod store;

pub use cache::{Cache, MemoryCache};
pub use config::SipServerConfig;
pub use control::{DeviceController, Outbound, OutboundRequest};
pub use correlation::{CorrelationRegistry, QueryClass, Waiter};
pub use device::{BasicConfig, Channel, Device, DeviceInfo, DeviceStatus};
pub use error::{Gb28181Error, Result};
pub use lifecycle::{DeviceLifecycle, Reply, ReplySink};
pub use liveness::{ExpireCallback, LivenessScheduler};
pub use notify::{NoopNotifier, StatusEvent, StatusNotifier, WebhookNotifier};
pub use router::{Command, MessageRouter};
pub use sip::SipServer;
pub use store::{DeviceStore, MemoryDeviceStore};
