pub mod message;
pub mod server;

pub use message::{sip_user, SipMessage, SipMethod, SipRequest, SipResponse};
pub use server::{SipServer, UdpOutbound};
