pub mod global;
pub mod loader;
pub mod protocol;

pub use global::{GlobalConfig, LoggingConfig, SystemConfig};
pub use loader::ConfigLoader;
pub use protocol::{NotifyConfig, ProtocolConfig};
