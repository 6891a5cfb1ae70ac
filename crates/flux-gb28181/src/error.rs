use thiserror::Error;

#[derive(Error, Debug)]
pub enum Gb28181Error {
    /// 消息体在两种编码下都无法解析
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// 同一命令类 + 设备已有未完成的查询
    #[error("Duplicate pending query: {0}")]
    DuplicateKey(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// 等待方被显式失败
    #[error("Query failed: {0}")]
    Failed(String),

    #[error("Liveness timer already running: {0}")]
    AlreadyRunning(String),

    #[error("Liveness timer not found: {0}")]
    TimerNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SIP error: {0}")]
    Sip(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Notify error: {0}")]
    Notify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Gb28181Error>;
