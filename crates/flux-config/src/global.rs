use serde::{Deserialize, Serialize};

/// 全局配置
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    pub system: SystemConfig,
    pub logging: LoggingConfig,
}

/// 系统配置
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    pub version: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "FLUX GB28181 Platform".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 默认日志级别，`RUST_LOG` 优先
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub const LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    pub fn is_valid_level(&self) -> bool {
        Self::LEVELS
            .iter()
            .any(|level| level.eq_ignore_ascii_case(self.level.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_global_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.system.name, "FLUX GB28181 Platform");
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.is_valid_level());
    }

    #[test]
    fn test_log_level() {
        let mut logging = LoggingConfig::default();
        logging.level = "DEBUG".to_string();
        assert!(logging.is_valid_level());

        logging.level = "verbose".to_string();
        assert!(!logging.is_valid_level());
    }
}
