use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{GlobalConfig, ProtocolConfig};

/// 配置加载器
///
/// 目录结构：
/// - `global.toml`
/// - `protocols/{name}.toml`
///
/// 文件不存在时使用默认值；协议配置可被 `{NAME}__` 前缀的环境变量覆盖，
/// 例如 `GB28181__SERVER__BIND_ADDR`。
pub struct ConfigLoader {
    config_dir: PathBuf,
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            env: None,
        }
    }

    /// 使用给定变量代替进程环境
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// 加载全局配置
    pub fn load_global(&self) -> Result<GlobalConfig> {
        let config_path = self.config_dir.join("global.toml");

        let config = Config::builder()
            .add_source(toml_file(&config_path)?)
            .build()
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Ok(config.try_deserialize()?)
    }

    /// 加载协议配置
    pub fn load_protocol<T>(&self, protocol_name: &str) -> Result<ProtocolConfig<T>>
    where
        T: DeserializeOwned + Default,
    {
        let config_path = self
            .config_dir
            .join("protocols")
            .join(format!("{}.toml", protocol_name));

        let env = Environment::with_prefix(&protocol_name.to_uppercase())
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(self.env.clone());

        let config = Config::builder()
            .add_source(toml_file(&config_path)?)
            .add_source(env)
            .build()
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        config
            .try_deserialize()
            .with_context(|| format!("Invalid protocol config: {}", protocol_name))
    }

    /// 验证全局配置
    pub fn validate(&self) -> Result<()> {
        let global = self.load_global()?;

        if global.system.name.trim().is_empty() {
            return Err(anyhow!("system.name must not be empty"));
        }

        if !global.logging.is_valid_level() {
            return Err(anyhow!(
                "logging.level must be one of {:?}, got {}",
                crate::LoggingConfig::LEVELS,
                global.logging.level
            ));
        }

        Ok(())
    }
}

fn toml_file(path: &Path) -> Result<File<config::FileSourceFile, FileFormat>> {
    let path = path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?;
    Ok(File::new(path, FileFormat::Toml).required(false))
}
