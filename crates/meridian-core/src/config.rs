//! 引导配置：TOML 配置文件与命令行覆盖。
//!
//! # 教案定位（Why）
//! - `init` 需要的应用名、客户端号、队列容量、开机即提供的服务等都来自配置；
//!   配置文件描述部署，命令行只覆盖少量常改字段；
//! - 所有字段均有默认值，不给配置文件也能启动一个空的路由实例。
//!
//! # 格式（What）
//! ```toml
//! [application]
//! name = "navigation"
//! client_id = 0x0100
//!
//! [routing]
//! max_message_size = 1048576
//! inbound_queue = 1024
//! statistics_interval_ms = 30000
//!
//! [[routing.magic_cookies]]
//! service = 0x1234
//! instance = 0x0001
//!
//! [[services]]
//! service = 0x1234
//! instance = 0x0001
//! endpoint = "127.0.0.1:30509"
//! transport = "udp"
//!
//! [logging]
//! filter = "info"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use meridian_codec::{
    ClientId, DEFAULT_MAX_PAYLOAD, Endpoint, InstanceId, ServiceId, TransportKind,
};
use serde::Deserialize;

use crate::error::ConfigError;

const USAGE: &str = "用法: meridiand [--config router.toml] [--name <name>] [--client-id <hex|dec>] [--log <filter>]";

/// 完整的路由实例配置。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// 应用身份。
    pub application: ApplicationConfig,
    /// 路由参数。
    pub routing: RoutingConfig,
    /// 启动时即提供并启动的服务。
    pub services: Vec<ServiceConfig>,
    /// 日志过滤。
    pub logging: LoggingConfig,
}

/// `[application]` 段。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ApplicationConfig {
    /// 应用名，仅用于日志。
    pub name: String,
    /// 本地客户端号。
    pub client_id: u16,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "meridian".to_owned(),
            client_id: 0x0100,
        }
    }
}

/// `[routing]` 段。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingConfig {
    /// 单帧 payload 上限（字节）。
    pub max_message_size: usize,
    /// 入站事件队列容量。
    pub inbound_queue: usize,
    /// 对象池统计日志的输出周期，缺省不输出。
    pub statistics_interval_ms: Option<u64>,
    /// 启动时开启 Magic Cookie 的实例。
    pub magic_cookies: Vec<InstanceKey>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_PAYLOAD,
            inbound_queue: 1024,
            statistics_interval_ms: None,
            magic_cookies: Vec::new(),
        }
    }
}

/// `(服务, 实例)` 对。
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstanceKey {
    /// 服务号。
    pub service: u16,
    /// 实例号。
    pub instance: u16,
}

impl InstanceKey {
    /// 转为强类型标识。
    pub fn ids(&self) -> (ServiceId, InstanceId) {
        (ServiceId(self.service), InstanceId(self.instance))
    }
}

/// `[[services]]` 条目。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// 服务号。
    pub service: u16,
    /// 实例号。
    pub instance: u16,
    /// 本地监听地址。
    pub endpoint: SocketAddr,
    /// 传输类型，缺省 UDP。
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
}

fn default_transport() -> TransportKind {
    TransportKind::Udp
}

impl ServiceConfig {
    /// 服务号与实例号。
    pub fn ids(&self) -> (ServiceId, InstanceId) {
        (ServiceId(self.service), InstanceId(self.instance))
    }

    /// 本地端点。
    pub fn local_endpoint(&self) -> Endpoint {
        Endpoint::new(self.endpoint, self.transport)
    }
}

/// `[logging]` 段。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing-subscriber` 的 `EnvFilter` 表达式。
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
        }
    }
}

impl RouterConfig {
    /// 解析 TOML 文本并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 读取并解析配置文件。
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 本地客户端号。
    pub fn client_id(&self) -> ClientId {
        ClientId(self.application.client_id)
    }

    /// 校验取值范围。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routing.inbound_queue == 0 {
            return Err(ConfigError::Invalid {
                field: "routing.inbound_queue",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.routing.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                field: "routing.max_message_size",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.routing.statistics_interval_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "routing.statistics_interval_ms",
                reason: "must be greater than zero when set".to_owned(),
            });
        }
        if let Some(reserved) = self
            .services
            .iter()
            .find(|service| ServiceId(service.service).is_reserved())
        {
            return Err(ConfigError::Invalid {
                field: "services.service",
                reason: format!("{} is a reserved service id", ServiceId(reserved.service)),
            });
        }
        Ok(())
    }
}

/// 命令行引导参数。
///
/// 显式给出的命令行取值覆盖配置文件中的同名字段。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// `--config`
    pub config_path: Option<PathBuf>,
    /// `--name`
    pub name: Option<String>,
    /// `--client-id`
    pub client_id: Option<u16>,
    /// `--log`
    pub log_filter: Option<String>,
}

impl BootstrapOptions {
    /// 解析不含程序名的参数序列。
    pub fn from_args<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .ok_or_else(|| usage(format!("{name} 之后必须提供取值")))
            };
            match flag.as_str() {
                "--config" => options.config_path = Some(PathBuf::from(value("--config")?)),
                "--name" => options.name = Some(value("--name")?),
                "--client-id" => {
                    let raw = value("--client-id")?;
                    options.client_id = Some(
                        parse_u16(&raw)
                            .ok_or_else(|| usage(format!("无法解析客户端号 `{raw}`")))?,
                    );
                }
                "--log" => options.log_filter = Some(value("--log")?),
                other => return Err(usage(format!("未知参数 `{other}`"))),
            }
        }
        Ok(options)
    }

    /// 读取配置文件（如有）并叠加命令行覆盖。
    pub fn resolve(&self) -> Result<RouterConfig, ConfigError> {
        let mut config = match &self.config_path {
            Some(path) => RouterConfig::load(path)?,
            None => RouterConfig::default(),
        };
        if let Some(name) = &self.name {
            config.application.name.clone_from(name);
        }
        if let Some(client_id) = self.client_id {
            config.application.client_id = client_id;
        }
        if let Some(filter) = &self.log_filter {
            config.logging.filter.clone_from(filter);
        }
        config.validate()?;
        Ok(config)
    }
}

fn usage(message: String) -> ConfigError {
    ConfigError::Usage {
        message,
        usage: USAGE,
    }
}

fn parse_u16(raw: &str) -> Option<u16> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}
