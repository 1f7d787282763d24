//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义路由核心对外暴露的错误语义：报文损坏、路由失败、陈旧绑定、序列化故障、
//!   端点失效以及生命周期/配置错误；
//! - 每个错误提供稳定的点分错误码（`code()`），日志与测试按码匹配而不是按文案匹配。
//!
//! ## 设计要求（What）
//! - 路由类失败（[`RoutingFailure`]）可映射为线路返回码，由管线据此构造错误回包；
//! - 编程错误（如本地构造了无法序列化的报文）以 [`RouterError::SerializationFault`]
//!   显式返回给调用方，永不静默丢弃。

use meridian_codec::{CodecError, Endpoint, InstanceId, MethodId, ReturnCode, ServiceId};
use thiserror::Error;

use crate::transport::TransportError;

/// 稳定错误码常量。
pub mod codes {
    /// 入站报文无法解析。
    pub const MALFORMED: &str = "routing.malformed";
    /// 服务未知。
    pub const UNKNOWN_SERVICE: &str = "routing.unknown_service";
    /// 端点上无对应实例绑定。
    pub const UNKNOWN_INSTANCE: &str = "routing.unknown_instance";
    /// 协议版本不受支持。
    pub const WRONG_PROTOCOL_VERSION: &str = "routing.protocol_version";
    /// 服务已提供但尚未启动。
    pub const NOT_READY: &str = "routing.not_ready";
    /// 方法上无回调。
    pub const UNKNOWN_METHOD: &str = "routing.unknown_method";
    /// 解绑时端点与当前记录不符。
    pub const STALE_BINDING: &str = "registry.stale_binding";
    /// 本地报文序列化失败。
    pub const SERIALIZATION_FAULT: &str = "pipeline.serialization_fault";
    /// 目标实例没有可用端点。
    pub const NO_ROUTE: &str = "pipeline.no_route";
    /// 操作要求服务已被本实例提供。
    pub const SERVICE_NOT_PROVIDED: &str = "application.service_not_provided";
    /// 端点已失效。
    pub const ENDPOINT_INVALIDATED: &str = "transport.endpoint_invalidated";
    /// 传输层失败。
    pub const TRANSPORT: &str = "transport.failure";
}

/// 路由失败的细分类别，均可回报给请求方。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum RoutingFailure {
    /// 本实例未提供该服务。
    #[error("service {service} is not provided here")]
    UnknownService {
        /// 服务号。
        service: ServiceId,
    },
    /// 目标端点上没有该服务的实例绑定。
    #[error("no instance of service {service} is bound to {endpoint}")]
    UnknownInstance {
        /// 服务号。
        service: ServiceId,
        /// 参与反查的端点。
        endpoint: Endpoint,
    },
    /// 协议版本不受支持。
    #[error("unsupported protocol version {version:#04x}")]
    WrongProtocolVersion {
        /// 实际版本号。
        version: u8,
    },
    /// 服务实例已提供但未启动。
    #[error("service {service}.{instance} is provided but not started")]
    NotReady {
        /// 服务号。
        service: ServiceId,
        /// 实例号。
        instance: InstanceId,
    },
    /// 请求的方法没有登记回调。
    #[error("method {method} of {service}.{instance} has no receiver")]
    UnknownMethod {
        /// 服务号。
        service: ServiceId,
        /// 实例号。
        instance: InstanceId,
        /// 方法号。
        method: MethodId,
    },
}

impl RoutingFailure {
    /// 对应的线路返回码。
    ///
    /// 线路上没有“实例未知”，`UnknownInstance` 以 `UnknownService` 回报。
    pub const fn return_code(&self) -> ReturnCode {
        match self {
            Self::UnknownService { .. } | Self::UnknownInstance { .. } => {
                ReturnCode::UnknownService
            }
            Self::WrongProtocolVersion { .. } => ReturnCode::WrongProtocolVersion,
            Self::NotReady { .. } => ReturnCode::NotReady,
            Self::UnknownMethod { .. } => ReturnCode::UnknownMethod,
        }
    }

    /// 稳定错误码。
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownService { .. } => codes::UNKNOWN_SERVICE,
            Self::UnknownInstance { .. } => codes::UNKNOWN_INSTANCE,
            Self::WrongProtocolVersion { .. } => codes::WRONG_PROTOCOL_VERSION,
            Self::NotReady { .. } => codes::NOT_READY,
            Self::UnknownMethod { .. } => codes::UNKNOWN_METHOD,
        }
    }
}

/// 路由核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：应用层调用 `send`、`start_service` 等接口时只需知道“路由是否成功”以及
///   失败类别，不暴露反序列化细节；
/// - **契约 (What)**：所有变体满足 `Send + Sync + 'static`，可跨线程传播；
/// - **风险 (Trade-offs)**：`Transport` 变体包含 `io::Error`，因此整体不实现 `Clone`。
#[derive(Debug, Error)]
pub enum RouterError {
    /// 路由失败。
    #[error(transparent)]
    Routing(#[from] RoutingFailure),
    /// 解绑时提供的端点与当前记录不符，操作未生效。
    #[error("stale binding for {service}.{instance}: expected {expected}, registered {actual}")]
    StaleBinding {
        /// 服务号。
        service: ServiceId,
        /// 实例号。
        instance: InstanceId,
        /// 调用方认为的端点。
        expected: Endpoint,
        /// 当前登记的端点。
        actual: Endpoint,
    },
    /// 本地构造的报文无法序列化。
    #[error("failed to serialize outbound message: {0}")]
    SerializationFault(#[source] CodecError),
    /// 目标实例没有可用端点。
    #[error("no route to {service}.{instance}")]
    NoRoute {
        /// 服务号。
        service: ServiceId,
        /// 实例号。
        instance: InstanceId,
    },
    /// 操作要求该实例已被本地提供。
    #[error("service {service}.{instance} is not provided by this application")]
    ServiceNotProvided {
        /// 服务号。
        service: ServiceId,
        /// 实例号。
        instance: InstanceId,
    },
    /// 端点已失效。
    #[error("endpoint {endpoint} has been invalidated")]
    EndpointInvalidated {
        /// 失效端点。
        endpoint: Endpoint,
    },
    /// 传输层失败。
    #[error(transparent)]
    Transport(TransportError),
}

impl RouterError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Routing(failure) => failure.code(),
            Self::StaleBinding { .. } => codes::STALE_BINDING,
            Self::SerializationFault(_) => codes::SERIALIZATION_FAULT,
            Self::NoRoute { .. } => codes::NO_ROUTE,
            Self::ServiceNotProvided { .. } => codes::SERVICE_NOT_PROVIDED,
            Self::EndpointInvalidated { .. } => codes::ENDPOINT_INVALIDATED,
            Self::Transport(_) => codes::TRANSPORT,
        }
    }
}

impl From<TransportError> for RouterError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::EndpointInvalidated { endpoint } => {
                Self::EndpointInvalidated { endpoint }
            }
            other => Self::Transport(other),
        }
    }
}

/// 生命周期控制错误。
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// 当前状态不允许该操作。
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// 尝试的操作。
        operation: &'static str,
        /// 当前状态名称。
        state: &'static str,
    },
    /// 构建运行时失败。
    #[error("failed to build reactor runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// 按配置提供服务失败。
    #[error("failed to provide configured service: {0}")]
    Bootstrap(#[source] RouterError),
}

impl LifecycleError {
    /// 稳定错误码。
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => "lifecycle.invalid_state",
            Self::Runtime(_) => "lifecycle.runtime",
            Self::Bootstrap(_) => "lifecycle.bootstrap",
        }
    }
}

/// 配置加载错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 命令行参数不合法。
    #[error("{message}\n{usage}")]
    Usage {
        /// 具体问题。
        message: String,
        /// 用法说明。
        usage: &'static str,
    },
    /// 读取配置文件失败。
    #[error("failed to read {path}: {source}")]
    Read {
        /// 文件路径。
        path: String,
        /// 原始错误。
        #[source]
        source: std::io::Error,
    },
    /// 配置文件不是合法的 TOML 或字段不符。
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// 字段取值不合法。
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// 字段名。
        field: &'static str,
        /// 原因。
        reason: String,
    },
}

impl ConfigError {
    /// 稳定错误码。
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Usage { .. } => "config.usage",
            Self::Read { .. } => "config.read",
            Self::Parse(_) => "config.parse",
            Self::Invalid { .. } => "config.invalid",
        }
    }
}
