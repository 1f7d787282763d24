#![warn(missing_docs)]

//! # meridian-hosting
//!
//! ## 定位（Why）
//! - 路由核心与 UDP 传输彼此独立，宿主负责把两者按配置装配成一个可运行的实例：
//!   初始化 reactor、为每个配置的本地端点绑定套接字、挂载传输、安装日志与停机信号；
//! - `meridiand` 守护进程只是本 crate 之上的一层命令行薄壳。
//!
//! ## 契约（What）
//! - [`install_tracing`] 在进程内只能成功一次；环境变量 `RUST_LOG` 优先于配置中的过滤表达式；
//! - [`Host::build`] 完成后应用处于 `Initialized` 状态，[`Host::run`] 阻塞直到停机；
//! - 配置端口为 0 时以系统分配的实际端口重新登记服务。

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use meridian_core::{
    Endpoint, LifecycleError, ManagingApplication, ReactorHandle, RouterConfig, RouterError,
    ServiceManagement, Transport, TransportKind,
};
use meridian_transport_udp::{UdpError, UdpTransport};
use thiserror::Error;
use tracing::{dispatcher, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

static TRACING_INSTALLED: OnceLock<String> = OnceLock::new();

/// 日志安装失败。
#[derive(Debug, Error)]
pub enum TracingError {
    /// 本 crate 已安装过。
    #[error("tracing already installed with filter `{0}`")]
    AlreadyInstalled(String),
    /// 外部已设置全局 Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 过滤表达式无法解析。
    #[error("invalid log filter `{filter}`: {reason}")]
    InvalidFilter {
        /// 原始表达式。
        filter: String,
        /// 解析错误。
        reason: String,
    },
    /// 设置全局 Subscriber 失败。
    #[error("failed to set global subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装 `fmt + EnvFilter` 全局 Subscriber。
///
/// 过滤表达式取 `RUST_LOG`，未设置时取 `filter`。
pub fn install_tracing(filter: &str) -> Result<(), TracingError> {
    if let Some(installed) = TRACING_INSTALLED.get() {
        return Err(TracingError::AlreadyInstalled(installed.clone()));
    }
    if dispatcher::has_been_set() {
        return Err(TracingError::SubscriberAlreadySet);
    }
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(filter).map_err(|error| TracingError::InvalidFilter {
            filter: filter.to_owned(),
            reason: error.to_string(),
        })?,
    };
    let effective = env_filter.to_string();
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true));
    tracing::subscriber::set_global_default(subscriber)?;
    TRACING_INSTALLED
        .set(effective)
        .map_err(TracingError::AlreadyInstalled)
}

/// 宿主装配失败。
#[derive(Debug, Error)]
pub enum HostError {
    /// 生命周期错误。
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// 绑定套接字失败。
    #[error(transparent)]
    Udp(#[from] UdpError),
    /// 以实际端口重新登记服务失败。
    #[error(transparent)]
    Routing(#[from] RouterError),
    /// 没有可用于该传输类型的实现。
    #[error("no transport implementation for {endpoint}")]
    UnsupportedTransport {
        /// 配置中的端点。
        endpoint: Endpoint,
    },
}

impl HostError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lifecycle(error) => error.code(),
            Self::Udp(error) => error.code(),
            Self::Routing(error) => error.code(),
            Self::UnsupportedTransport { .. } => "host.unsupported_transport",
        }
    }
}

/// 装配完成、等待运行的路由实例。
pub struct Host {
    application: Arc<ManagingApplication>,
    handle: ReactorHandle,
    transports: Vec<Arc<UdpTransport>>,
}

impl Host {
    /// 按配置初始化应用并绑定全部本地端点。
    ///
    /// # 执行步骤（How）
    /// 1. 先检查传输类型，任何非 UDP 端点都在初始化之前被拒绝；
    /// 2. `init` 提供并启动配置中的服务；
    /// 3. 相同地址只绑定一次；实际端口与配置不同（端口 0）时，以实际端点重新登记。
    pub fn build(config: &RouterConfig) -> Result<Self, HostError> {
        if let Some(service) = config
            .services
            .iter()
            .find(|service| service.transport != TransportKind::Udp)
        {
            return Err(HostError::UnsupportedTransport {
                endpoint: service.local_endpoint(),
            });
        }

        let application = Arc::new(ManagingApplication::from_config(config));
        let handle = application.init(config)?;

        let mut bound: BTreeMap<SocketAddr, Arc<UdpTransport>> = BTreeMap::new();
        for service in &config.services {
            let transport = match bound.get(&service.endpoint) {
                Some(transport) => Arc::clone(transport),
                None => {
                    let transport = UdpTransport::bind(service.endpoint, &handle)?;
                    application.attach_transport(transport.clone());
                    bound.insert(service.endpoint, Arc::clone(&transport));
                    transport
                }
            };
            let configured = service.local_endpoint();
            let actual = transport.local_endpoint();
            if actual != configured {
                let (id, instance) = service.ids();
                application.withdraw_service(id, instance, configured)?;
                application.provide_service(id, instance, actual)?;
                application.start_service(id, instance)?;
                info!(service = %id, %instance, %configured, %actual, "service rebound to assigned port");
            }
        }

        Ok(Self {
            application,
            handle,
            transports: bound.into_values().collect(),
        })
    }

    /// 应用实例。
    pub fn application(&self) -> &Arc<ManagingApplication> {
        &self.application
    }

    /// 已绑定的传输。
    pub fn transports(&self) -> &[Arc<UdpTransport>] {
        &self.transports
    }

    /// reactor 句柄。
    pub fn reactor_handle(&self) -> &ReactorHandle {
        &self.handle
    }

    /// 收到 Ctrl-C 时请求停机。
    pub fn stop_on_ctrl_c(&self) {
        let handle = self.handle.clone();
        self.handle.runtime().spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received");
                    handle.stop();
                }
                Err(error) => warn!(%error, "cannot listen for interrupt"),
            }
        });
    }

    /// 阻塞运行直到停机。
    pub fn run(&self) -> Result<(), HostError> {
        self.application.start()?;
        Ok(())
    }
}

impl core::fmt::Debug for Host {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Host")
            .field("application", &self.application)
            .field("transports", &self.transports)
            .finish()
    }
}
