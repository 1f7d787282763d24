#![warn(missing_docs)]

//! # meridian-core
//!
//! ## 定位与职责（Why）
//! - 服务发现之上的“本地路由核心”：维护服务实例到网络端点的双向映射，把入站字节还原为报文并
//!   分发给登记的回调，把应用层报文送往正确的对端；
//! - 所有入站处理在单线程 reactor 上执行，任意线程都可以登记服务、发送报文或请求停机。
//!
//! ## 模块地图（What）
//! - [`registry`]：客户端侧与服务端侧两张位置表及其反查索引；
//! - [`pool`]：按端点缓存的客户端/服务端角色对象；
//! - [`dispatch`]：`(服务, 实例, 方法)` 到回调的登记与分发；
//! - [`pipeline`]：接收、路由、错误回包与发送；
//! - [`application`]：面向应用层的外观与生命周期；
//! - [`lifecycle`] / [`scheduler`]：reactor 事件循环与定时器；
//! - [`transport`]：传输协作者契约，按本地端点挑选出站套接字；
//! - [`config`] / [`error`]：引导配置与错误域。
//!
//! ## 边界（Trade-offs）
//! - 服务发现、请求/响应关联与具体套接字实现均由外部协作者提供；
//! - 线路格式与端点标识由 `meridian-codec` 负责，本 crate 只依赖其 `MessageCodec` 契约，
//!   并原样再导出 [`Endpoint`] 与 [`TransportKind`]。

pub mod application;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use application::{ManagingApplication, MessageSender, ServiceManagement};
pub use config::{BootstrapOptions, RouterConfig};
pub use dispatch::{CallbackTable, DispatchOutcome, MethodKey, ReceiveCallback};
pub use error::{ConfigError, LifecycleError, RouterError, RoutingFailure, codes};
pub use lifecycle::{LifecycleState, Reactor, ReactorEvent, ReactorHandle};
pub use pipeline::{MessagePipeline, PipelineStatistics, ReceiveOutcome, ReplyRouter};
pub use pool::{ClientHandle, ObjectPool, PeerSnapshot, ServiceHandle};
pub use registry::{Direction, LocationRegistry, PurgedBindings};
pub use scheduler::{ReactorScheduler, Scheduler, TimerHandle};
pub use transport::{Transport, TransportError, TransportHub};

pub use meridian_codec::{Endpoint, TransportKind};
