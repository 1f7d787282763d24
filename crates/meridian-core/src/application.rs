//! 管理型应用：路由核心面向应用层的外观。
//!
//! # 教案式说明
//! - **意图 (Why)**：应用层只关心“我要调用哪个服务 / 我提供哪个服务 / 收到报文调谁”，
//!   [`ManagingApplication`] 把登记表、回调表、管线与 reactor 生命周期组合在一个具体类型上，
//!   通过 [`ServiceManagement`] 与 [`MessageSender`] 两个能力接口暴露出去；
//! - **契约 (What)**：
//!   - 所有操作以显式 `Result` 返回成功与否，不暴露反序列化细节；
//!   - 协议保留服务号（`0x0000`/`0xFFFF`）在登记时即被拒绝；
//!   - 提供的服务在 `start_service` 之前不接收请求（回 `NotReady`）；
//! - **生命周期 (How)**：`init` 构建 reactor 并按配置提供服务、开启 Magic Cookie；
//!   `start` 阻塞运行事件循环；`stop` 可从任意线程调用，在途分发完成后循环退出。

use std::sync::Arc;
use std::time::Duration;

use meridian_codec::{
    Endpoint, InstanceId, Message, MessageCodec, MethodId, ServiceId, SomeIpCodec,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::dispatch::ReceiveCallback;
use crate::error::{LifecycleError, RouterError, RoutingFailure};
use crate::lifecycle::{LifecycleState, Reactor, ReactorEvent, ReactorHandle};
use crate::pipeline::{MessagePipeline, PipelineStatistics, ReplyRouter};
use crate::registry::PurgedBindings;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::transport::Transport;

/// 服务登记能力。
pub trait ServiceManagement {
    /// 声明要调用 `(service, instance)`，其提供方位于 `endpoint`；出站请求发往该端点。
    fn request_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: Endpoint,
    ) -> Result<(), RouterError>;

    /// 撤销调用声明。
    fn release_service(&self, service: ServiceId, instance: InstanceId) -> Result<(), RouterError>;

    /// 声明 `(service, instance)` 由 `endpoint` 提供；尚未启动。
    fn provide_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: Endpoint,
    ) -> Result<(), RouterError>;

    /// 撤销提供声明；`endpoint` 须与当前登记一致。
    fn withdraw_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: Endpoint,
    ) -> Result<(), RouterError>;

    /// 开始接收请求。
    fn start_service(&self, service: ServiceId, instance: InstanceId) -> Result<(), RouterError>;

    /// 停止接收请求，登记保持不变。
    fn stop_service(&self, service: ServiceId, instance: InstanceId) -> Result<(), RouterError>;
}

/// 报文发送能力。
pub trait MessageSender {
    /// 发送报文；`flush` 要求绕过合并缓冲立即发送。
    fn send(&self, message: &Message, flush: bool) -> Result<(), RouterError>;
}

struct Lifecycle {
    state: LifecycleState,
    reactor: Option<Reactor>,
    handle: Option<ReactorHandle>,
    statistics: Option<TimerHandle>,
}

/// 路由核心的具体实现。
pub struct ManagingApplication {
    name: String,
    pipeline: Arc<MessagePipeline>,
    lifecycle: Mutex<Lifecycle>,
}

impl ManagingApplication {
    /// 以默认编解码器构造。
    pub fn new(name: impl Into<String>, client_id: meridian_codec::ClientId) -> Self {
        Self::with_codec(name, client_id, Arc::new(SomeIpCodec::new()))
    }

    /// 注入自定义编解码器。
    pub fn with_codec(
        name: impl Into<String>,
        client_id: meridian_codec::ClientId,
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        Self {
            name: name.into(),
            pipeline: Arc::new(MessagePipeline::new(client_id, codec)),
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::Created,
                reactor: None,
                handle: None,
                statistics: None,
            }),
        }
    }

    /// 按配置中的应用身份与报文上限构造。
    pub fn from_config(config: &RouterConfig) -> Self {
        Self::with_codec(
            config.application.name.clone(),
            config.client_id(),
            Arc::new(SomeIpCodec::with_max_payload(config.routing.max_message_size)),
        )
    }

    /// 应用名。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 底层管线。
    pub fn pipeline(&self) -> &Arc<MessagePipeline> {
        &self.pipeline
    }

    /// 当前生命周期状态。
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.lock().state
    }

    /// `init` 之后可用的 reactor 句柄。
    pub fn reactor_handle(&self) -> Option<ReactorHandle> {
        self.lifecycle.lock().handle.clone()
    }

    /// 挂载出站传输；同一本地端点重复挂载时替换旧实现。
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) {
        let local = transport.local_endpoint();
        if self.pipeline.transports().attach(transport).is_some() {
            warn!(application = %self.name, %local, "transport replaced");
        } else {
            debug!(application = %self.name, %local, "transport attached");
        }
    }

    /// 安装或移除应答关联协作者。
    pub fn set_reply_router(&self, router: Option<Arc<dyn ReplyRouter>>) {
        self.pipeline.set_reply_router(router);
    }

    /// 注册方法回调，返回是否新增。
    pub fn register_cbk(
        &self,
        service: ServiceId,
        instance: InstanceId,
        method: MethodId,
        callback: ReceiveCallback,
    ) -> bool {
        self.pipeline
            .callbacks()
            .register((service, instance, method), callback)
    }

    /// 注销方法回调，返回是否确有移除。
    pub fn deregister_cbk(
        &self,
        service: ServiceId,
        instance: InstanceId,
        method: MethodId,
        callback: &ReceiveCallback,
    ) -> bool {
        self.pipeline
            .callbacks()
            .deregister((service, instance, method), callback)
    }

    /// 为实例开启 Magic Cookie。
    pub fn enable_magic_cookies(&self, service: ServiceId, instance: InstanceId) {
        self.pipeline.enable_magic_cookies(service, instance);
    }

    /// 为实例关闭 Magic Cookie。
    pub fn disable_magic_cookies(&self, service: ServiceId, instance: InstanceId) {
        self.pipeline.disable_magic_cookies(service, instance);
    }

    /// 端点失效：清除全部相关路由状态。
    pub fn invalidate_endpoint(&self, endpoint: &Endpoint) -> PurgedBindings {
        self.pipeline.invalidate_endpoint(endpoint)
    }

    /// 对象池统计。
    pub fn statistics(&self) -> PipelineStatistics {
        self.pipeline.statistics()
    }

    /// 构建 reactor，并按配置提供服务、开启 Magic Cookie。
    pub fn init(&self, config: &RouterConfig) -> Result<ReactorHandle, LifecycleError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != LifecycleState::Created {
            return Err(lifecycle.state.invalid("init"));
        }
        let reactor = Reactor::init(config)?;
        let handle = reactor.handle();

        for service in &config.services {
            let (id, instance) = service.ids();
            self.provide_service(id, instance, service.local_endpoint())
                .and_then(|()| self.start_service(id, instance))
                .map_err(LifecycleError::Bootstrap)?;
        }
        for key in &config.routing.magic_cookies {
            let (service, instance) = key.ids();
            self.enable_magic_cookies(service, instance);
        }
        if let Some(interval) = config.routing.statistics_interval_ms {
            let pipeline = Arc::clone(&self.pipeline);
            let name = self.name.clone();
            let timer = handle.scheduler().schedule_periodic(
                Duration::from_millis(interval),
                Box::new(move || {
                    let statistics = pipeline.statistics();
                    debug!(
                        application = %name,
                        clients = statistics.clients.len(),
                        services = statistics.services.len(),
                        sent = statistics.services.iter().chain(&statistics.clients).map(|peer| peer.messages_sent).sum::<u64>(),
                        received = statistics.services.iter().chain(&statistics.clients).map(|peer| peer.messages_received).sum::<u64>(),
                        "routing statistics"
                    );
                }),
            );
            lifecycle.statistics = Some(timer);
        }

        lifecycle.reactor = Some(reactor);
        lifecycle.handle = Some(handle.clone());
        lifecycle.state = LifecycleState::Initialized;
        info!(
            application = %self.name,
            client = %self.pipeline.client_id(),
            services = config.services.len(),
            "application initialized"
        );
        Ok(handle)
    }

    /// 阻塞运行事件循环，直到 `stop` 或所有句柄被丢弃。
    pub fn start(&self) -> Result<(), LifecycleError> {
        let reactor = {
            let mut lifecycle = self.lifecycle.lock();
            let state = lifecycle.state;
            let reactor = match (state, lifecycle.reactor.take()) {
                (LifecycleState::Initialized, Some(reactor)) => reactor,
                _ => return Err(state.invalid("start")),
            };
            lifecycle.state = LifecycleState::Running;
            reactor
        };
        info!(application = %self.name, "application running");

        let pipeline = Arc::clone(&self.pipeline);
        reactor.run(|event| match event {
            ReactorEvent::Received {
                bytes,
                source,
                target,
            } => {
                pipeline.receive(&bytes, &source, &target);
            }
            ReactorEvent::Invalidated(endpoint) => {
                pipeline.invalidate_endpoint(&endpoint);
            }
        });

        let mut lifecycle = self.lifecycle.lock();
        if let Some(timer) = lifecycle.statistics.take() {
            timer.cancel();
        }
        lifecycle.state = LifecycleState::Stopped;
        info!(application = %self.name, "application stopped");
        Ok(())
    }

    /// 请求停机；可从任意线程重复调用。
    ///
    /// 运行中时只发出信号，`start` 在当前事件处理完后返回；尚未启动时直接进入 `Stopped`。
    pub fn stop(&self) -> Result<(), LifecycleError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            LifecycleState::Created => Err(lifecycle.state.invalid("stop")),
            LifecycleState::Initialized => {
                if let Some(handle) = &lifecycle.handle {
                    handle.stop();
                }
                if let Some(timer) = lifecycle.statistics.take() {
                    timer.cancel();
                }
                lifecycle.reactor = None;
                lifecycle.state = LifecycleState::Stopped;
                info!(application = %self.name, "application stopped before start");
                Ok(())
            }
            LifecycleState::Running => {
                if let Some(handle) = &lifecycle.handle {
                    handle.stop();
                }
                Ok(())
            }
            LifecycleState::Stopped => Ok(()),
        }
    }

    fn ensure_provided(&self, service: ServiceId, instance: InstanceId) -> Result<(), RouterError> {
        if self
            .pipeline
            .registry()
            .resolve_service_endpoint(service, instance)
            .is_some()
        {
            Ok(())
        } else {
            Err(RouterError::ServiceNotProvided { service, instance })
        }
    }
}

fn ensure_assignable(service: ServiceId) -> Result<(), RouterError> {
    if service.is_reserved() {
        Err(RoutingFailure::UnknownService { service }.into())
    } else {
        Ok(())
    }
}

impl ServiceManagement for ManagingApplication {
    fn request_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: Endpoint,
    ) -> Result<(), RouterError> {
        ensure_assignable(service)?;
        self.pipeline.bind_client(service, instance, endpoint);
        Ok(())
    }

    fn release_service(&self, service: ServiceId, instance: InstanceId) -> Result<(), RouterError> {
        self.pipeline.unbind_client(service, instance);
        Ok(())
    }

    fn provide_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: Endpoint,
    ) -> Result<(), RouterError> {
        ensure_assignable(service)?;
        self.pipeline.bind_service(service, instance, endpoint);
        Ok(())
    }

    fn withdraw_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: Endpoint,
    ) -> Result<(), RouterError> {
        self.pipeline.unbind_service(service, instance, &endpoint)?;
        if self.pipeline.deactivate(service, instance) {
            debug!(%service, %instance, "withdrawn service deactivated");
        }
        Ok(())
    }

    fn start_service(&self, service: ServiceId, instance: InstanceId) -> Result<(), RouterError> {
        self.ensure_provided(service, instance)
            .inspect_err(|error| warn!(%service, %instance, code = error.code(), "cannot start service"))?;
        if self.pipeline.activate(service, instance) {
            info!(%service, %instance, "service started");
        }
        Ok(())
    }

    fn stop_service(&self, service: ServiceId, instance: InstanceId) -> Result<(), RouterError> {
        self.ensure_provided(service, instance)?;
        if self.pipeline.deactivate(service, instance) {
            info!(%service, %instance, "service stopped");
        }
        Ok(())
    }
}

impl MessageSender for ManagingApplication {
    fn send(&self, message: &Message, flush: bool) -> Result<(), RouterError> {
        self.pipeline.send(message, flush)
    }
}

impl core::fmt::Debug for ManagingApplication {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManagingApplication")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
