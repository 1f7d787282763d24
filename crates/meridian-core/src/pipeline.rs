//! # 消息管线：接收、路由、回错与发送
//!
//! ## 角色定位（Why）
//! - 传输层交来原始字节后，管线负责“分帧 → 反序列化 → 实例反查 → 回调分发”，
//!   任何一步失败都在本地消化：可回报时构造协议错误回包，否则记录后丢弃，绝不让 reactor 循环崩溃；
//! - 应用层发出的报文经管线“定位目标端点 → 补齐客户端号与会话号 → 序列化 → 可选插入 Magic Cookie
//!   → 交给传输层”。
//!
//! ## 路由规则（What）
//! - 请求（含单向请求）以目标端点（本地提供端点）查服务端侧表得到实例；
//!   响应、错误与事件以来源端点（远端提供方）查客户端侧表；
//! - 已提供但未启动的实例回 `NotReady`；没有回调的请求回 `UnknownMethod`；
//! - 只有 `Request` 类型会触发错误回包，其余类型的失败只记录日志；
//! - 响应与错误优先交给 [`ReplyRouter`]，未安装或未被接收时走回调表。
//!
//! ## 出站角色（How）
//! - 请求发往 `request_service` 登记在客户端侧的提供方端点，会话号取自对象池中面向该端点的
//!   [`ClientHandle`]；
//! - 响应与事件发往报文的 [`Message::peer`]：响应沿用请求的来源端点，事件由调用方指定接收方；
//!   源套接字取服务端侧登记的本地提供端点；
//! - 错误回包发回来源端点，并从收到请求的本地端点发出；
//! - 实例开启 Magic Cookie 时，在帧前插入对应方向的 Cookie 帧。
//!
//! ## 对象池准入
//! - 入站报文只有在路由成功后才会在对象池中创建对端对象；被拒绝的来源只累计已有对象的计数。

use std::collections::HashSet;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashSet;
use meridian_codec::{
    ClientId, CodecError, CookieKind, Endpoint, Frame, FrameReader, Header, InstanceId,
    MAGIC_COOKIE_LEN, Message, MessageCodec, MessageType, ReturnCode, ServiceId,
};
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::dispatch::{CallbackTable, DispatchOutcome};
use crate::error::{RouterError, RoutingFailure, codes};
use crate::pool::{ClientHandle, ObjectPool, PeerSnapshot, ServiceHandle};
use crate::registry::{Direction, LocationRegistry, PurgedBindings};
use crate::transport::{TransportError, TransportHub};

/// 请求/响应关联协作者：接收发往本地调用方的响应与错误。
pub trait ReplyRouter: Send + Sync + 'static {
    /// 尝试把应答交给等待中的调用上下文，返回是否已被接收。
    fn route_reply(&self, message: &Message, source: &Endpoint) -> bool;
}

/// 单帧的接收结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReceiveOutcome {
    /// 已分发给若干个回调。
    Dispatched(usize),
    /// 已交给 [`ReplyRouter`]。
    ReplyRouted,
    /// 路由成功但没有接收者，且该类型不需要回包。
    Unhandled,
    /// 路由或解析失败；`reply` 为已发出的错误回包返回码。
    Rejected {
        /// 稳定错误码。
        code: &'static str,
        /// 已回送给来源端点的返回码。
        reply: Option<ReturnCode>,
    },
    /// 连头部都无法读取，静默丢弃。
    Dropped {
        /// 稳定错误码。
        code: &'static str,
    },
}

/// 对象池流量统计。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PipelineStatistics {
    /// 客户端角色对象。
    pub clients: Vec<PeerSnapshot>,
    /// 服务端角色对象。
    pub services: Vec<PeerSnapshot>,
}

/// 收发两条路径共享的路由状态与协作者。
pub struct MessagePipeline {
    client_id: ClientId,
    registry: LocationRegistry,
    clients: ObjectPool<ClientHandle>,
    services: ObjectPool<ServiceHandle>,
    callbacks: CallbackTable,
    cookies: DashSet<(ServiceId, InstanceId)>,
    cookie_endpoints: RwLock<HashSet<Endpoint>>,
    active: DashSet<(ServiceId, InstanceId)>,
    codec: Arc<dyn MessageCodec>,
    transports: TransportHub,
    reply_router: RwLock<Option<Arc<dyn ReplyRouter>>>,
}

impl MessagePipeline {
    /// 以本地客户端号与编解码器构造管线。
    pub fn new(client_id: ClientId, codec: Arc<dyn MessageCodec>) -> Self {
        Self {
            client_id,
            registry: LocationRegistry::new(),
            clients: ObjectPool::new(),
            services: ObjectPool::new(),
            callbacks: CallbackTable::new(),
            cookies: DashSet::new(),
            cookie_endpoints: RwLock::new(HashSet::new()),
            active: DashSet::new(),
            codec,
            transports: TransportHub::new(),
            reply_router: RwLock::new(None),
        }
    }

    /// 本地客户端号。
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// 位置登记表。
    pub fn registry(&self) -> &LocationRegistry {
        &self.registry
    }

    /// 客户端角色对象池。
    pub fn clients(&self) -> &ObjectPool<ClientHandle> {
        &self.clients
    }

    /// 服务端角色对象池。
    pub fn services(&self) -> &ObjectPool<ServiceHandle> {
        &self.services
    }

    /// 回调表。
    pub fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    /// 已挂载的传输集合。
    pub fn transports(&self) -> &TransportHub {
        &self.transports
    }

    /// 安装或移除应答关联协作者。
    pub fn set_reply_router(&self, router: Option<Arc<dyn ReplyRouter>>) {
        *self.reply_router.write() = router;
    }

    /// 登记调用方要消费的 `(service, instance)` 所在的提供方端点。
    pub fn bind_client(&self, service: ServiceId, instance: InstanceId, endpoint: Endpoint) {
        self.registry.bind_client(service, instance, endpoint);
        self.reindex_cookies();
    }

    /// 撤销客户端侧登记。
    pub fn unbind_client(&self, service: ServiceId, instance: InstanceId) -> Option<Endpoint> {
        let removed = self.registry.unbind_client(service, instance);
        self.reindex_cookies();
        removed
    }

    /// 登记本地提供 `(service, instance)` 的端点。
    pub fn bind_service(&self, service: ServiceId, instance: InstanceId, endpoint: Endpoint) {
        self.registry.bind_service(service, instance, endpoint);
        self.reindex_cookies();
    }

    /// 撤销服务端侧登记，`endpoint` 须与当前记录一致。
    pub fn unbind_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: &Endpoint,
    ) -> Result<(), RouterError> {
        self.registry.unbind_service(service, instance, endpoint)?;
        self.reindex_cookies();
        Ok(())
    }

    /// 为实例开启 Magic Cookie。
    pub fn enable_magic_cookies(&self, service: ServiceId, instance: InstanceId) {
        if self.cookies.insert((service, instance)) {
            self.reindex_cookies();
            debug!(%service, %instance, "magic cookies enabled");
        }
    }

    /// 为实例关闭 Magic Cookie。
    pub fn disable_magic_cookies(&self, service: ServiceId, instance: InstanceId) {
        if self.cookies.remove(&(service, instance)).is_some() {
            self.reindex_cookies();
            debug!(%service, %instance, "magic cookies disabled");
        }
    }

    /// 入站字节是否可能含有 Magic Cookie：来源或目标端点上绑定了开启 Cookie 的实例。
    pub fn expects_cookies(&self, source: &Endpoint, target: &Endpoint) -> bool {
        let index = self.cookie_endpoints.read();
        index.contains(source) || index.contains(target)
    }

    /// 实例是否开启了 Magic Cookie。
    pub fn magic_cookies_enabled(&self, service: ServiceId, instance: InstanceId) -> bool {
        self.cookies.contains(&(service, instance))
    }

    /// 标记实例可接收请求，返回状态是否改变。
    pub fn activate(&self, service: ServiceId, instance: InstanceId) -> bool {
        self.active.insert((service, instance))
    }

    /// 取消实例的可接收状态，返回状态是否改变。
    pub fn deactivate(&self, service: ServiceId, instance: InstanceId) -> bool {
        self.active.remove(&(service, instance)).is_some()
    }

    /// 实例是否已启动。
    pub fn is_active(&self, service: ServiceId, instance: InstanceId) -> bool {
        self.active.contains(&(service, instance))
    }

    /// 对象池流量快照。
    pub fn statistics(&self) -> PipelineStatistics {
        PipelineStatistics {
            clients: self.clients.snapshots(),
            services: self.services.snapshots(),
        }
    }

    /// 处理传输层交来的一段字节，逐帧返回结果。
    ///
    /// 来源或目标端点上绑定了开启 Magic Cookie 的实例时，损坏帧之后在下一个 Cookie 处恢复。
    pub fn receive(
        &self,
        bytes: &[u8],
        source: &Endpoint,
        target: &Endpoint,
    ) -> Vec<ReceiveOutcome> {
        let resync = self.expects_cookies(source, target);
        let mut outcomes = Vec::new();
        for frame in FrameReader::new(bytes, resync) {
            match frame {
                Frame::Cookie(kind) => trace!(?kind, %source, "magic cookie skipped"),
                Frame::Message(frame) => outcomes.push(self.receive_frame(frame, source, target)),
                Frame::Corrupt {
                    offset,
                    bytes: corrupt,
                } => {
                    debug!(%source, offset, skipped = corrupt.len(), resync, "corrupt frame in stream");
                    outcomes.push(self.receive_frame(corrupt, source, target));
                }
            }
        }
        outcomes
    }

    /// 发送应用层报文。
    ///
    /// 请求类报文会被改写客户端号并分配新的会话号；响应与事件须带有 [`Message::peer`]。
    /// 失败时报文不会被发送。
    pub fn send(&self, message: &Message, flush: bool) -> Result<(), RouterError> {
        let service = message.service;
        let instance = message.instance.ok_or(RouterError::NoRoute {
            service,
            instance: InstanceId::ANY,
        })?;
        let no_route = || RouterError::NoRoute { service, instance };

        let mut outbound = message.clone();
        let (destination, local, cookie, client) = if message.message_type.is_request() {
            let destination = self
                .registry
                .resolve_client_endpoint(service, instance)
                .ok_or_else(no_route)?;
            let client = self.clients.find_or_create(destination);
            outbound.client = self.client_id;
            outbound.session = client.next_session();
            (destination, None, CookieKind::Client, Some(client))
        } else {
            let destination = message.peer.ok_or_else(no_route)?;
            let local = self.registry.resolve_service_endpoint(service, instance);
            (destination, local, CookieKind::Service, None)
        };

        let frame = self.codec.serialize(&outbound).map_err(|error| {
            warn!(%service, %instance, method = %outbound.method, code = codes::SERIALIZATION_FAULT, %error, "refusing to send unserializable message");
            RouterError::SerializationFault(error)
        })?;
        let bytes = if self.magic_cookies_enabled(service, instance) {
            with_cookie(cookie, &frame)
        } else {
            frame
        };

        self.transmit(&bytes, local.as_ref(), &destination, flush)?;
        match client {
            Some(client) => client.record_sent(),
            None => self.services.find_or_create(destination).record_sent(),
        }
        trace!(
            %service,
            %instance,
            method = %outbound.method,
            session = %outbound.session,
            endpoint = %destination,
            kind = %outbound.message_type,
            "message sent"
        );
        Ok(())
    }

    /// 针对 `header` 所描述的请求，从本地端点 `local` 向 `destination` 回送协议错误。
    ///
    /// 只累计对象池中已有对端的计数，不为未知来源创建对象。
    pub fn send_error_message(
        &self,
        header: &Header,
        code: ReturnCode,
        destination: &Endpoint,
        local: &Endpoint,
    ) -> Result<(), RouterError> {
        let reply = Message::error_reply(header, code);
        let frame = self
            .codec
            .serialize(&reply)
            .map_err(RouterError::SerializationFault)?;
        self.transmit(&frame, Some(local), destination, true)?;
        if let Some(known) = self.services.find(destination) {
            known.record_sent();
        }
        debug!(
            service = %header.service,
            method = %header.method,
            session = %header.session,
            endpoint = %destination,
            %local,
            %code,
            "error reply sent"
        );
        Ok(())
    }

    /// 清除引用 `endpoint` 的全部路由状态：两侧绑定、反查条目、对象池与启动标记。
    pub fn invalidate_endpoint(&self, endpoint: &Endpoint) -> PurgedBindings {
        let purged = self.registry.purge_endpoint(endpoint);
        for key in &purged.services {
            self.active.remove(key);
        }
        self.reindex_cookies();
        let released_client = self.clients.release(endpoint).is_some();
        let released_service = self.services.release(endpoint).is_some();
        info!(
            %endpoint,
            clients = purged.clients.len(),
            services = purged.services.len(),
            released_client,
            released_service,
            "endpoint invalidated"
        );
        purged
    }

    fn transmit(
        &self,
        bytes: &[u8],
        local: Option<&Endpoint>,
        destination: &Endpoint,
        flush: bool,
    ) -> Result<(), RouterError> {
        match self.transports.send(bytes, local, destination, flush) {
            Ok(()) => Ok(()),
            Err(TransportError::EndpointInvalidated { endpoint }) => {
                self.invalidate_endpoint(&endpoint);
                Err(RouterError::EndpointInvalidated { endpoint })
            }
            Err(other) => Err(RouterError::Transport(other)),
        }
    }

    fn reindex_cookies(&self) {
        let mut index = self.cookie_endpoints.write();
        index.clear();
        for key in self.cookies.iter() {
            let (service, instance) = *key;
            index.extend(self.registry.resolve_client_endpoint(service, instance));
            index.extend(self.registry.resolve_service_endpoint(service, instance));
        }
    }

    fn receive_frame(&self, bytes: &[u8], source: &Endpoint, target: &Endpoint) -> ReceiveOutcome {
        match self.codec.deserialize(bytes) {
            Ok(message) => self.route(message, source, target),
            Err(error) => self.reject_malformed(bytes, &error, source, target),
        }
    }

    fn reject_malformed(
        &self,
        bytes: &[u8],
        error: &CodecError,
        source: &Endpoint,
        target: &Endpoint,
    ) -> ReceiveOutcome {
        let Some(header) = Header::peek(bytes) else {
            debug!(%source, len = bytes.len(), code = error.code(), "dropping frame without a readable header");
            return ReceiveOutcome::Dropped {
                code: codes::MALFORMED,
            };
        };
        let (code, return_code) = match error {
            CodecError::WrongProtocolVersion { version } => {
                let failure = RoutingFailure::WrongProtocolVersion { version: *version };
                (failure.code(), failure.return_code())
            }
            _ => (codes::MALFORMED, ReturnCode::MalformedMessage),
        };
        warn!(
            service = %header.service,
            method = %header.method,
            %source,
            code,
            %error,
            "malformed message"
        );
        self.reject(&header, code, return_code, source, target)
    }

    fn reject(
        &self,
        header: &Header,
        code: &'static str,
        return_code: ReturnCode,
        source: &Endpoint,
        target: &Endpoint,
    ) -> ReceiveOutcome {
        if header.message_type() != Some(MessageType::Request) {
            return ReceiveOutcome::Rejected { code, reply: None };
        }
        match self.send_error_message(header, return_code, source, target) {
            Ok(()) => ReceiveOutcome::Rejected {
                code,
                reply: Some(return_code),
            },
            Err(error) => {
                warn!(%source, code = error.code(), %error, "failed to send error reply");
                ReceiveOutcome::Rejected { code, reply: None }
            }
        }
    }

    fn refuse(
        &self,
        message: &Message,
        failure: RoutingFailure,
        source: &Endpoint,
        target: &Endpoint,
    ) -> ReceiveOutcome {
        debug!(
            service = %message.service,
            method = %message.method,
            %source,
            code = failure.code(),
            %failure,
            "routing failed"
        );
        self.reject(&message.header(), failure.code(), failure.return_code(), source, target)
    }

    fn route(&self, mut message: Message, source: &Endpoint, target: &Endpoint) -> ReceiveOutcome {
        let service = message.service;
        if service.is_reserved() {
            return self.refuse(&message, RoutingFailure::UnknownService { service }, source, target);
        }
        let (direction, located_at) = if message.message_type.is_request() {
            (Direction::ToProvider, target)
        } else {
            (Direction::ToConsumer, source)
        };
        let Some(instance) = self.registry.resolve_instance(located_at, service, direction) else {
            let failure = RoutingFailure::UnknownInstance {
                service,
                endpoint: *located_at,
            };
            return self.refuse(&message, failure, source, target);
        };
        message.instance = Some(instance);
        message.peer = Some(*source);
        match direction {
            Direction::ToProvider => self.deliver_request(message, instance, source, target),
            Direction::ToConsumer => self.deliver_to_consumer(message, instance, source),
        }
    }

    fn deliver_request(
        &self,
        message: Message,
        instance: InstanceId,
        source: &Endpoint,
        target: &Endpoint,
    ) -> ReceiveOutcome {
        let service = message.service;
        if !self.is_active(service, instance) {
            self.count_known_sender(source);
            let failure = RoutingFailure::NotReady { service, instance };
            return self.refuse(&message, failure, source, target);
        }
        let key = (service, instance, message.method);
        match self.callbacks.dispatch(&key, &message) {
            DispatchOutcome::Dispatched(count) => {
                self.services.find_or_create(*source).record_received();
                trace!(%service, %instance, method = %message.method, %source, count, "request dispatched");
                ReceiveOutcome::Dispatched(count)
            }
            DispatchOutcome::Unhandled if message.message_type.expects_response() => {
                self.count_known_sender(source);
                let failure = RoutingFailure::UnknownMethod {
                    service,
                    instance,
                    method: message.method,
                };
                self.refuse(&message, failure, source, target)
            }
            DispatchOutcome::Unhandled => {
                self.count_known_sender(source);
                debug!(%service, %instance, method = %message.method, %source, "no receiver for fire-and-forget request");
                ReceiveOutcome::Unhandled
            }
        }
    }

    fn count_known_sender(&self, source: &Endpoint) {
        if let Some(known) = self.services.find(source) {
            known.record_received();
        }
    }

    fn deliver_to_consumer(&self, message: Message, instance: InstanceId, source: &Endpoint) -> ReceiveOutcome {
        self.clients.find_or_create(*source).record_received();
        if message.message_type.is_reply() {
            let router = self.reply_router.read().clone();
            if router.is_some_and(|router| router.route_reply(&message, source)) {
                trace!(service = %message.service, session = %message.session, %source, "reply routed");
                return ReceiveOutcome::ReplyRouted;
            }
        }
        let key = (message.service, instance, message.method);
        match self.callbacks.dispatch(&key, &message) {
            DispatchOutcome::Dispatched(count) => ReceiveOutcome::Dispatched(count),
            DispatchOutcome::Unhandled => {
                debug!(
                    service = %message.service,
                    %instance,
                    method = %message.method,
                    kind = %message.message_type,
                    %source,
                    "no receiver"
                );
                ReceiveOutcome::Unhandled
            }
        }
    }
}

fn with_cookie(kind: CookieKind, frame: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MAGIC_COOKIE_LEN + frame.len());
    buf.extend_from_slice(kind.bytes());
    buf.extend_from_slice(frame);
    buf.freeze()
}

impl core::fmt::Debug for MessagePipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessagePipeline")
            .field("client_id", &self.client_id)
            .field("registry", &self.registry)
            .field("callbacks", &self.callbacks)
            .field("transports", &self.transports)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_codec::{MethodId, SomeIpCodec};

    fn pipeline() -> MessagePipeline {
        MessagePipeline::new(ClientId(0x0100), Arc::new(SomeIpCodec::new()))
    }

    #[test]
    fn send_without_instance_has_no_route() {
        let mut message = Message::request(ServiceId(5), InstanceId(1), MethodId(1));
        message.instance = None;
        let error = pipeline().send(&message, true).expect_err("no instance");
        assert_eq!(error.code(), codes::NO_ROUTE);
    }

    #[test]
    fn short_buffer_is_dropped_silently() {
        let endpoint = Endpoint::udp(([127, 0, 0, 1], 1).into());
        let outcomes = pipeline().receive(&[0x00; 8], &endpoint, &endpoint);
        assert_eq!(
            outcomes,
            vec![ReceiveOutcome::Dropped {
                code: codes::MALFORMED
            }]
        );
    }

    #[test]
    #[tracing_test::traced_test]
    fn unknown_instance_logs_refusal_without_transport() {
        let endpoint = Endpoint::udp(([127, 0, 0, 1], 2).into());
        let request = Message::request(ServiceId(5), InstanceId(1), MethodId(1));
        let bytes = SomeIpCodec::new().serialize(&request).expect("serialize");
        let outcomes = pipeline().receive(&bytes, &endpoint, &endpoint);
        assert_eq!(
            outcomes,
            vec![ReceiveOutcome::Rejected {
                code: codes::UNKNOWN_INSTANCE,
                reply: None
            }]
        );
        assert!(logs_contain("routing failed"));
        assert!(logs_contain("failed to send error reply"));
    }

    #[test]
    fn cookie_prefix_precedes_frame() {
        let bytes = with_cookie(CookieKind::Client, &[1, 2, 3]);
        assert!(meridian_codec::is_magic_cookie(&bytes));
        assert_eq!(&bytes[MAGIC_COOKIE_LEN..], &[1, 2, 3]);
    }

    #[test]
    fn cookie_index_follows_bindings_and_flags() {
        let pipeline = pipeline();
        let (service, instance) = (ServiceId(5), InstanceId(1));
        let remote = Endpoint::udp(([127, 0, 0, 1], 3).into());
        let local = Endpoint::udp(([127, 0, 0, 1], 4).into());
        let elsewhere = Endpoint::udp(([127, 0, 0, 1], 5).into());

        pipeline.bind_client(service, instance, remote);
        assert!(!pipeline.expects_cookies(&remote, &local));
        pipeline.enable_magic_cookies(service, instance);
        assert!(pipeline.expects_cookies(&remote, &local));

        pipeline.bind_client(service, instance, elsewhere);
        assert!(!pipeline.expects_cookies(&remote, &local));
        assert!(pipeline.expects_cookies(&elsewhere, &local));
        pipeline.unbind_client(service, instance);
        assert!(!pipeline.expects_cookies(&elsewhere, &local));

        pipeline.bind_service(service, instance, local);
        assert!(pipeline.expects_cookies(&remote, &local));
        pipeline.invalidate_endpoint(&local);
        assert!(!pipeline.expects_cookies(&remote, &local));

        pipeline.bind_service(service, instance, local);
        pipeline.disable_magic_cookies(service, instance);
        assert!(!pipeline.expects_cookies(&remote, &local));
    }
}
