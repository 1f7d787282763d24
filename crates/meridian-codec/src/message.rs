//! 路由核心与编解码器之间交换的报文模型。

use bytes::Bytes;

use crate::endpoint::Endpoint;
use crate::header::{Header, LENGTH_BASE};
use crate::types::{
    ClientId, InstanceId, InterfaceVersion, MessageType, MethodId, PROTOCOL_VERSION, ReturnCode,
    ServiceId, SessionId,
};

/// 一条完整报文。
///
/// # 契约说明（What）
/// - `instance` 只在进程内流转：发送时由调用方指定目标实例，接收时由路由核心按端点反查后填入；
/// - `peer` 同样只在进程内流转：接收时为来源端点，[`Message::response_to`] 沿用它，
///   使响应回到发出请求的那一方；
/// - `payload` 采用 [`Bytes`]，分发给多个回调时按引用计数共享，不复制数据。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// 服务号。
    pub service: ServiceId,
    /// 方法号。
    pub method: MethodId,
    /// 客户端号。
    pub client: ClientId,
    /// 会话号。
    pub session: SessionId,
    /// 接口版本。
    pub interface_version: InterfaceVersion,
    /// 报文类型。
    pub message_type: MessageType,
    /// 返回码。
    pub return_code: ReturnCode,
    /// 服务实例，线路上不存在。
    pub instance: Option<InstanceId>,
    /// 对端端点，线路上不存在。
    pub peer: Option<Endpoint>,
    /// 不透明载荷。
    pub payload: Bytes,
}

impl Message {
    fn new(
        service: ServiceId,
        instance: InstanceId,
        method: MethodId,
        message_type: MessageType,
    ) -> Self {
        Self {
            service,
            method,
            client: ClientId::default(),
            session: SessionId::default(),
            interface_version: InterfaceVersion::default(),
            message_type,
            return_code: ReturnCode::Ok,
            instance: Some(instance),
            peer: None,
            payload: Bytes::new(),
        }
    }

    /// 构造期待响应的请求；客户端号与会话号由发送路径补齐。
    pub fn request(service: ServiceId, instance: InstanceId, method: MethodId) -> Self {
        Self::new(service, instance, method, MessageType::Request)
    }

    /// 构造单向请求。
    pub fn request_no_return(service: ServiceId, instance: InstanceId, method: MethodId) -> Self {
        Self::new(service, instance, method, MessageType::RequestNoReturn)
    }

    /// 构造事件通知。
    pub fn notification(service: ServiceId, instance: InstanceId, event: MethodId) -> Self {
        Self::new(service, instance, event, MessageType::Notification)
    }

    /// 针对收到的请求构造正常响应，沿用其客户端号、会话号、实例与对端。
    pub fn response_to(request: &Message) -> Self {
        Self {
            message_type: MessageType::Response,
            return_code: ReturnCode::Ok,
            payload: Bytes::new(),
            ..request.clone()
        }
    }

    /// 依据原始头部构造错误回包，payload 为空。
    ///
    /// 头部来自无法完整解析的报文时也可使用，因此不依赖 `Message` 本身。
    pub fn error_reply(header: &Header, code: ReturnCode) -> Self {
        Self {
            service: header.service,
            method: header.method,
            client: header.client,
            session: header.session,
            interface_version: header.interface_version,
            message_type: MessageType::Error,
            return_code: code,
            instance: None,
            peer: None,
            payload: Bytes::new(),
        }
    }

    /// 替换载荷。
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// 指定客户端号。
    pub fn with_client(mut self, client: ClientId) -> Self {
        self.client = client;
        self
    }

    /// 指定会话号。
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = session;
        self
    }

    /// 指定接口版本。
    pub fn with_interface_version(mut self, version: InterfaceVersion) -> Self {
        self.interface_version = version;
        self
    }

    /// 指定目标实例。
    pub fn with_instance(mut self, instance: InstanceId) -> Self {
        self.instance = Some(instance);
        self
    }

    /// 指定对端端点：事件的接收方，或手工构造的响应的请求方。
    pub fn with_peer(mut self, peer: Endpoint) -> Self {
        self.peer = Some(peer);
        self
    }

    /// 生成线路头部；payload 长度超出 `u32` 时饱和处理，由编解码器负责拒绝。
    pub fn header(&self) -> Header {
        let payload_len = u32::try_from(self.payload.len()).unwrap_or(u32::MAX);
        Header {
            service: self.service,
            method: self.method,
            length: payload_len.saturating_add(LENGTH_BASE),
            client: self.client,
            session: self.session,
            protocol_version: PROTOCOL_VERSION,
            interface_version: self.interface_version,
            message_type: self.message_type.as_u8(),
            return_code: self.return_code.as_u8(),
        }
    }
}
