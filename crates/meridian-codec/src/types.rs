//! 线路层标识与枚举。
//!
//! # 教案定位（Why）
//! - 服务号、方法号、客户端号等在协议里都是 16 位整数，直接用 `u16` 传参极易把
//!   “服务号”误传成“方法号”。以新类型包装后，编译器即可拦截这类错位；
//! - `MessageType` 与 `ReturnCode` 是路由决策（是否回错误、查哪张实例表）的依据，
//!   集中定义便于路由核心与编解码器共享同一份取值表。

use core::fmt;

/// 当前实现支持的协议版本号，头部第 13 字节。
pub const PROTOCOL_VERSION: u8 = 0x01;

macro_rules! wire_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub u16);

        impl $name {
            /// 返回原始 16 位取值。
            pub const fn value(self) -> u16 {
                self.0
            }
        }

        impl From<u16> for $name {
            fn from(value: u16) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:04x}", self.0)
            }
        }
    };
}

wire_id!(
    /// 服务标识，`(ServiceId, InstanceId)` 共同确定一个逻辑服务实例。
    ServiceId
);
wire_id!(
    /// 服务实例标识；不出现在线路上，由路由核心按端点解析。
    InstanceId
);
wire_id!(
    /// 方法或事件标识。
    MethodId
);
wire_id!(
    /// 发起请求的应用标识，构造中间件实例时分配。
    ClientId
);
wire_id!(
    /// 请求会话号，用于请求/响应配对。
    SessionId
);

impl ServiceId {
    /// 协议保留的服务号（`0x0000` 与 `0xFFFF`），不可被提供。
    pub const fn is_reserved(self) -> bool {
        matches!(self.0, 0x0000 | 0xffff)
    }
}

impl InstanceId {
    /// 通配实例号。
    pub const ANY: Self = Self(0xffff);
}

/// 接口主版本号。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct InterfaceVersion(pub u8);

impl fmt::Display for InterfaceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 报文类型。
///
/// # 契约说明（What）
/// - `Request`：期待响应的请求，是唯一允许触发错误回包的类型；
/// - `RequestNoReturn`：单向请求（fire & forget）；
/// - `Notification`：服务端推送的事件；
/// - `Response` / `Error`：对 `Request` 的应答。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// 期待响应的请求。
    Request = 0x00,
    /// 不期待响应的请求。
    RequestNoReturn = 0x01,
    /// 事件通知。
    Notification = 0x02,
    /// 正常响应。
    Response = 0x80,
    /// 错误响应。
    Error = 0x81,
}

impl MessageType {
    /// 从线路字节解析报文类型，未知取值返回 `None`。
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Request),
            0x01 => Some(Self::RequestNoReturn),
            0x02 => Some(Self::Notification),
            0x80 => Some(Self::Response),
            0x81 => Some(Self::Error),
            _ => None,
        }
    }

    /// 返回线路字节。
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// 是否需要对端回包。
    pub const fn expects_response(self) -> bool {
        matches!(self, Self::Request)
    }

    /// 是否为发往服务提供方的请求（含单向请求）。
    pub const fn is_request(self) -> bool {
        matches!(self, Self::Request | Self::RequestNoReturn)
    }

    /// 是否为对先前请求的应答。
    pub const fn is_reply(self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "request",
            Self::RequestNoReturn => "request_no_return",
            Self::Notification => "notification",
            Self::Response => "response",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// 返回码。
///
/// # 教案解读
/// - 协议保留区间内的未知取值以 [`ReturnCode::Reserved`] 原样保存，解析阶段不因此拒绝报文；
/// - 路由核心生成错误回包时只使用具名变体。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ReturnCode {
    /// 成功。
    Ok,
    /// 未指明原因的失败。
    NotOk,
    /// 目标服务未知。
    UnknownService,
    /// 目标方法未知。
    UnknownMethod,
    /// 服务已登记但尚未就绪。
    NotReady,
    /// 服务不可达。
    NotReachable,
    /// 超时。
    Timeout,
    /// 协议版本不受支持。
    WrongProtocolVersion,
    /// 接口版本不匹配。
    WrongInterfaceVersion,
    /// 报文无法解析。
    MalformedMessage,
    /// 报文类型与预期不符。
    WrongMessageType,
    /// 其他保留或厂商扩展取值。
    Reserved(u8),
}

impl ReturnCode {
    /// 从线路字节解析返回码。
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Ok,
            0x01 => Self::NotOk,
            0x02 => Self::UnknownService,
            0x03 => Self::UnknownMethod,
            0x04 => Self::NotReady,
            0x05 => Self::NotReachable,
            0x06 => Self::Timeout,
            0x07 => Self::WrongProtocolVersion,
            0x08 => Self::WrongInterfaceVersion,
            0x09 => Self::MalformedMessage,
            0x0a => Self::WrongMessageType,
            other => Self::Reserved(other),
        }
    }

    /// 返回线路字节。
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::NotOk => 0x01,
            Self::UnknownService => 0x02,
            Self::UnknownMethod => 0x03,
            Self::NotReady => 0x04,
            Self::NotReachable => 0x05,
            Self::Timeout => 0x06,
            Self::WrongProtocolVersion => 0x07,
            Self::WrongInterfaceVersion => 0x08,
            Self::MalformedMessage => 0x09,
            Self::WrongMessageType => 0x0a,
            Self::Reserved(value) => value,
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_code_keeps_reserved_values() {
        for value in 0u8..=0xff {
            assert_eq!(ReturnCode::from_u8(value).as_u8(), value);
        }
        assert_eq!(ReturnCode::from_u8(0x42), ReturnCode::Reserved(0x42));
    }

    #[test]
    fn only_plain_requests_expect_response() {
        assert!(MessageType::Request.expects_response());
        assert!(!MessageType::RequestNoReturn.expects_response());
        assert!(MessageType::RequestNoReturn.is_request());
        assert!(MessageType::Error.is_reply());
        assert_eq!(MessageType::from_u8(0x03), None);
    }

    #[test]
    fn ids_display_as_hex() {
        assert_eq!(ServiceId(0x1234).to_string(), "0x1234");
        assert_eq!(InstanceId::from(1).to_string(), "0x0001");
    }
}
