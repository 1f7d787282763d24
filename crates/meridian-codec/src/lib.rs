#![warn(missing_docs)]

//! # meridian-codec
//!
//! ## 定位与职责（Why）
//! - 为 `meridian-core` 的消息管线提供“序列化/反序列化协作者”：路由核心只依赖
//!   [`MessageCodec`] 契约，具体报文头布局集中在本 crate；
//! - 附带 Magic Cookie 标记与字节流分帧（[`FrameReader`]），使字节流传输在读到残缺数据后
//!   仍能重新对齐报文边界。
//!
//! ## 报文布局（What）
//! 固定 16 字节头部，全部字段为网络序：
//!
//! ```text
//! +--------+--------+--------+--------+
//! |   Service ID    |   Method ID     |
//! +--------+--------+--------+--------+
//! |              Length               |  = 8 + payload 长度
//! +--------+--------+--------+--------+
//! |   Client ID     |   Session ID    |
//! +--------+--------+--------+--------+
//! | Proto  | Iface  | MsgType| RetCode|
//! +--------+--------+--------+--------+
//! |            Payload ...            |
//! ```
//!
//! ## 边界（Trade-offs）
//! - Payload 视为不透明字节，业务载荷的编码不在本 crate 范围内；
//! - 实例号（Instance ID）不出现在线路上，由路由核心根据端点反查，故 [`Message::instance`]
//!   在反序列化结果中恒为 `None`；[`Message::peer`] 同理，由接收路径填入来源端点。

mod codec;
mod cookie;
mod endpoint;
mod error;
mod frame;
mod header;
mod message;
mod types;

pub use codec::{DEFAULT_MAX_PAYLOAD, MessageCodec, SomeIpCodec};
pub use cookie::{
    CLIENT_MAGIC_COOKIE, CookieKind, MAGIC_COOKIE_LEN, SERVICE_MAGIC_COOKIE, find_magic_cookie,
    is_magic_cookie, magic_cookie_kind,
};
pub use endpoint::{Endpoint, TransportKind};
pub use error::CodecError;
pub use frame::{Frame, FrameReader};
pub use header::{HEADER_SIZE, Header, LENGTH_BASE};
pub use message::Message;
pub use types::{
    ClientId, InstanceId, InterfaceVersion, MessageType, MethodId, PROTOCOL_VERSION, ReturnCode,
    ServiceId, SessionId,
};
