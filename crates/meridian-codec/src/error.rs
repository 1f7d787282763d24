//! 编解码错误类型定义。
//!
//! # 教案定位（Why）
//! - 路由核心收到无法解析的字节时只需“丢弃并记录”，但日志里必须能看出是截断、版本不符
//!   还是长度字段造假，因此每类校验失败都有独立分支；
//! - 每个分支同时提供稳定错误码（[`CodecError::code`]），方便日志聚合与告警按码归类。
//!
//! # 使用契约（What）
//! - 所有错误均表示“当前字节片段无法还原成报文”，调用方不得继续使用部分解析结果；
//! - 枚举实现 `Clone`/`PartialEq`，测试可以直接断言具体分支。

use thiserror::Error;

/// 序列化与反序列化过程中可能出现的错误。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CodecError {
    /// 输入不足以容纳 16 字节头部。
    #[error("frame truncated: need {needed} bytes, got {available}")]
    Truncated {
        /// 至少需要的字节数。
        needed: usize,
        /// 实际可用的字节数。
        available: usize,
    },
    /// 长度字段与实际字节数不一致，或小于头部尾段的 8 字节。
    #[error("length field declares {declared} bytes after the length word, {available} available")]
    LengthMismatch {
        /// 长度字段声明值。
        declared: u32,
        /// 长度字段之后实际可用的字节数。
        available: usize,
    },
    /// 协议版本号不受支持。
    #[error("unsupported protocol version {version:#04x}")]
    WrongProtocolVersion {
        /// 实际读到的版本号。
        version: u8,
    },
    /// 报文类型字节不在已知取值内。
    #[error("unknown message type {value:#04x}")]
    UnknownMessageType {
        /// 实际读到的类型字节。
        value: u8,
    },
    /// Payload 超出编解码器配置的上限。
    #[error("payload of {len} bytes exceeds limit {limit}")]
    PayloadTooLarge {
        /// 实际 payload 长度。
        len: usize,
        /// 配置上限。
        limit: usize,
    },
}

impl CodecError {
    /// 返回稳定的点分错误码，用于日志与告警聚合。
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Truncated { .. } => "codec.truncated",
            Self::LengthMismatch { .. } => "codec.length_mismatch",
            Self::WrongProtocolVersion { .. } => "codec.protocol_version",
            Self::UnknownMessageType { .. } => "codec.message_type",
            Self::PayloadTooLarge { .. } => "codec.payload_too_large",
        }
    }
}
