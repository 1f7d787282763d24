//! 序列化/反序列化协作者契约与默认实现。
//!
//! # 教案定位（Why）
//! - 路由核心只需“字节 ⇄ 报文”的双向转换，不关心具体布局；抽象为 [`MessageCodec`] 后，
//!   测试可注入故障编解码器验证 `SerializationFault` 路径；
//! - [`SomeIpCodec`] 是随仓库提供的默认实现，使管线可以端到端运行。
//!
//! # 校验顺序（How）
//! 反序列化按“头部长度 → 协议版本 → 长度字段 → payload 上限 → 报文类型”的顺序校验。
//! 版本不符的报文即便长度也不对，仍报告 `WrongProtocolVersion`。

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::header::{HEADER_SIZE, Header, LENGTH_BASE};
use crate::message::Message;
use crate::types::{MessageType, PROTOCOL_VERSION};

/// 默认 payload 上限：1 MiB。
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// 路由核心消费的编解码契约。
///
/// # 契约说明（What）
/// - `serialize` 失败属于本地构造错误，调用方应上报而非静默丢弃；
/// - `deserialize` 输入必须恰好是一帧，多余或不足的字节都视为长度不符；
/// - 反序列化结果的 `instance` 恒为 `None`。
pub trait MessageCodec: Send + Sync + 'static {
    /// 将报文编码为一帧完整字节。
    fn serialize(&self, message: &Message) -> Result<Bytes, CodecError>;

    /// 将一帧字节还原为报文。
    fn deserialize(&self, bytes: &[u8]) -> Result<Message, CodecError>;
}

/// 16 字节头部的默认编解码器。
#[derive(Clone, Copy, Debug)]
pub struct SomeIpCodec {
    max_payload: usize,
}

impl SomeIpCodec {
    /// 使用默认 payload 上限构造。
    pub const fn new() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// 指定 payload 上限。
    pub const fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// 当前 payload 上限。
    pub const fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for SomeIpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec for SomeIpCodec {
    fn serialize(&self, message: &Message) -> Result<Bytes, CodecError> {
        let len = message.payload.len();
        let fits_length_field = u32::try_from(len)
            .ok()
            .and_then(|value| value.checked_add(LENGTH_BASE))
            .is_some();
        if len > self.max_payload || !fits_length_field {
            return Err(CodecError::PayloadTooLarge {
                len,
                limit: self.max_payload,
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + len);
        message.header().write_to(&mut buf);
        buf.put_slice(&message.payload);
        Ok(buf.freeze())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        let header = Header::peek(bytes).ok_or(CodecError::Truncated {
            needed: HEADER_SIZE,
            available: bytes.len(),
        })?;

        if header.protocol_version != PROTOCOL_VERSION {
            return Err(CodecError::WrongProtocolVersion {
                version: header.protocol_version,
            });
        }

        let after_length = bytes.len() - LENGTH_BASE as usize;
        if header.length < LENGTH_BASE || header.frame_len() != bytes.len() as u64 {
            return Err(CodecError::LengthMismatch {
                declared: header.length,
                available: after_length,
            });
        }

        let payload_len = bytes.len() - HEADER_SIZE;
        if payload_len > self.max_payload {
            return Err(CodecError::PayloadTooLarge {
                len: payload_len,
                limit: self.max_payload,
            });
        }

        let message_type =
            MessageType::from_u8(header.message_type).ok_or(CodecError::UnknownMessageType {
                value: header.message_type,
            })?;

        Ok(Message {
            service: header.service,
            method: header.method,
            client: header.client,
            session: header.session,
            interface_version: header.interface_version,
            message_type,
            return_code: header.return_code(),
            instance: None,
            peer: None,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstanceId, MethodId, ServiceId};

    fn sample() -> Message {
        Message::request(ServiceId(0x1234), InstanceId(1), MethodId(0x0421))
            .with_payload(&b"hello"[..])
    }

    #[test]
    fn version_is_checked_before_length() {
        let codec = SomeIpCodec::new();
        let mut raw = codec.serialize(&sample()).expect("serialize").to_vec();
        raw[12] = 0x02;
        raw.truncate(HEADER_SIZE + 1);
        assert_eq!(
            codec.deserialize(&raw),
            Err(CodecError::WrongProtocolVersion { version: 0x02 })
        );
    }

    #[test]
    fn trailing_bytes_are_a_length_mismatch() {
        let codec = SomeIpCodec::new();
        let mut raw = codec.serialize(&sample()).expect("serialize").to_vec();
        raw.push(0);
        let err = codec.deserialize(&raw).expect_err("must fail");
        assert_eq!(err.code(), "codec.length_mismatch");
    }

    #[test]
    fn unknown_type_is_reported_after_framing_checks() {
        let codec = SomeIpCodec::new();
        let mut raw = codec.serialize(&sample()).expect("serialize").to_vec();
        raw[14] = 0x7f;
        assert_eq!(
            codec.deserialize(&raw),
            Err(CodecError::UnknownMessageType { value: 0x7f })
        );
    }

    #[test]
    fn payload_limit_applies_both_ways() {
        let codec = SomeIpCodec::with_max_payload(4);
        assert!(matches!(
            codec.serialize(&sample()),
            Err(CodecError::PayloadTooLarge { len: 5, limit: 4 })
        ));
        let raw = SomeIpCodec::new().serialize(&sample()).expect("serialize");
        assert!(matches!(
            codec.deserialize(&raw),
            Err(CodecError::PayloadTooLarge { len: 5, limit: 4 })
        ));
    }
}
