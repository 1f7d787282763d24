//! 16 字节固定头部的读写。

use bytes::{BufMut, BytesMut};

use crate::types::{
    ClientId, InterfaceVersion, MessageType, MethodId, ReturnCode, ServiceId, SessionId,
};

/// 头部总长度。
pub const HEADER_SIZE: usize = 16;

/// 长度字段覆盖的头部尾段（Client ID 起的 8 字节）。
pub const LENGTH_BASE: u32 = 8;

/// 原样保存线路字段的头部视图。
///
/// # 教案解读
/// - 报文类型与返回码保存为原始字节：错误回包路径需要在“类型未知”的报文上也能读到
///   服务号与会话号，因此解析头部本身不做语义校验；
/// - 语义视图通过 [`Header::message_type`] 与 [`Header::return_code`] 按需获取。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Header {
    /// 服务号。
    pub service: ServiceId,
    /// 方法号。
    pub method: MethodId,
    /// 长度字段，等于 `8 + payload.len()`。
    pub length: u32,
    /// 客户端号。
    pub client: ClientId,
    /// 会话号。
    pub session: SessionId,
    /// 协议版本。
    pub protocol_version: u8,
    /// 接口版本。
    pub interface_version: InterfaceVersion,
    /// 报文类型原始字节。
    pub message_type: u8,
    /// 返回码原始字节。
    pub return_code: u8,
}

impl Header {
    /// 读取字节片段开头的头部，不足 16 字节时返回 `None`。
    ///
    /// 只做字段切分，不校验版本、长度或类型。
    pub fn peek(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        let be16 = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
        Some(Self {
            service: ServiceId(be16(0)),
            method: MethodId(be16(2)),
            length: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            client: ClientId(be16(8)),
            session: SessionId(be16(10)),
            protocol_version: bytes[12],
            interface_version: InterfaceVersion(bytes[13]),
            message_type: bytes[14],
            return_code: bytes[15],
        })
    }

    /// 按网络序写出 16 字节。
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u16(self.service.0);
        dst.put_u16(self.method.0);
        dst.put_u32(self.length);
        dst.put_u16(self.client.0);
        dst.put_u16(self.session.0);
        dst.put_u8(self.protocol_version);
        dst.put_u8(self.interface_version.0);
        dst.put_u8(self.message_type);
        dst.put_u8(self.return_code);
    }

    /// 语义化的报文类型，未知取值返回 `None`。
    pub const fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    /// 语义化的返回码。
    pub const fn return_code(&self) -> ReturnCode {
        ReturnCode::from_u8(self.return_code)
    }

    /// 长度字段声明的整帧字节数（含前 8 字节）。
    pub const fn frame_len(&self) -> u64 {
        LENGTH_BASE as u64 + self.length as u64
    }

    /// 声明的 payload 长度；长度字段小于 8 时返回 `None`。
    pub const fn payload_len(&self) -> Option<u32> {
        self.length.checked_sub(LENGTH_BASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_reads_network_order() {
        let raw = [
            0x12, 0x34, 0x80, 0x01, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x07, 0x00, 0x02, 0x01, 0x03,
            0x00, 0x00, 0xaa, 0xbb,
        ];
        let header = Header::peek(&raw).expect("header");
        assert_eq!(header.service, ServiceId(0x1234));
        assert_eq!(header.method, MethodId(0x8001));
        assert_eq!(header.length, 10);
        assert_eq!(header.client, ClientId(7));
        assert_eq!(header.session, SessionId(2));
        assert_eq!(header.interface_version, InterfaceVersion(3));
        assert_eq!(header.message_type(), Some(MessageType::Request));
        assert_eq!(header.frame_len(), 18);
        assert_eq!(header.payload_len(), Some(2));

        let mut out = BytesMut::new();
        header.write_to(&mut out);
        assert_eq!(&out[..], &raw[..HEADER_SIZE]);
    }

    #[test]
    fn peek_rejects_short_input() {
        assert!(Header::peek(&[0u8; HEADER_SIZE - 1]).is_none());
    }
}
