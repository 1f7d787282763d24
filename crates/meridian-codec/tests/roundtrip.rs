//! 编解码器的性质测试。
//!
//! # 教案定位（Why）
//! - 路由核心依赖“反序列化(序列化(m)) == m”这一性质在发送与接收路径之间搬运报文；
//! - 分帧器需保证：任意拼接的合法帧与 Cookie，在不开启重同步时也能被原样切回。

use meridian_codec::{
    ClientId, CookieKind, Frame, FrameReader, InterfaceVersion, Message, MessageCodec,
    MessageType, MethodId, ReturnCode, ServiceId, SessionId, SomeIpCodec,
};
use proptest::prelude::*;

fn message_type() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::Request),
        Just(MessageType::RequestNoReturn),
        Just(MessageType::Notification),
        Just(MessageType::Response),
        Just(MessageType::Error),
    ]
}

fn message() -> impl Strategy<Value = Message> {
    (
        any::<u16>(),
        any::<u16>(),
        any::<u16>(),
        any::<u16>(),
        any::<u8>(),
        message_type(),
        any::<u8>(),
        proptest::collection::vec(any::<u8>(), 0..256),
    )
        .prop_map(
            |(service, method, client, session, iface, kind, rc, payload)| Message {
                service: ServiceId(service),
                method: MethodId(method),
                client: ClientId(client),
                session: SessionId(session),
                interface_version: InterfaceVersion(iface),
                message_type: kind,
                return_code: ReturnCode::from_u8(rc),
                instance: None,
                peer: None,
                payload: payload.into(),
            },
        )
}

proptest! {
    #[test]
    fn deserialize_inverts_serialize(message in message()) {
        let codec = SomeIpCodec::new();
        let bytes = codec.serialize(&message).expect("serialize");
        prop_assert_eq!(bytes.len(), 16 + message.payload.len());
        prop_assert_eq!(codec.deserialize(&bytes).expect("deserialize"), message);
    }

    #[test]
    fn reader_splits_concatenated_stream(
        messages in proptest::collection::vec(message(), 1..8),
        cookie_mask in any::<u8>(),
    ) {
        let codec = SomeIpCodec::new();
        let mut stream = Vec::new();
        let mut expected = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            if cookie_mask & (1 << index) != 0 {
                stream.extend_from_slice(CookieKind::Client.bytes());
            }
            let bytes = codec.serialize(message).expect("serialize");
            stream.extend_from_slice(&bytes);
            expected.push(message.clone());
        }

        let decoded: Vec<Message> = FrameReader::new(&stream, false)
            .filter_map(|frame| match frame {
                Frame::Message(bytes) => Some(codec.deserialize(bytes).expect("frame")),
                _ => None,
            })
            .collect();
        prop_assert_eq!(decoded, expected);
    }
}

#[test]
fn serialized_header_matches_wire_layout() {
    let message = Message::request(ServiceId(0x1234), Default::default(), MethodId(0x0001))
        .with_client(ClientId(0x0100))
        .with_session(SessionId(0x0002))
        .with_interface_version(InterfaceVersion(1))
        .with_payload(&[0xca, 0xfe][..]);
    let bytes = SomeIpCodec::new().serialize(&message).expect("serialize");
    assert_eq!(
        &bytes[..],
        &[
            0x12, 0x34, 0x00, 0x01, 0x00, 0x00, 0x00, 0x0a, 0x01, 0x00, 0x00, 0x02, 0x01, 0x01,
            0x00, 0x00, 0xca, 0xfe,
        ]
    );
}
