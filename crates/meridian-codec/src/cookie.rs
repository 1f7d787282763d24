//! Magic Cookie：字节流传输上的重同步标记。
//!
//! # 教案定位（Why）
//! - 面向字节流（TCP）时，一旦某帧长度字段损坏，后续所有边界都会错位；
//! - 发送方在帧前插入固定 16 字节的 Cookie 帧，接收方扫描到 Cookie 即可重新对齐。
//!
//! # 契约说明（What）
//! - 客户端 Cookie：服务号 `0xFFFF`、方法号 `0x0000`、类型 `RequestNoReturn`；
//! - 服务端 Cookie：服务号 `0xFFFF`、方法号 `0x8000`、类型 `Notification`；
//! - 两者的客户端号/会话号固定为 `0xDEAD`/`0xBEEF`，长度字段为 8（无 payload）。

/// Cookie 帧长度。
pub const MAGIC_COOKIE_LEN: usize = 16;

/// 客户端方向的 Cookie 帧。
pub const CLIENT_MAGIC_COOKIE: [u8; MAGIC_COOKIE_LEN] = [
    0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0xde, 0xad, 0xbe, 0xef, 0x01, 0x01, 0x01, 0x00,
];

/// 服务端方向的 Cookie 帧。
pub const SERVICE_MAGIC_COOKIE: [u8; MAGIC_COOKIE_LEN] = [
    0xff, 0xff, 0x80, 0x00, 0x00, 0x00, 0x00, 0x08, 0xde, 0xad, 0xbe, 0xef, 0x01, 0x01, 0x02, 0x00,
];

/// Cookie 方向。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CookieKind {
    /// 由请求方发出。
    Client,
    /// 由服务提供方发出。
    Service,
}

impl CookieKind {
    /// 该方向对应的 16 字节标记。
    pub const fn bytes(self) -> &'static [u8; MAGIC_COOKIE_LEN] {
        match self {
            Self::Client => &CLIENT_MAGIC_COOKIE,
            Self::Service => &SERVICE_MAGIC_COOKIE,
        }
    }
}

/// 判断片段开头是否为 Cookie 帧，并返回其方向。
pub fn magic_cookie_kind(bytes: &[u8]) -> Option<CookieKind> {
    let head = bytes.get(..MAGIC_COOKIE_LEN)?;
    if head == CLIENT_MAGIC_COOKIE {
        Some(CookieKind::Client)
    } else if head == SERVICE_MAGIC_COOKIE {
        Some(CookieKind::Service)
    } else {
        None
    }
}

/// 片段开头是否为任一方向的 Cookie 帧。
pub fn is_magic_cookie(bytes: &[u8]) -> bool {
    magic_cookie_kind(bytes).is_some()
}

/// 从 `from` 偏移起查找下一个 Cookie 帧的起始位置。
pub fn find_magic_cookie(bytes: &[u8], from: usize) -> Option<usize> {
    if bytes.len() < MAGIC_COOKIE_LEN {
        return None;
    }
    (from..=bytes.len() - MAGIC_COOKIE_LEN).find(|&at| is_magic_cookie(&bytes[at..]))
}
