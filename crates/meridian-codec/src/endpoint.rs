//! 端点身份。
//!
//! # 教案定位（Why）
//! - 路由表、实例反查表与对象池都以“对端是谁”作为键；若持有传输层的连接对象引用，
//!   连接失效后就会留下悬挂引用；
//! - 这里以值类型的 `(地址, 传输类型)` 作为稳定身份键，传输层报告失效时按键清理即可；
//! - 接收到的报文经 [`crate::Message::peer`] 携带来源端点。
//!
//! # 契约说明（What）
//! - 同一条连接/关联在生命周期内的 [`Endpoint`] 恒定不变；
//! - 相同地址上的 UDP 与 TCP 视为两个不同端点；
//! - 端点从不出现在线路上。

use core::fmt;
use std::net::SocketAddr;

use serde::Deserialize;

/// 传输类型。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// 数据报传输，每个数据报承载完整报文。
    Udp,
    /// 字节流传输，需要分帧，可选 Magic Cookie 重同步。
    Tcp,
}

impl TransportKind {
    /// 是否为字节流传输。
    pub const fn is_stream(self) -> bool {
        matches!(self, Self::Tcp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        })
    }
}

/// 对端身份键。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Endpoint {
    addr: SocketAddr,
    kind: TransportKind,
}

impl Endpoint {
    /// 以地址与传输类型构造端点。
    pub const fn new(addr: SocketAddr, kind: TransportKind) -> Self {
        Self { addr, kind }
    }

    /// UDP 端点。
    pub const fn udp(addr: SocketAddr) -> Self {
        Self::new(addr, TransportKind::Udp)
    }

    /// TCP 端点。
    pub const fn tcp(addr: SocketAddr) -> Self {
        Self::new(addr, TransportKind::Tcp)
    }

    /// 套接字地址。
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// 传输类型。
    pub const fn kind(&self) -> TransportKind {
        self.kind
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind, self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_part_of_identity() {
        let addr: SocketAddr = "127.0.0.1:30509".parse().expect("addr");
        assert_ne!(Endpoint::udp(addr), Endpoint::tcp(addr));
        assert_eq!(Endpoint::tcp(addr).to_string(), "tcp://127.0.0.1:30509");
    }
}
