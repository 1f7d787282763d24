#![doc = r#"
# meridian-transport-udp

## 模块使命（Why）
- **数据报通路**：为路由核心提供基于 Tokio `UdpSocket` 的 [`Transport`] 实现，出站字节直接写入套接字，
  入站数据报投递到 reactor 的入站队列；
- **与 reactor 同线程**：套接字注册在 reactor 的 current-thread 运行时上，收包任务与路由处理共享同一线程，
  不额外引入线程池。

## 核心契约（What）
- [`UdpTransport::bind`] 必须在 `ManagingApplication::init` 之后调用，依赖其返回的 `ReactorHandle`；
- `send` 非阻塞：套接字发送缓冲满时立即返回 `Rejected`，调用方视为丢包；
- 对端拒绝连接（ICMP 端口不可达）映射为 `EndpointInvalidated`，由管线清除该端点的路由状态；
- 入站队列满时数据报被丢弃并记录日志，收包任务继续运行；reactor 退出后收包任务随之结束；
- 收包出错（例如 ICMP 错误引发的 `ConnectionReset`）时按指数退避暂停，持续出错也不会占满 reactor 线程。

## 实现策略（How）
- 先以标准库套接字同步绑定，使端口冲突等错误在调用点立即暴露，再在 reactor 运行时上下文中转换为 Tokio 套接字；
- 数据报语义下 `flush` 没有意义，每次 `send` 都是一次独立写入。
"#]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use meridian_core::{Endpoint, ReactorHandle, Transport, TransportError, TransportKind};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 单个数据报的最大长度。
pub const MAX_DATAGRAM: usize = 65_535;

/// 收包连续出错时的首次退避。
pub const RECEIVE_BACKOFF_MIN: Duration = Duration::from_millis(1);

/// 收包退避上限。
pub const RECEIVE_BACKOFF_MAX: Duration = Duration::from_millis(200);

/// 绑定或查询套接字时的错误。
#[derive(Debug, Error)]
pub enum UdpError {
    /// 绑定失败。
    #[error("failed to bind udp socket on {addr}: {source}")]
    Bind {
        /// 请求绑定的地址。
        addr: SocketAddr,
        /// 原始错误。
        #[source]
        source: io::Error,
    },
    /// 查询本地地址失败。
    #[error("failed to query local address: {0}")]
    LocalAddr(#[source] io::Error),
}

impl UdpError {
    /// 稳定错误码。
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "udp.bind",
            Self::LocalAddr(_) => "udp.local_addr",
        }
    }
}

/// 绑定在本地端点上的 UDP 传输。
///
/// # 契约说明（What）
/// - 一个实例对应一个本地套接字；同一 `ManagingApplication` 可挂载多个实例，
///   `TransportHub` 以 [`Transport::local_endpoint`] 区分它们，响应从收到请求的套接字发出；
/// - 实例被丢弃时收包任务被中止。
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local: Endpoint,
    receiver: JoinHandle<()>,
}

impl UdpTransport {
    /// 绑定 `addr` 并在 reactor 上启动收包任务。
    ///
    /// # 前置条件
    /// - `handle` 来自已初始化的 reactor；端口为 0 时由系统分配，可通过 [`Transport::local_endpoint`] 查询。
    pub fn bind(addr: SocketAddr, handle: &ReactorHandle) -> Result<Arc<Self>, UdpError> {
        let bind_error = |source| UdpError::Bind { addr, source };
        let std_socket = std::net::UdpSocket::bind(addr).map_err(bind_error)?;
        std_socket.set_nonblocking(true).map_err(bind_error)?;

        let _runtime = handle.runtime().enter();
        let socket = Arc::new(UdpSocket::from_std(std_socket).map_err(bind_error)?);
        let local = Endpoint::udp(socket.local_addr().map_err(UdpError::LocalAddr)?);
        let receiver = handle.runtime().spawn(receive_loop(
            Arc::clone(&socket),
            local,
            handle.clone(),
        ));
        info!(%local, "udp transport bound");
        Ok(Arc::new(Self {
            socket,
            local,
            receiver,
        }))
    }
}

/// 连续出错时的下一次退避：首次为下限，之后翻倍，不超过上限。
fn next_backoff(previous: Option<Duration>) -> Duration {
    previous.map_or(RECEIVE_BACKOFF_MIN, |last| {
        last.saturating_mul(2).min(RECEIVE_BACKOFF_MAX)
    })
}

async fn receive_loop(socket: Arc<UdpSocket>, local: Endpoint, handle: ReactorHandle) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    let mut backoff = None;
    loop {
        let (len, peer) = match socket.recv_from(&mut buffer).await {
            Ok(received) => {
                backoff = None;
                received
            }
            Err(error) => {
                if handle.is_stop_requested() {
                    break;
                }
                let delay = next_backoff(backoff);
                warn!(%local, %error, ?delay, "udp receive failed");
                backoff = Some(delay);
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        if handle.is_stop_requested() {
            break;
        }
        let datagram = Bytes::copy_from_slice(&buffer[..len]);
        if let Err(error) = handle.deliver(datagram, Endpoint::udp(peer), local) {
            if handle.is_stop_requested() {
                break;
            }
            warn!(%local, %peer, len, code = error.code(), %error, "datagram not delivered");
        }
    }
    debug!(%local, "udp receive loop finished");
}

impl Transport for UdpTransport {
    fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    fn send(&self, bytes: &[u8], target: &Endpoint, _flush: bool) -> Result<(), TransportError> {
        if target.kind() != TransportKind::Udp {
            return Err(TransportError::Rejected {
                endpoint: *target,
                reason: "udp transport cannot reach a stream endpoint",
            });
        }
        match self.socket.try_send_to(bytes, target.addr()) {
            Ok(written) if written == bytes.len() => Ok(()),
            Ok(_) => Err(TransportError::Rejected {
                endpoint: *target,
                reason: "datagram truncated",
            }),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Err(TransportError::Rejected {
                endpoint: *target,
                reason: "socket send buffer full",
            }),
            Err(error) if error.kind() == io::ErrorKind::ConnectionRefused => {
                Err(TransportError::EndpointInvalidated { endpoint: *target })
            }
            Err(source) => Err(TransportError::Io {
                endpoint: *target,
                source,
            }),
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

impl core::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_backoff_doubles_up_to_the_cap() {
        let mut delay = None;
        let mut seen = Vec::new();
        for _ in 0..10 {
            let next = next_backoff(delay);
            seen.push(next);
            delay = Some(next);
        }
        assert_eq!(seen[0], RECEIVE_BACKOFF_MIN);
        assert_eq!(seen[1], RECEIVE_BACKOFF_MIN * 2);
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(seen[9], RECEIVE_BACKOFF_MAX);
    }
}
