//! 传输协作者契约。
//!
//! # 教案定位（Why）
//! - 路由核心不直接做网络 I/O，只把序列化后的字节交给传输层；传输层可以是 UDP、TCP
//!   或测试中的录制桩；
//! - [`TransportHub`] 以本地端点为键保存已挂载的传输，使同一核心可同时服务多个套接字与多种传输。
//!
//! # 契约说明（What）
//! - `send` 只表示“传输层是否接受了这次写入”，不代表对端已收到；
//! - 返回 [`TransportError::EndpointInvalidated`] 时，管线会按端点清理全部路由状态。

use std::io;
use std::sync::Arc;

use meridian_codec::{Endpoint, TransportKind};
use parking_lot::RwLock;
use thiserror::Error;

/// 传输层报告的失败。
#[derive(Debug, Error)]
pub enum TransportError {
    /// 目标端点已失效，不可再使用。
    #[error("endpoint {endpoint} has been invalidated")]
    EndpointInvalidated {
        /// 失效端点。
        endpoint: Endpoint,
    },
    /// 传输层拒绝本次写入（发送队列满、无匹配传输等）。
    #[error("transport rejected write to {endpoint}: {reason}")]
    Rejected {
        /// 目标端点。
        endpoint: Endpoint,
        /// 拒绝原因。
        reason: &'static str,
    },
    /// 底层 I/O 失败。
    #[error("transport i/o failure on {endpoint}: {source}")]
    Io {
        /// 相关端点。
        endpoint: Endpoint,
        /// 原始 I/O 错误。
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// 稳定错误码。
    pub const fn code(&self) -> &'static str {
        match self {
            Self::EndpointInvalidated { .. } => "transport.endpoint_invalidated",
            Self::Rejected { .. } => "transport.rejected",
            Self::Io { .. } => "transport.io",
        }
    }
}

/// 出站字节的发送契约。
pub trait Transport: Send + Sync + 'static {
    /// 本传输绑定的本地端点；出站报文以它为源地址。
    fn local_endpoint(&self) -> Endpoint;

    /// 向 `target` 写出一帧或多帧字节。
    ///
    /// `flush` 为真时要求绕过合并缓冲立即发送；不做合并的实现可以忽略它。
    fn send(&self, bytes: &[u8], target: &Endpoint, flush: bool) -> Result<(), TransportError>;
}

/// 以本地端点为键的传输集合。
///
/// # 契约说明（What）
/// - 同一本地端点只保留最后挂载的实现；
/// - 发送时优先使用 `local` 指定的传输，使响应与错误回包从收到请求的那个套接字发出；
/// - 未指定或未挂载时退回与目标同类型、最先挂载的传输。
#[derive(Default)]
pub struct TransportHub {
    transports: RwLock<Vec<Arc<dyn Transport>>>,
}

impl TransportHub {
    /// 构造空集合。
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂载一个传输实现，返回被替换的旧实现。
    pub fn attach(&self, transport: Arc<dyn Transport>) -> Option<Arc<dyn Transport>> {
        let local = transport.local_endpoint();
        let mut transports = self.transports.write();
        match transports
            .iter_mut()
            .find(|attached| attached.local_endpoint() == local)
        {
            Some(slot) => Some(std::mem::replace(slot, transport)),
            None => {
                transports.push(transport);
                None
            }
        }
    }

    /// 已挂载的传输数量。
    pub fn len(&self) -> usize {
        self.transports.read().len()
    }

    /// 是否尚未挂载任何传输。
    pub fn is_empty(&self) -> bool {
        self.transports.read().is_empty()
    }

    /// 挂载在 `local` 上的传输。
    pub fn get(&self, local: &Endpoint) -> Option<Arc<dyn Transport>> {
        self.transports
            .read()
            .iter()
            .find(|transport| transport.local_endpoint() == *local)
            .cloned()
    }

    fn select(&self, local: Option<&Endpoint>, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        let transports = self.transports.read();
        local
            .filter(|local| local.kind() == kind)
            .and_then(|local| {
                transports
                    .iter()
                    .find(|transport| transport.local_endpoint() == *local)
            })
            .or_else(|| {
                transports
                    .iter()
                    .find(|transport| transport.local_endpoint().kind() == kind)
            })
            .cloned()
    }

    /// 从 `local`（缺省时任选同类型传输）向 `target` 写出字节。
    pub fn send(
        &self,
        bytes: &[u8],
        local: Option<&Endpoint>,
        target: &Endpoint,
        flush: bool,
    ) -> Result<(), TransportError> {
        let transport = self
            .select(local, target.kind())
            .ok_or(TransportError::Rejected {
                endpoint: *target,
                reason: "no transport attached for this kind",
            })?;
        transport.send(bytes, target, flush)
    }
}

impl core::fmt::Debug for TransportHub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransportHub")
            .field("transports", &self.len())
            .finish()
    }
}
