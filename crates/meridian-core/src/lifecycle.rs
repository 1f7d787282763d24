//! 单线程 reactor 与生命周期状态。
//!
//! # 教案级注释
//! - **意图 (Why)**：
//!   - 反序列化、路由与回调分发都在同一个事件循环上执行，路由表不需要为“循环内部”的并发做额外设计；
//!   - 传输任务与其它线程只通过 [`ReactorHandle`] 投递事件，`stop` 可以从任意线程调用。
//! - **设计与逻辑 (How)**：
//!   - `init` 构建 tokio current-thread 运行时、有界入站队列、无界控制队列（端点失效）与 `watch` 停机信号；
//!   - `run` 阻塞调用线程，`biased` 选择依次检查停机信号、控制事件、入站事件：停机被接受后不再取出任何入站事件；
//!   - 所有句柄被丢弃时循环同样退出。
//! - **契约 (What)**：
//!   - 入站队列满时 `deliver` 立即返回错误，不阻塞传输任务（数据报语义下等同丢包）；
//!   - 端点失效走控制队列，不会因入站拥塞而丢失；
//!   - 正在执行的回调不会被打断，停机在当前事件处理完成后生效。

use core::fmt;
use std::sync::Arc;

use bytes::Bytes;
use meridian_codec::Endpoint;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::RouterConfig;
use crate::error::LifecycleError;
use crate::scheduler::ReactorScheduler;
use crate::transport::TransportError;

/// 生命周期状态：`Created → Initialized → Running → Stopped`。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LifecycleState {
    /// 已构造，尚未初始化。
    Created,
    /// reactor 已就绪。
    Initialized,
    /// 事件循环运行中。
    Running,
    /// 已停止，不可重启。
    Stopped,
}

impl LifecycleState {
    /// 状态名称。
    pub const fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }

    pub(crate) fn invalid(self, operation: &'static str) -> LifecycleError {
        LifecycleError::InvalidState {
            operation,
            state: self.name(),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// reactor 循环交给接收方的事件。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReactorEvent {
    /// 传输层收到的字节。
    Received {
        /// 原始字节。
        bytes: Bytes,
        /// 来源端点。
        source: Endpoint,
        /// 本地接收端点。
        target: Endpoint,
    },
    /// 传输层报告端点失效。
    Invalidated(Endpoint),
}

/// 投递事件与请求停机的句柄，可跨线程克隆。
#[derive(Clone)]
pub struct ReactorHandle {
    inbound: mpsc::Sender<ReactorEvent>,
    control: mpsc::UnboundedSender<Endpoint>,
    stop: Arc<watch::Sender<bool>>,
    runtime: Handle,
}

impl ReactorHandle {
    /// 投递收到的字节；队列满或 reactor 已退出时返回 `Rejected`。
    pub fn deliver(
        &self,
        bytes: Bytes,
        source: Endpoint,
        target: Endpoint,
    ) -> Result<(), TransportError> {
        let event = ReactorEvent::Received {
            bytes,
            source,
            target,
        };
        self.inbound.try_send(event).map_err(|error| {
            let reason = match error {
                mpsc::error::TrySendError::Full(_) => "inbound queue full",
                mpsc::error::TrySendError::Closed(_) => "reactor has exited",
            };
            debug!(%source, %target, reason, "inbound datagram dropped");
            TransportError::Rejected {
                endpoint: source,
                reason,
            }
        })
    }

    /// 报告端点失效。
    pub fn invalidate(&self, endpoint: Endpoint) {
        if self.control.send(endpoint).is_err() {
            debug!(%endpoint, "invalidation after reactor exit ignored");
        }
    }

    /// 请求停机；可重复调用。
    pub fn stop(&self) {
        if !self.stop.send_replace(true) {
            info!("reactor stop requested");
        }
    }

    /// 是否已请求停机。
    pub fn is_stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// 基于 reactor 运行时的调度器。
    pub fn scheduler(&self) -> ReactorScheduler {
        ReactorScheduler::new(self.runtime.clone())
    }

    /// reactor 运行时句柄，供传输实现注册 I/O 与派生任务。
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

impl fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("stop_requested", &self.is_stop_requested())
            .finish_non_exhaustive()
    }
}

/// 拥有运行时与事件队列接收端的单线程 reactor。
pub struct Reactor {
    runtime: Runtime,
    inbound: mpsc::Receiver<ReactorEvent>,
    control: mpsc::UnboundedReceiver<Endpoint>,
    stop: watch::Receiver<bool>,
    handle: ReactorHandle,
}

impl Reactor {
    /// 构建运行时与事件队列，入站队列容量取自 `routing.inbound_queue`。
    pub fn init(config: &RouterConfig) -> Result<Self, LifecycleError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name(format!("{}-reactor", config.application.name))
            .build()
            .map_err(LifecycleError::Runtime)?;
        let (inbound_tx, inbound) = mpsc::channel(config.routing.inbound_queue.max(1));
        let (control_tx, control) = mpsc::unbounded_channel();
        let (stop_tx, stop) = watch::channel(false);
        let handle = ReactorHandle {
            inbound: inbound_tx,
            control: control_tx,
            stop: Arc::new(stop_tx),
            runtime: runtime.handle().clone(),
        };
        debug!(queue = config.routing.inbound_queue, "reactor initialized");
        Ok(Self {
            runtime,
            inbound,
            control,
            stop,
            handle,
        })
    }

    /// 获取一个句柄。
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// 阻塞当前线程运行事件循环，直到停机或所有句柄被丢弃。
    ///
    /// 不可在 tokio 运行时内部调用。
    pub fn run<F>(self, mut sink: F)
    where
        F: FnMut(ReactorEvent),
    {
        let Self {
            runtime,
            mut inbound,
            mut control,
            mut stop,
            handle,
        } = self;
        drop(handle);

        runtime.block_on(async {
            loop {
                if *stop.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    Some(endpoint) = control.recv() => sink(ReactorEvent::Invalidated(endpoint)),
                    event = inbound.recv() => match event {
                        Some(event) => sink(event),
                        None => break,
                    },
                }
            }
        });
        info!("reactor loop exited");
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
