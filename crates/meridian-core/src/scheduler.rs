//! 调度能力抽象。
//!
//! # 教案定位（Why）
//! - 路由逻辑只需要“提交一个任务”与“登记一次性/周期定时器”两种能力；把它们抽象为
//!   [`Scheduler`]，路由核心就不直接依赖某个具体异步运行时；
//! - [`ReactorScheduler`] 是基于 reactor 所用 tokio 运行时的实现，任务与 reactor 循环在同一线程上
//!   协作执行。
//!
//! # 契约说明（What）
//! - 任务在 reactor 运行（`start` 阻塞期间）时才会被驱动；
//! - [`TimerHandle::cancel`] 之后定时器不再触发；周期定时器在下一个周期点退出。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{self, MissedTickBehavior};

/// 一次性任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 周期任务。
pub type PeriodicTask = Box<dyn FnMut() + Send + 'static>;

/// 定时器句柄，可克隆，任一克隆取消即全部取消。
#[derive(Clone, Debug, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// 新建未取消的句柄。
    pub fn new() -> Self {
        Self::default()
    }

    /// 取消定时器。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// 是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// 路由核心依赖的调度能力。
pub trait Scheduler: Send + Sync {
    /// 尽快执行一次任务。
    fn submit(&self, task: Task);

    /// `delay` 之后执行一次任务。
    fn schedule_once(&self, delay: Duration, task: Task) -> TimerHandle;

    /// 每隔 `period` 执行一次任务，首次触发在一个周期之后。
    fn schedule_periodic(&self, period: Duration, task: PeriodicTask) -> TimerHandle;
}

/// 基于 reactor 运行时的调度实现。
#[derive(Clone, Debug)]
pub struct ReactorScheduler {
    runtime: Handle,
}

impl ReactorScheduler {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Scheduler for ReactorScheduler {
    fn submit(&self, task: Task) {
        self.runtime.spawn(async move { task() });
    }

    fn schedule_once(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let guard = handle.clone();
        self.runtime.spawn(async move {
            time::sleep(delay).await;
            if !guard.is_cancelled() {
                task();
            }
        });
        handle
    }

    fn schedule_periodic(&self, period: Duration, mut task: PeriodicTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let guard = handle.clone();
        self.runtime.spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if guard.is_cancelled() {
                    break;
                }
                task();
            }
        });
        handle
    }
}
