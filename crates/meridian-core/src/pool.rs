//! # 对象池：每个端点至多一个客户端对象、一个服务对象
//!
//! ## 核心意图（Why）
//! - 接收与发送路径都会按端点取“本地角色面向该对端的状态对象”（会话号计数、流量统计）；
//!   若并发首次访问各自创建一份，会话号就会重复；
//! - 借助 `DashMap` 的 entry API，同一端点的并发 `find_or_create` 只有第一个调用者构造对象，
//!   其余调用者观察到同一个 `Arc`。
//!
//! ## 行为契约（What）
//! - `find_or_create`：命中返回缓存对象，否则构造、登记并返回；
//! - `find`：只查不建；
//! - `release`：仅在显式清理（端点失效、宿主拆除）时调用；正在执行的回调仍持有 `Arc`，
//!   对象在其返回后才真正释放。

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use dashmap::{DashMap, mapref::entry::Entry};
use meridian_codec::{Endpoint, SessionId};

/// 可被对象池托管的对端对象。
pub trait PooledObject: Send + Sync + 'static {
    /// 为首次出现的端点构造对象。
    fn create(endpoint: Endpoint) -> Self;
}

/// 按端点身份缓存对象的并发池。
#[derive(Debug)]
pub struct ObjectPool<T> {
    objects: DashMap<Endpoint, Arc<T>>,
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }
}

impl<T: PooledObject> ObjectPool<T> {
    /// 构造空池。
    pub fn new() -> Self {
        Self::default()
    }

    /// 查找或创建端点对应的对象；同一端点的并发调用得到同一个实例。
    pub fn find_or_create(&self, endpoint: Endpoint) -> Arc<T> {
        match self.objects.entry(endpoint) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(vacant) => {
                let created = Arc::new(T::create(endpoint));
                vacant.insert(Arc::clone(&created));
                created
            }
        }
    }

    /// 只查不建。
    pub fn find(&self, endpoint: &Endpoint) -> Option<Arc<T>> {
        self.objects.get(endpoint).map(|entry| Arc::clone(entry.value()))
    }

    /// 移除端点对应的对象。
    pub fn release(&self, endpoint: &Endpoint) -> Option<Arc<T>> {
        self.objects.remove(endpoint).map(|(_, object)| object)
    }

    /// 当前托管的对象数量。
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// 池是否为空。
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// 所有对象的统计快照。
    pub fn snapshots(&self) -> Vec<PeerSnapshot>
    where
        T: Snapshot,
    {
        let mut snapshots: Vec<_> = self
            .objects
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.endpoint);
        snapshots
    }
}

/// 对端对象的诊断快照。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PeerSnapshot {
    /// 对端端点。
    pub endpoint: Endpoint,
    /// 发往该端点的报文数。
    pub messages_sent: u64,
    /// 来自该端点的报文数。
    pub messages_received: u64,
}

/// 可输出诊断快照的对象。
pub trait Snapshot {
    /// 生成当前统计快照。
    fn snapshot(&self) -> PeerSnapshot;
}

#[derive(Debug, Default)]
struct TrafficCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

impl TrafficCounters {
    fn snapshot(&self, endpoint: Endpoint) -> PeerSnapshot {
        PeerSnapshot {
            endpoint,
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_received: self.received.load(Ordering::Relaxed),
        }
    }
}

/// 本地以客户端身份面向某端点的状态：向它发请求，接收它的响应与事件。
///
/// 会话号在该对象内递增，从 1 开始回绕且跳过 0。
#[derive(Debug)]
pub struct ClientHandle {
    endpoint: Endpoint,
    session: AtomicU16,
    counters: TrafficCounters,
}

impl ClientHandle {
    /// 对端端点。
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// 分配下一个会话号。
    pub fn next_session(&self) -> SessionId {
        let mut current = self.session.load(Ordering::Relaxed);
        loop {
            let next = match current.wrapping_add(1) {
                0 => 1,
                value => value,
            };
            match self.session.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return SessionId(next),
                Err(observed) => current = observed,
            }
        }
    }

    /// 记录一次发送。
    pub fn record_sent(&self) {
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次接收。
    pub fn record_received(&self) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
    }
}

impl PooledObject for ClientHandle {
    fn create(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            session: AtomicU16::new(0),
            counters: TrafficCounters::default(),
        }
    }
}

impl Snapshot for ClientHandle {
    fn snapshot(&self) -> PeerSnapshot {
        self.counters.snapshot(self.endpoint)
    }
}

/// 本地以服务提供方身份面向某端点的状态：接收它的请求，向它回响应与事件。
#[derive(Debug)]
pub struct ServiceHandle {
    endpoint: Endpoint,
    counters: TrafficCounters,
}

impl ServiceHandle {
    /// 对端端点。
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// 记录一次发送。
    pub fn record_sent(&self) {
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次接收。
    pub fn record_received(&self) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
    }
}

impl PooledObject for ServiceHandle {
    fn create(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            counters: TrafficCounters::default(),
        }
    }
}

impl Snapshot for ServiceHandle {
    fn snapshot(&self) -> PeerSnapshot {
        self.counters.snapshot(self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ep(port: u16) -> Endpoint {
        Endpoint::udp(([10, 0, 0, 1], port).into())
    }

    #[test]
    fn concurrent_find_or_create_yields_one_object() {
        let pool = Arc::new(ObjectPool::<ClientHandle>::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || pool.find_or_create(ep(9)))
            })
            .collect();
        let objects: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect();
        for object in &objects {
            assert!(Arc::ptr_eq(object, &objects[0]));
        }
        assert!(Arc::ptr_eq(&pool.find_or_create(ep(9)), &objects[0]));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn find_never_creates() {
        let pool = ObjectPool::<ServiceHandle>::new();
        assert!(pool.find(&ep(1)).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn session_wraps_past_zero() {
        let client = ClientHandle::create(ep(1));
        assert_eq!(client.next_session(), SessionId(1));
        client.session.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(client.next_session(), SessionId(1));
    }

    #[test]
    fn released_object_outlives_pool_entry() {
        let pool = ObjectPool::<ServiceHandle>::new();
        let held = pool.find_or_create(ep(3));
        held.record_received();
        let released = pool.release(&ep(3)).expect("present");
        assert!(pool.find(&ep(3)).is_none());
        assert_eq!(released.snapshot().messages_received, 1);
        assert!(!Arc::ptr_eq(&pool.find_or_create(ep(3)), &held));
    }
}
