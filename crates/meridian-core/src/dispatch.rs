//! 方法级回调分发表。
//!
//! # 教案定位（Why）
//! - 一个方法上可能挂着多个本地订阅者，回调集合需要“集合语义”：同一回调重复注册只保留一份，
//!   注销只移除匹配的那一份；
//! - 以 `(服务, 实例, 方法)` 复合键的扁平表代替多层嵌套映射，键的每一层都没有独立的不变量需要维护。
//!
//! # 并发语义（What）
//! - `dispatch` 在读锁内复制回调快照，释放锁后再逐个调用；回调内部可以安全地注册/注销回调；
//! - 注销若在某次 `dispatch` 取快照之前完成，该次分发不会再调用被注销的回调。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use meridian_codec::{InstanceId, Message, MethodId, ServiceId};
use parking_lot::RwLock;

/// 回调表的复合键。
pub type MethodKey = (ServiceId, InstanceId, MethodId);

/// 报文接收回调。
///
/// 相等性按共享指针判定：克隆出来的句柄与原句柄相等，内容相同但分别构造的闭包不相等。
#[derive(Clone)]
pub struct ReceiveCallback(Arc<dyn Fn(&Message) + Send + Sync>);

impl ReceiveCallback {
    /// 包装闭包。
    pub fn new(callback: impl Fn(&Message) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    /// 调用回调。
    pub fn invoke(&self, message: &Message) {
        (self.0)(message)
    }
}

impl PartialEq for ReceiveCallback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ReceiveCallback {}

impl fmt::Debug for ReceiveCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReceiveCallback")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// 一次分发的结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    /// 调用了若干个回调。
    Dispatched(usize),
    /// 键上没有回调。
    Unhandled,
}

/// 回调登记表。
#[derive(Debug, Default)]
pub struct CallbackTable {
    entries: RwLock<HashMap<MethodKey, Vec<ReceiveCallback>>>,
}

impl CallbackTable {
    /// 构造空表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册回调；已存在时不重复添加，返回是否新增。
    pub fn register(&self, key: MethodKey, callback: ReceiveCallback) -> bool {
        let mut entries = self.entries.write();
        let callbacks = entries.entry(key).or_default();
        if callbacks.contains(&callback) {
            return false;
        }
        callbacks.push(callback);
        true
    }

    /// 注销一个匹配的回调，返回是否确有移除。
    pub fn deregister(&self, key: MethodKey, callback: &ReceiveCallback) -> bool {
        let mut entries = self.entries.write();
        let Some(callbacks) = entries.get_mut(&key) else {
            return false;
        };
        let Some(position) = callbacks.iter().position(|known| known == callback) else {
            return false;
        };
        callbacks.remove(position);
        if callbacks.is_empty() {
            entries.remove(&key);
        }
        true
    }

    /// 键上当前的回调数量。
    pub fn count(&self, key: &MethodKey) -> usize {
        self.entries.read().get(key).map_or(0, Vec::len)
    }

    /// 调用键上的全部回调；单次调用内按注册顺序执行。
    pub fn dispatch(&self, key: &MethodKey, message: &Message) -> DispatchOutcome {
        let snapshot = match self.entries.read().get(key) {
            Some(callbacks) if !callbacks.is_empty() => callbacks.clone(),
            _ => return DispatchOutcome::Unhandled,
        };
        for callback in &snapshot {
            callback.invoke(message);
        }
        DispatchOutcome::Dispatched(snapshot.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const KEY: MethodKey = (ServiceId(5), InstanceId(1), MethodId(0x10));

    fn counting() -> (ReceiveCallback, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let callback = ReceiveCallback::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (callback, hits)
    }

    fn message() -> Message {
        Message::notification(KEY.0, KEY.1, KEY.2)
    }

    #[test]
    fn register_is_idempotent_per_callback() {
        let table = CallbackTable::new();
        let (callback, hits) = counting();
        assert!(table.register(KEY, callback.clone()));
        assert!(!table.register(KEY, callback.clone()));
        assert_eq!(table.dispatch(&KEY, &message()), DispatchOutcome::Dispatched(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_callbacks_all_fire() {
        let table = CallbackTable::new();
        let (first, first_hits) = counting();
        let (second, second_hits) = counting();
        table.register(KEY, first);
        table.register(KEY, second);
        assert_eq!(table.dispatch(&KEY, &message()), DispatchOutcome::Dispatched(2));
        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_then_deregister_leaves_key_unhandled() {
        let table = CallbackTable::new();
        let (callback, hits) = counting();
        table.register(KEY, callback.clone());
        assert!(table.deregister(KEY, &callback));
        assert!(!table.deregister(KEY, &callback));
        assert_eq!(table.count(&KEY), 0);
        assert_eq!(table.dispatch(&KEY, &message()), DispatchOutcome::Unhandled);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callback_may_deregister_itself_during_dispatch() {
        let table = Arc::new(CallbackTable::new());
        let slot: Arc<parking_lot::Mutex<Option<ReceiveCallback>>> = Arc::default();
        let callback = {
            let table = Arc::clone(&table);
            let slot = Arc::clone(&slot);
            ReceiveCallback::new(move |_| {
                if let Some(me) = slot.lock().take() {
                    table.deregister(KEY, &me);
                }
            })
        };
        *slot.lock() = Some(callback.clone());
        table.register(KEY, callback);
        assert_eq!(table.dispatch(&KEY, &message()), DispatchOutcome::Dispatched(1));
        assert_eq!(table.dispatch(&KEY, &message()), DispatchOutcome::Unhandled);
    }

    #[test]
    fn deregister_on_another_thread_precedes_dispatch() {
        let table = Arc::new(CallbackTable::new());
        for _ in 0..32 {
            let (callback, hits) = counting();
            table.register(KEY, callback.clone());
            let deregistering = {
                let table = Arc::clone(&table);
                thread::spawn(move || table.deregister(KEY, &callback))
            };
            assert!(deregistering.join().expect("deregister thread"));
            let dispatching = {
                let table = Arc::clone(&table);
                thread::spawn(move || table.dispatch(&KEY, &message()))
            };
            assert_eq!(
                dispatching.join().expect("dispatch thread"),
                DispatchOutcome::Unhandled
            );
            assert_eq!(hits.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn dispatcher_never_invokes_after_observing_deregister() {
        let table = Arc::new(CallbackTable::new());
        let (callback, hits) = counting();
        table.register(KEY, callback.clone());
        let deregistered = Arc::new(AtomicBool::new(false));
        let dispatcher = {
            let table = Arc::clone(&table);
            let deregistered = Arc::clone(&deregistered);
            let hits = Arc::clone(&hits);
            thread::spawn(move || {
                loop {
                    let observed = deregistered.load(Ordering::SeqCst);
                    let before = hits.load(Ordering::SeqCst);
                    let outcome = table.dispatch(&KEY, &message());
                    if observed {
                        assert_eq!(outcome, DispatchOutcome::Unhandled);
                        assert_eq!(hits.load(Ordering::SeqCst), before);
                        return;
                    }
                }
            })
        };
        thread::sleep(Duration::from_millis(5));
        assert!(table.deregister(KEY, &callback));
        deregistered.store(true, Ordering::SeqCst);
        dispatcher.join().expect("dispatcher");
    }
}
