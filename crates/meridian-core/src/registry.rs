//! 位置登记表与实例反查。
//!
//! # 教案式解读
//! - **意图（Why）**：
//!   - 发送路径需要 `(服务, 实例) → 端点`，接收路径需要 `端点 → 服务 → 实例`；
//!     两个方向必须同步变化，否则会出现“正向已解绑、反向仍命中”的陈旧路由；
//!   - 客户端侧记录“本地调用方要消费的实例在哪个远端提供方端点”（`request_service`），
//!     服务端侧记录“本地在哪个端点提供该实例”（`provide_service`）；
//!     同一端点可能既是某实例的远端提供方，又是另一实例的本地提供端点，因此两侧分表保存。
//! - **实现策略（How）**：
//!   - 每张表由一把 `parking_lot::RwLock` 同时保护正向表与反向表，正反两个方向在同一临界区内更新；
//!   - 反向表对每个 `(端点, 服务)` 只记录一个实例；被覆盖的条目在解绑时从正向表中剩余的
//!     绑定恢复。
//! - **契约（What）**：
//!   - 重复绑定同一端点是幂等的；绑定到不同端点时后写者生效，旧端点的反向条目随之移除；
//!   - 查询返回 `Option`，未命中是正常的路由结果而不是错误。

use std::collections::HashMap;

use meridian_codec::{Endpoint, InstanceId, ServiceId};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::RouterError;

/// 实例反查所依据的报文方向。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    /// 发往本地提供方的请求（含单向请求）：以目标端点查服务端侧表。
    ToProvider,
    /// 远端提供方发来的响应、错误或事件：以来源端点查客户端侧表。
    ToConsumer,
}

#[derive(Debug, Default)]
struct LocationTable {
    locations: HashMap<(ServiceId, InstanceId), Endpoint>,
    instances: HashMap<Endpoint, HashMap<ServiceId, InstanceId>>,
}

impl LocationTable {
    fn bind(
        &mut self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: Endpoint,
    ) -> Option<Endpoint> {
        let previous = self.locations.insert((service, instance), endpoint);
        if let Some(old) = previous.filter(|old| *old != endpoint) {
            self.forget_reverse(old, service, instance);
        }
        self.instances
            .entry(endpoint)
            .or_default()
            .insert(service, instance);
        previous
    }

    fn unbind(&mut self, service: ServiceId, instance: InstanceId) -> Option<Endpoint> {
        let endpoint = self.locations.remove(&(service, instance))?;
        self.forget_reverse(endpoint, service, instance);
        Some(endpoint)
    }

    fn forget_reverse(&mut self, endpoint: Endpoint, service: ServiceId, instance: InstanceId) {
        let fallback = self
            .locations
            .iter()
            .find(|((bound_service, _), bound)| *bound_service == service && **bound == endpoint)
            .map(|((_, bound_instance), _)| *bound_instance);

        let Some(per_service) = self.instances.get_mut(&endpoint) else {
            return;
        };
        if per_service.get(&service) != Some(&instance) {
            return;
        }
        match fallback {
            Some(remaining) => {
                per_service.insert(service, remaining);
            }
            None => {
                per_service.remove(&service);
            }
        }
        if per_service.is_empty() {
            self.instances.remove(&endpoint);
        }
    }

    fn purge(&mut self, endpoint: &Endpoint) -> Vec<(ServiceId, InstanceId)> {
        let mut removed = Vec::new();
        self.locations.retain(|key, bound| {
            if bound == endpoint {
                removed.push(*key);
                false
            } else {
                true
            }
        });
        self.instances.remove(endpoint);
        removed
    }

    fn bindings_at(&self, endpoint: &Endpoint) -> impl Iterator<Item = (ServiceId, InstanceId)> {
        self.locations
            .iter()
            .filter(move |(_, bound)| *bound == endpoint)
            .map(|(key, _)| *key)
    }
}

/// 端点失效时从登记表中清除的绑定。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PurgedBindings {
    /// 客户端侧被移除的 `(服务, 实例)`。
    pub clients: Vec<(ServiceId, InstanceId)>,
    /// 服务端侧被移除的 `(服务, 实例)`。
    pub services: Vec<(ServiceId, InstanceId)>,
}

impl PurgedBindings {
    /// 是否没有任何绑定被移除。
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty() && self.services.is_empty()
    }
}

/// 客户端侧与服务端侧的双向位置登记表。
#[derive(Debug, Default)]
pub struct LocationRegistry {
    clients: RwLock<LocationTable>,
    services: RwLock<LocationTable>,
}

impl LocationRegistry {
    /// 构造空登记表。
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录要消费的 `(service, instance)` 所在的远端提供方端点，返回被覆盖的旧端点。
    pub fn bind_client(
        &self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: Endpoint,
    ) -> Option<Endpoint> {
        let previous = self.clients.write().bind(service, instance, endpoint);
        debug!(%service, %instance, %endpoint, ?previous, "client location bound");
        previous
    }

    /// 记录本地提供 `(service, instance)` 的端点，后写者生效，返回被覆盖的旧端点。
    pub fn bind_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: Endpoint,
    ) -> Option<Endpoint> {
        let previous = self.services.write().bind(service, instance, endpoint);
        match previous {
            Some(old) if old != endpoint => {
                debug!(%service, %instance, %endpoint, replaced = %old, "service location rebound")
            }
            _ => debug!(%service, %instance, %endpoint, "service location bound"),
        }
        previous
    }

    /// 移除客户端侧绑定，返回原端点。
    pub fn unbind_client(&self, service: ServiceId, instance: InstanceId) -> Option<Endpoint> {
        let removed = self.clients.write().unbind(service, instance);
        debug!(%service, %instance, ?removed, "client location unbound");
        removed
    }

    /// 移除服务端侧绑定。
    ///
    /// `endpoint` 必须与当前记录一致，否则返回 [`RouterError::StaleBinding`] 且不做任何修改；
    /// 绑定本就不存在时视为成功。
    pub fn unbind_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        endpoint: &Endpoint,
    ) -> Result<(), RouterError> {
        let mut table = self.services.write();
        let current = table.locations.get(&(service, instance)).copied();
        match current {
            None => Ok(()),
            Some(actual) if actual != *endpoint => Err(RouterError::StaleBinding {
                service,
                instance,
                expected: *endpoint,
                actual,
            }),
            Some(_) => {
                table.unbind(service, instance);
                debug!(%service, %instance, %endpoint, "service location unbound");
                Ok(())
            }
        }
    }

    /// 客户端侧查询。
    pub fn resolve_client_endpoint(
        &self,
        service: ServiceId,
        instance: InstanceId,
    ) -> Option<Endpoint> {
        self.clients
            .read()
            .locations
            .get(&(service, instance))
            .copied()
    }

    /// 服务端侧查询。
    pub fn resolve_service_endpoint(
        &self,
        service: ServiceId,
        instance: InstanceId,
    ) -> Option<Endpoint> {
        self.services
            .read()
            .locations
            .get(&(service, instance))
            .copied()
    }

    /// 查询 `endpoint` 当前为 `service` 绑定的实例，两张表按方向择一，从不合并。
    pub fn resolve_instance(
        &self,
        endpoint: &Endpoint,
        service: ServiceId,
        direction: Direction,
    ) -> Option<InstanceId> {
        let table = match direction {
            Direction::ToProvider => self.services.read(),
            Direction::ToConsumer => self.clients.read(),
        };
        table
            .instances
            .get(endpoint)
            .and_then(|per_service| per_service.get(&service))
            .copied()
    }

    /// 列出绑定在 `endpoint` 上的全部 `(服务, 实例)`，两侧合并去重。
    pub fn bindings_at(&self, endpoint: &Endpoint) -> Vec<(ServiceId, InstanceId)> {
        let mut bindings: Vec<_> = self.clients.read().bindings_at(endpoint).collect();
        bindings.extend(self.services.read().bindings_at(endpoint));
        bindings.sort_unstable();
        bindings.dedup();
        bindings
    }

    /// 清除引用 `endpoint` 的全部正向与反向条目。
    pub fn purge_endpoint(&self, endpoint: &Endpoint) -> PurgedBindings {
        let clients = self.clients.write().purge(endpoint);
        let services = self.services.write().purge(endpoint);
        PurgedBindings { clients, services }
    }
}
