//! 位置登记表的模型性质测试。
//!
//! # 教案级注释概览
//! - **核心目标 (Why)**：登记表同时维护正向表与反向表，任意绑定/解绑/清除序列之后，两者都必须与
//!   一个朴素模型（两张 `HashMap`）保持一致，不得残留陈旧的反查条目；
//! - **设计手法 (How)**：Proptest 生成小取值域上的操作序列，使“同一端点上同一服务的多个实例”
//!   与“实例在端点间迁移”频繁出现；
//! - **断言 (What)**：
//!   1. 正向查询与模型逐项相等；
//!   2. 反查命中时，命中的实例在模型中确实绑定于该端点；
//!   3. 反查未命中，当且仅当模型中该端点上没有该服务的任何实例；
//!   4. 客户端侧与服务端侧互不影响。

use std::collections::HashMap;

use meridian_codec::{InstanceId, ServiceId};
use meridian_core::{Direction, Endpoint, LocationRegistry};
use proptest::prelude::*;

#[derive(Clone, Copy, Debug)]
enum Side {
    Client,
    Service,
}

#[derive(Clone, Debug)]
enum Op {
    Bind(Side, u16, u16, u16),
    Unbind(Side, u16, u16),
    Purge(u16),
}

fn endpoint(port: u16) -> Endpoint {
    Endpoint::udp(([127, 0, 0, 1], 30_000 + port).into())
}

fn side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Client), Just(Side::Service)]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (side(), 1u16..3, 1u16..4, 0u16..3).prop_map(|(side, s, i, e)| Op::Bind(side, s, i, e)),
        2 => (side(), 1u16..3, 1u16..4).prop_map(|(side, s, i)| Op::Unbind(side, s, i)),
        1 => (0u16..3).prop_map(Op::Purge),
    ]
}

type Model = HashMap<(ServiceId, InstanceId), Endpoint>;

fn check_side(registry: &LocationRegistry, model: &Model, side: Side) {
    for service in 1u16..3 {
        let service = ServiceId(service);
        for instance in 1u16..4 {
            let instance = InstanceId(instance);
            let actual = match side {
                Side::Client => registry.resolve_client_endpoint(service, instance),
                Side::Service => registry.resolve_service_endpoint(service, instance),
            };
            assert_eq!(actual, model.get(&(service, instance)).copied());
        }
        for port in 0u16..3 {
            let target = endpoint(port);
            let direction = match side {
                Side::Client => Direction::ToConsumer,
                Side::Service => Direction::ToProvider,
            };
            let expected_any = model
                .iter()
                .any(|((s, _), bound)| *s == service && *bound == target);
            match registry.resolve_instance(&target, service, direction) {
                Some(instance) => {
                    assert_eq!(model.get(&(service, instance)), Some(&target));
                }
                None => assert!(!expected_any, "reverse entry missing for {service} at {target}"),
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn reverse_lookup_tracks_forward_bindings(ops in prop::collection::vec(op(), 1..48)) {
        let registry = LocationRegistry::new();
        let mut clients = Model::new();
        let mut services = Model::new();

        for op in ops {
            match op {
                Op::Bind(side, s, i, e) => {
                    let key = (ServiceId(s), InstanceId(i));
                    let (model, previous) = match side {
                        Side::Client => (&mut clients, registry.bind_client(key.0, key.1, endpoint(e))),
                        Side::Service => (&mut services, registry.bind_service(key.0, key.1, endpoint(e))),
                    };
                    prop_assert_eq!(previous, model.insert(key, endpoint(e)));
                }
                Op::Unbind(Side::Client, s, i) => {
                    let key = (ServiceId(s), InstanceId(i));
                    prop_assert_eq!(registry.unbind_client(key.0, key.1), clients.remove(&key));
                }
                Op::Unbind(Side::Service, s, i) => {
                    let key = (ServiceId(s), InstanceId(i));
                    if let Some(bound) = services.remove(&key) {
                        prop_assert!(registry.unbind_service(key.0, key.1, &bound).is_ok());
                    }
                }
                Op::Purge(e) => {
                    let purged = registry.purge_endpoint(&endpoint(e));
                    let before = (clients.len(), services.len());
                    clients.retain(|_, bound| *bound != endpoint(e));
                    services.retain(|_, bound| *bound != endpoint(e));
                    prop_assert_eq!(purged.clients.len(), before.0 - clients.len());
                    prop_assert_eq!(purged.services.len(), before.1 - services.len());
                }
            }
            check_side(&registry, &clients, Side::Client);
            check_side(&registry, &services, Side::Service);
        }
    }

    #[test]
    fn stale_unbind_never_mutates(s in 1u16..3, i in 1u16..4, bound in 0u16..3, claimed in 0u16..3) {
        prop_assume!(bound != claimed);
        let registry = LocationRegistry::new();
        let (service, instance) = (ServiceId(s), InstanceId(i));
        registry.bind_service(service, instance, endpoint(bound));
        let error = registry
            .unbind_service(service, instance, &endpoint(claimed))
            .expect_err("mismatched endpoint");
        prop_assert_eq!(error.code(), "registry.stale_binding");
        prop_assert_eq!(registry.resolve_service_endpoint(service, instance), Some(endpoint(bound)));
        prop_assert_eq!(
            registry.resolve_instance(&endpoint(bound), service, Direction::ToProvider),
            Some(instance)
        );
    }
}
