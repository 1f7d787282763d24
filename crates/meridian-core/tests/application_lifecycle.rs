//! 应用生命周期：按配置引导、reactor 上分发、跨线程停机。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use meridian_codec::{InstanceId, Message, MessageCodec, MethodId, ServiceId, SomeIpCodec};
use meridian_core::{
    Endpoint, LifecycleState, ManagingApplication, ReceiveCallback, RouterConfig,
};

const CONFIG: &str = r#"
[application]
name = "lifecycle"
client_id = 0x0300

[routing]
inbound_queue = 8
statistics_interval_ms = 5

[[routing.magic_cookies]]
service = 0x1234
instance = 0x0001

[[services]]
service = 0x1234
instance = 0x0001
endpoint = "127.0.0.1:30509"
"#;

fn local() -> Endpoint {
    Endpoint::udp(([127, 0, 0, 1], 30_509).into())
}

#[test]
fn configured_service_is_served_on_the_reactor_until_stopped() {
    let config = RouterConfig::from_toml_str(CONFIG).expect("config");
    let app = Arc::new(ManagingApplication::from_config(&config));
    assert_eq!(app.name(), "lifecycle");
    let handle = app.init(&config).expect("init");
    assert_eq!(app.state(), LifecycleState::Initialized);
    assert!(app.pipeline().is_active(ServiceId(0x1234), InstanceId(1)));
    assert!(app
        .pipeline()
        .magic_cookies_enabled(ServiceId(0x1234), InstanceId(1)));

    let (reactor_tx, reactor_rx) = mpsc::channel();
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hits);
    let stopper = Arc::clone(&app);
    app.register_cbk(
        ServiceId(0x1234),
        InstanceId(1),
        MethodId(1),
        ReceiveCallback::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            let _ = reactor_tx.send(thread::current().id());
            stopper.stop().expect("stop from callback");
        }),
    );

    let runner = {
        let app = Arc::clone(&app);
        thread::spawn(move || {
            app.start().expect("start");
            thread::current().id()
        })
    };

    let request = SomeIpCodec::new()
        .serialize(&Message::request(ServiceId(0x1234), InstanceId(1), MethodId(1)))
        .expect("serialize");
    let peer = Endpoint::udp(([127, 0, 0, 1], 40_000).into());
    handle
        .deliver(Bytes::from(request.to_vec()), peer, local())
        .expect("deliver");

    let callback_thread = reactor_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("dispatched");
    let runner_thread = runner.join().expect("runner");
    assert_eq!(callback_thread, runner_thread);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(app.state(), LifecycleState::Stopped);
    assert!(handle.is_stop_requested());
    assert!(app.start().is_err());
}

#[test]
fn stop_from_another_thread_returns_start() {
    let config = RouterConfig::default();
    let app = Arc::new(ManagingApplication::from_config(&config));
    app.init(&config).expect("init");

    let runner = {
        let app = Arc::clone(&app);
        thread::spawn(move || app.start())
    };
    while app.state() != LifecycleState::Running {
        thread::sleep(Duration::from_millis(1));
    }
    app.stop().expect("stop");
    app.stop().expect("repeat");
    runner.join().expect("join").expect("start");
    assert_eq!(app.state(), LifecycleState::Stopped);
}

#[test]
fn bootstrap_rejects_invalid_configuration_before_init() {
    let error = RouterConfig::from_toml_str("[[services]]\nservice = 0xffff\ninstance = 1\nendpoint = \"127.0.0.1:1\"\n")
        .expect_err("reserved service");
    assert_eq!(error.code(), "config.invalid");
}
