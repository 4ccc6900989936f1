//! Manager lifecycle, diagnostics and event delivery

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use rvoip_ua_core::{
    AccountId, EventKind, ManagerConfig, SessionEvent, SessionManager, UaError, listener_fn,
};

use common::*;

#[tokio::test]
async fn test_init_and_shutdown_are_idempotent() {
    init_tracing();
    let engine = MockEngine::new();
    let manager = SessionManager::new(ManagerConfig::default(), engine.clone()).unwrap();
    let mut rx = manager.subscribe();

    // shutdown before init succeeds without touching the engine
    manager.shutdown().await.unwrap();
    assert!(engine.requests().is_empty());

    manager.init().await.unwrap();
    manager.init().await.unwrap();
    assert!(manager.is_initialized());

    manager.shutdown().await.unwrap();
    manager.shutdown().await.unwrap();
    assert!(!manager.is_initialized());

    assert_eq!(engine.requests(), vec![Request::Init, Request::Shutdown]);
    assert_eq!(names(&drain(&mut rx)), vec!["initialized", "shutdown"]);
}

#[tokio::test]
async fn test_engine_init_failure() {
    let engine = MockEngine::new();
    engine.script(|s| s.init_ok = false);
    let manager = SessionManager::new(ManagerConfig::default(), engine.clone()).unwrap();
    let mut rx = manager.subscribe();

    let err = manager.init().await.unwrap_err();
    assert!(err.is_engine_error());
    assert!(!manager.is_initialized());

    let events = drain(&mut rx);
    assert_eq!(names(&events), vec!["error"]);
    assert!(matches!(&events[0], SessionEvent::Error { kind, detail } if kind == "engine" && detail.contains("init")));

    engine.script(|s| s.init_ok = true);
    manager.init().await.unwrap();
    assert!(manager.is_initialized());
}

#[tokio::test]
async fn test_commands_require_initialization() {
    let engine = MockEngine::new();
    let manager = SessionManager::new(ManagerConfig::default(), engine.clone()).unwrap();

    assert_eq!(manager.add_account(account(1)).await, Err(UaError::NotInitialized));
    assert_eq!(manager.register(AccountId(0)).await, Err(UaError::NotInitialized));
    assert_eq!(manager.make_call(AccountId(0), "sip:2@ex.com").await, Err(UaError::NotInitialized));
    assert_eq!(manager.remove_account(AccountId(0)).await, Err(UaError::NotInitialized));
    assert_eq!(UaError::NotInitialized.category(), "precondition");
    assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn test_shutdown_tears_everything_down() {
    let engine = MockEngine::new();
    let manager = started(&engine).await;
    let a = registered(&manager, 1).await;
    let b = manager.add_account(account(2)).await.unwrap();
    let call = manager.make_call(a, "sip:2@ex.com").await.unwrap();
    let mut rx = manager.subscribe();

    manager.shutdown().await.unwrap();

    assert!(manager.get_accounts().is_empty());
    assert!(manager.active_calls().is_empty());
    assert!(!manager.is_initialized());

    let events = drain(&mut rx);
    assert_eq!(
        names(&events),
        vec![
            "callHangup",
            "unregistrationStarted",
            "callTerminated",
            "unregistered",
            "accountRemoved",
            "accountRemoved",
            "shutdown",
        ]
    );
    assert_eq!(events[4], SessionEvent::AccountRemoved { id: a });
    assert_eq!(events[5], SessionEvent::AccountRemoved { id: b });
    assert_eq!(events[0].dialog_key(), Some(&call.key));

    let requests = engine.requests();
    assert_eq!(requests.last(), Some(&Request::Shutdown));
    assert_eq!(engine.count(|r| matches!(r, Request::DestroyAccount(_))), 2);

    assert_eq!(manager.add_account(account(3)).await, Err(UaError::NotInitialized));

    // ids keep counting across restarts
    manager.init().await.unwrap();
    assert_eq!(manager.add_account(account(3)).await.unwrap(), AccountId(2));
}

#[tokio::test]
async fn test_engine_shutdown_failure_is_reported() {
    let engine = MockEngine::new();
    engine.script(|s| s.shutdown_ok = false);
    let manager = started(&engine).await;
    let mut rx = manager.subscribe();

    assert!(manager.shutdown().await.unwrap_err().is_engine_error());
    assert!(!manager.is_initialized());
    assert_eq!(names(&drain(&mut rx)), vec!["shutdown", "error"]);
}

#[tokio::test]
async fn test_diagnostics_are_forwarded() {
    let engine = MockEngine::new();
    let manager = started(&engine).await;

    assert_eq!(manager.version(), "mock-engine 1.0");
    assert_eq!(manager.local_address(), "127.0.0.1");
    assert_eq!(manager.bound_port(), 5060);

    let json = serde_json::to_value(manager.diagnostics()).unwrap();
    assert_eq!(json["version"], "mock-engine 1.0");
    assert_eq!(json["localAddress"], "127.0.0.1");
    assert_eq!(json["boundPort"], 5060);
}

#[test]
fn test_manager_requires_runtime_and_valid_config() {
    let err = SessionManager::new(ManagerConfig::default(), MockEngine::new()).unwrap_err();
    assert!(matches!(err, UaError::Internal { .. }));

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let config = ManagerConfig::new().with_event_capacity(0);
        let err = SessionManager::new(config, MockEngine::new()).unwrap_err();
        assert_eq!(err.category(), "validation");
    });
}

#[tokio::test]
async fn test_failing_listeners_do_not_disturb_others() {
    let engine = MockEngine::new();
    let manager = started(&engine).await;
    let bus = manager.event_bus();

    bus.on_any(listener_fn(|_| anyhow::bail!("listener rejected event")));
    bus.on_named("registered", listener_fn(|_| panic!("listener crashed")))
        .unwrap();
    let (tx, mut seen) = mpsc::unbounded_channel();
    bus.on_any(listener_fn(move |event| {
        tx.send(event.name())?;
        Ok(())
    }));

    let id = registered(&manager, 1).await;
    manager.unregister(id).await.unwrap();

    let mut delivered = Vec::new();
    while delivered.len() < 5 {
        let name = tokio::time::timeout(Duration::from_secs(2), seen.recv())
            .await
            .unwrap()
            .unwrap();
        delivered.push(name);
    }
    assert_eq!(
        delivered,
        vec!["accountAdded", "registrationStarted", "registered", "unregistrationStarted", "unregistered"]
    );
    assert!(!manager.is_account_registered(id));
    assert_eq!(manager.get_accounts().len(), 1);
}

#[tokio::test]
async fn test_named_subscription() {
    let engine = MockEngine::new();
    let manager = started(&engine).await;
    let bus = manager.event_bus();

    assert_eq!(
        bus.on_named("onRegistered", listener_fn(|_| Ok(()))).unwrap_err(),
        UaError::UnknownEventName {
            name: "onRegistered".into()
        }
    );

    let (tx, mut seen) = mpsc::unbounded_channel();
    let listener = bus.on(
        EventKind::AccountRemoved,
        listener_fn(move |event| {
            tx.send(event.clone())?;
            Ok(())
        }),
    );

    let id = manager.add_account(account(1)).await.unwrap();
    manager.remove_account(id).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(2), seen.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, SessionEvent::AccountRemoved { id });

    assert!(bus.off(listener));
    assert_eq!(bus.listener_count(), 0);
}

#[tokio::test]
async fn test_event_stream() {
    let engine = MockEngine::new();
    let manager: Arc<SessionManager> = started(&engine).await;
    let mut stream = manager.events();

    let id = registered(&manager, 1).await;

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.account_id(), Some(id));
        kinds.push(event.kind());
    }
    assert_eq!(
        kinds,
        vec![EventKind::AccountAdded, EventKind::RegistrationStarted, EventKind::Registered]
    );
}

#[tokio::test]
async fn test_event_payload_shape() {
    let engine = MockEngine::new();
    let manager = started(&engine).await;
    let id = registered(&manager, 1).await;
    let mut rx = manager.subscribe();

    manager.make_call(id, "sip:2@ex.com").await.unwrap();
    let events = drain(&mut rx);

    let initiated = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(initiated["event"], "callInitiated");
    assert_eq!(initiated["payload"]["accountId"], 0);
    assert_eq!(initiated["payload"]["destination"], "sip:2@ex.com");

    let ringing = serde_json::to_value(&events[1]).unwrap();
    assert_eq!(ringing["event"], "callRinging");
    assert_eq!(ringing["payload"]["dialog"]["key"]["callId"], "call-1@mock");
    assert_eq!(ringing["payload"]["dialog"]["state"], "Ringing");
    assert_eq!(ringing["payload"]["dialog"]["direction"], "Outbound");

    let initialized = serde_json::to_value(SessionEvent::Initialized).unwrap();
    assert_eq!(initialized["event"], "initialized");
}
