//! Shared helpers for the ua-core integration tests
//!
//! [`MockEngine`] is an in-memory SIP engine. By default it accepts every
//! request and immediately pushes the matching completion notification;
//! tests flip the knobs in [`Script`] to hold completions back, reject
//! requests, or drive notifications by hand through [`MockEngine::sink`].

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use rvoip_ua_core::{
    AccountConfig, AccountId, DialogHandle, DialogKey, EngineAccountHandle, EngineAccountSnapshot, EngineAck,
    EngineAdapter, EngineCallState, EngineFailure, EngineNotification, ManagerConfig, NotificationSink,
    RegistrationOutcome, RegistrationState, SessionEvent, SessionManager,
};

/// Request received by the mock, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Init,
    Shutdown,
    CreateAccount(String),
    DestroyAccount(EngineAccountHandle),
    Register(EngineAccountHandle),
    Unregister(EngineAccountHandle),
    Call(EngineAccountHandle, String),
    Answer(DialogKey, u32),
    Hangup(DialogKey, u32),
}

/// How the mock reacts to requests
#[derive(Debug, Clone)]
pub struct Script {
    pub init_ok: bool,
    pub shutdown_ok: bool,
    pub reject_create: bool,
    pub destroy_ok: bool,
    /// Pushed right after an accepted register; `None` leaves it to the test
    pub register_outcome: Option<RegistrationOutcome>,
    pub unregister_outcome: Option<RegistrationOutcome>,
    pub reject_register: Option<String>,
    pub reject_unregister: Option<String>,
    pub reject_call: Option<String>,
    pub reject_answer: Option<String>,
    pub reject_hangup: Option<String>,
    /// Push `Answered` after an accepted answer request
    pub confirm_answer: bool,
    /// Push `Terminated` after an accepted hangup request
    pub confirm_hangup: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            init_ok: true,
            shutdown_ok: true,
            reject_create: false,
            destroy_ok: true,
            register_outcome: Some(RegistrationOutcome::Registered),
            unregister_outcome: Some(RegistrationOutcome::Unregistered),
            reject_register: None,
            reject_unregister: None,
            reject_call: None,
            reject_answer: None,
            reject_hangup: None,
            confirm_answer: true,
            confirm_hangup: true,
        }
    }
}

#[derive(Default)]
struct MockState {
    sink: Option<NotificationSink>,
    script: Script,
    requests: Vec<Request>,
    accounts: BTreeMap<EngineAccountHandle, EngineAccountSnapshot>,
    created: Vec<EngineAccountHandle>,
    calls: u32,
}

impl MockState {
    fn push(&self, notification: EngineNotification) {
        if let Some(sink) = &self.sink {
            sink.notify(notification);
        }
    }
}

pub struct MockEngine {
    state: Mutex<MockState>,
}

/// First handle the mock hands out, deliberately unlike registry ids
pub const FIRST_HANDLE: EngineAccountHandle = 100;

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Self::with_script(Script::default())
    }

    pub fn with_script(script: Script) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                script,
                ..MockState::default()
            }),
        })
    }

    pub fn script(&self, change: impl FnOnce(&mut Script)) {
        change(&mut self.state.lock().script);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }

    pub fn count(&self, matches: impl Fn(&Request) -> bool) -> usize {
        self.state.lock().requests.iter().filter(|r| matches(r)).count()
    }

    /// Handle of the `n`th account created on this engine
    pub fn handle(&self, n: usize) -> EngineAccountHandle {
        self.state.lock().created[n]
    }

    pub fn sink(&self) -> NotificationSink {
        self.state.lock().sink.clone().expect("engine not initialized")
    }

    pub fn incoming_call(&self, account: EngineAccountHandle, key: &DialogKey, cseq: u32, caller: &str) {
        self.sink().notify(EngineNotification::IncomingCall {
            account,
            key: key.clone(),
            cseq,
            caller: caller.to_string(),
        });
    }
}

#[async_trait]
impl EngineAdapter for MockEngine {
    async fn init(&self, sink: NotificationSink) -> bool {
        let mut state = self.state.lock();
        state.requests.push(Request::Init);
        if state.script.init_ok {
            state.sink = Some(sink);
        }
        state.script.init_ok
    }

    async fn shutdown(&self) -> bool {
        let mut state = self.state.lock();
        state.requests.push(Request::Shutdown);
        state.accounts.clear();
        state.script.shutdown_ok
    }

    async fn create_account(&self, config: &AccountConfig) -> EngineAccountHandle {
        let mut state = self.state.lock();
        state.requests.push(Request::CreateAccount(config.aor.clone()));
        if state.script.reject_create || config.password.expose().is_empty() {
            return -1;
        }
        let handle = FIRST_HANDLE + state.created.len() as EngineAccountHandle;
        state.created.push(handle);
        state.accounts.insert(
            handle,
            EngineAccountSnapshot {
                handle,
                uri: config.aor.clone(),
                registration_active: false,
                expires: 0,
                last_status: 0,
            },
        );
        handle
    }

    async fn destroy_account(&self, account: EngineAccountHandle) -> bool {
        let mut state = self.state.lock();
        state.requests.push(Request::DestroyAccount(account));
        state.accounts.remove(&account);
        state.script.destroy_ok
    }

    async fn request_register(&self, account: EngineAccountHandle) -> EngineAck {
        let mut state = self.state.lock();
        state.requests.push(Request::Register(account));
        if let Some(reason) = state.script.reject_register.clone() {
            return Err(EngineFailure::new(reason));
        }
        if let Some(outcome) = state.script.register_outcome.clone() {
            if let Some(snapshot) = state.accounts.get_mut(&account) {
                let ok = outcome == RegistrationOutcome::Registered;
                snapshot.registration_active = ok;
                snapshot.expires = if ok { 300 } else { 0 };
                snapshot.last_status = if ok { 200 } else { 403 };
            }
            state.push(EngineNotification::Registration { account, outcome });
        }
        Ok(())
    }

    async fn request_unregister(&self, account: EngineAccountHandle) -> EngineAck {
        let mut state = self.state.lock();
        state.requests.push(Request::Unregister(account));
        if let Some(reason) = state.script.reject_unregister.clone() {
            return Err(EngineFailure::new(reason));
        }
        if let Some(snapshot) = state.accounts.get_mut(&account) {
            snapshot.registration_active = false;
            snapshot.expires = 0;
        }
        if let Some(outcome) = state.script.unregister_outcome.clone() {
            state.push(EngineNotification::Registration { account, outcome });
        }
        Ok(())
    }

    async fn request_call(&self, account: EngineAccountHandle, destination: &str) -> Result<DialogHandle, EngineFailure> {
        let mut state = self.state.lock();
        state.requests.push(Request::Call(account, destination.to_string()));
        if let Some(reason) = state.script.reject_call.clone() {
            return Err(EngineFailure::new(reason));
        }
        state.calls += 1;
        let n = state.calls;
        Ok(DialogHandle {
            key: DialogKey::new(format!("call-{n}@mock"), format!("local-{n}"), format!("remote-{n}")),
            cseq: 1,
        })
    }

    async fn request_answer(&self, _account: EngineAccountHandle, key: &DialogKey, cseq: u32) -> EngineAck {
        let mut state = self.state.lock();
        state.requests.push(Request::Answer(key.clone(), cseq));
        if let Some(reason) = state.script.reject_answer.clone() {
            return Err(EngineFailure::new(reason));
        }
        if state.script.confirm_answer {
            state.push(EngineNotification::CallState {
                key: key.clone(),
                state: EngineCallState::Answered,
            });
        }
        Ok(())
    }

    async fn request_hangup(&self, _account: EngineAccountHandle, key: &DialogKey, cseq: u32) -> EngineAck {
        let mut state = self.state.lock();
        state.requests.push(Request::Hangup(key.clone(), cseq));
        if let Some(reason) = state.script.reject_hangup.clone() {
            return Err(EngineFailure::new(reason));
        }
        if state.script.confirm_hangup {
            state.push(EngineNotification::CallState {
                key: key.clone(),
                state: EngineCallState::Terminated,
            });
        }
        Ok(())
    }

    fn query_account_info(&self, account: EngineAccountHandle) -> Option<EngineAccountSnapshot> {
        self.state.lock().accounts.get(&account).cloned()
    }

    fn query_accounts(&self) -> Vec<EngineAccountSnapshot> {
        self.state.lock().accounts.values().cloned().collect()
    }

    fn query_version(&self) -> String {
        "mock-engine 1.0".to_string()
    }

    fn query_local_address(&self) -> String {
        "127.0.0.1".to_string()
    }

    fn query_bound_port(&self) -> u16 {
        5060
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn account(n: u32) -> AccountConfig {
    AccountConfig::new(format!("sip:{n}@ex.com"), "sip:ex.com", n.to_string(), "p")
}

pub fn inbound_key(n: u32) -> DialogKey {
    DialogKey::new(format!("inbound-{n}@remote"), format!("caller-{n}"), format!("callee-{n}"))
}

/// Manager over `engine`, already initialized
pub async fn started(engine: &Arc<MockEngine>) -> Arc<SessionManager> {
    started_with(engine, ManagerConfig::default()).await
}

pub async fn started_with(engine: &Arc<MockEngine>, config: ManagerConfig) -> Arc<SessionManager> {
    init_tracing();
    let manager = SessionManager::new(config, engine.clone()).unwrap();
    manager.init().await.unwrap();
    manager
}

/// Add account `n` and register it through the default script
pub async fn registered(manager: &SessionManager, n: u32) -> AccountId {
    let id = manager.add_account(account(n)).await.unwrap();
    assert_eq!(manager.register(id).await.unwrap(), RegistrationState::Registered);
    id
}

/// Everything published so far
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn names(events: &[SessionEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

/// Give the notification pump time to apply what was pushed
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Position of each call event in the canonical dialog lifecycle
pub fn call_event_rank(event: &SessionEvent) -> Option<usize> {
    let order = [
        "callInitiated",
        "callRinging",
        "callAnswered",
        "callActive",
        "callHangup",
        "callTerminated",
    ];
    order.iter().position(|name| *name == event.name())
}

/// Call events form a subsequence of the canonical lifecycle
pub fn assert_call_order(events: &[SessionEvent]) {
    let ranks: Vec<usize> = events.iter().filter_map(call_event_rank).collect();
    assert!(
        ranks.windows(2).all(|w| w[0] < w[1]),
        "call events out of order: {:?}",
        names(events)
    );
}
