//! SIP engine boundary
//!
//! The core never speaks SIP itself. It drives a protocol engine through the
//! narrow [`EngineAdapter`] interface and receives the engine's asynchronous
//! results as [`EngineNotification`]s pushed into a [`NotificationSink`].
//!
//! ```text
//! ┌──────────────────┐  request_*()   ┌──────────────────┐
//! │  SessionManager  │ ─────────────► │  EngineAdapter   │
//! │                  │ ◄───────────── │  (SIP stack)     │
//! └──────────────────┘  notify()      └──────────────────┘
//! ```
//!
//! Request methods only acknowledge that the engine accepted the request.
//! The terminal result (registered, answered, terminated, ...) always comes
//! back later through the sink, keyed by the engine's account handle or by
//! the dialog key.
//!
//! Implementations must not report the state of an outbound dialog before
//! `request_call` has returned its [`DialogHandle`]; such reports are dropped
//! as unknown.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::account::AccountConfig;
use crate::call::DialogKey;

/// The engine's own account handle; negative values signal failure
pub type EngineAccountHandle = i32;

/// Failure reported by the engine for a single request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct EngineFailure {
    pub reason: String,
}

impl EngineFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Acknowledgement of a request
pub type EngineAck = Result<(), EngineFailure>;

/// Dialog created by the engine for an accepted outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogHandle {
    pub key: DialogKey,
    /// CSeq of the initial INVITE
    pub cseq: u32,
}

/// Terminal result of a register or unregister request
///
/// Failures name the request they answer so that a late REGISTER failure
/// cannot complete an unregistration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    Unregistered,
    RegisterFailed { reason: String },
    UnregisterFailed { reason: String },
}

/// Dialog state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCallState {
    Ringing,
    /// 200 OK exchanged and confirmed
    Answered,
    Terminated,
}

/// Out-of-band notification from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotification {
    Registration {
        account: EngineAccountHandle,
        outcome: RegistrationOutcome,
    },
    IncomingCall {
        account: EngineAccountHandle,
        key: DialogKey,
        cseq: u32,
        caller: String,
    },
    CallState {
        key: DialogKey,
        state: EngineCallState,
    },
}

/// Channel the engine uses to deliver notifications to the core
///
/// Cheap to clone. Notifications are applied in the order they were sent.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<EngineNotification>,
}

impl NotificationSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EngineNotification>) -> Self {
        Self { tx }
    }

    /// Deliver a notification; returns `false` once the manager is gone
    pub fn notify(&self, notification: EngineNotification) -> bool {
        self.tx.send(notification).is_ok()
    }

    pub fn registration(&self, account: EngineAccountHandle, outcome: RegistrationOutcome) -> bool {
        self.notify(EngineNotification::Registration { account, outcome })
    }

    pub fn call_state(&self, key: DialogKey, state: EngineCallState) -> bool {
        self.notify(EngineNotification::CallState { key, state })
    }
}

/// Engine-side view of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineAccountSnapshot {
    pub handle: EngineAccountHandle,
    pub uri: String,
    pub registration_active: bool,
    /// Seconds until the binding expires
    pub expires: u32,
    /// Last SIP status code of a REGISTER transaction, 0 if none
    pub last_status: u16,
}

/// Read-only diagnostic values of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineDiagnostics {
    pub version: String,
    pub local_address: String,
    pub bound_port: u16,
}

/// Control interface of the underlying SIP engine
#[async_trait]
pub trait EngineAdapter: Send + Sync + 'static {
    /// Start the stack; notifications must be pushed into `sink`
    async fn init(&self, sink: NotificationSink) -> bool;

    async fn shutdown(&self) -> bool;

    /// Create the engine account; returns a negative handle on failure
    async fn create_account(&self, config: &AccountConfig) -> EngineAccountHandle;

    async fn destroy_account(&self, account: EngineAccountHandle) -> bool;

    async fn request_register(&self, account: EngineAccountHandle) -> EngineAck;

    async fn request_unregister(&self, account: EngineAccountHandle) -> EngineAck;

    async fn request_call(&self, account: EngineAccountHandle, destination: &str) -> Result<DialogHandle, EngineFailure>;

    async fn request_answer(&self, account: EngineAccountHandle, key: &DialogKey, cseq: u32) -> EngineAck;

    async fn request_hangup(&self, account: EngineAccountHandle, key: &DialogKey, cseq: u32) -> EngineAck;

    fn query_account_info(&self, account: EngineAccountHandle) -> Option<EngineAccountSnapshot>;

    fn query_accounts(&self) -> Vec<EngineAccountSnapshot>;

    fn query_version(&self) -> String;

    fn query_local_address(&self) -> String;

    fn query_bound_port(&self) -> u16;
}
