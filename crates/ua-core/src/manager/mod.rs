//! Session manager
//!
//! [`SessionManager`] is the explicit owner of the account registry, the
//! registration and dialog state machines, the engine handle and the event
//! bus. Applications create one per engine, call [`SessionManager::init`],
//! and pass the `Arc` wherever account or call operations are needed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                SessionManager               │
//! │  ┌───────────────┐     ┌─────────────────┐  │
//! │  │AccountRegistry│     │   DialogTable   │  │
//! │  └───────┬───────┘     └────────┬────────┘  │
//! │          └──── Mutex<CoreState> ┘           │
//! │        │ commands           ▲ pump task     │
//! └────────┼────────────────────┼───────────────┘
//!          ▼                    │ EngineNotification
//!   ┌─────────────┐      ┌──────┴───────┐
//!   │EngineAdapter│ ───► │NotificationSink│
//!   └─────────────┘      └──────────────┘
//! ```
//!
//! All state lives behind one mutex that is only held for synchronous
//! bookkeeping, never across an engine call. Commands that need the engine's
//! verdict park a oneshot waiter on the entity; the notification pump
//! resolves it when the terminal transition arrives.
//!
//! Operations are split by concern:
//!
//! - `lifecycle` - `init`, `shutdown`
//! - `accounts` - add, remove and inspect accounts
//! - `registration` - `register`, `unregister` and registration outcomes
//! - `calls` - make, answer and hang up calls and dialog notifications

mod accounts;
mod calls;
mod lifecycle;
mod registration;

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::account::{AccountId, AccountRegistry};
use crate::call::{CallDialog, CallStats, DialogKey, DialogTable};
use crate::config::ManagerConfig;
use crate::engine::{EngineAdapter, EngineAccountSnapshot, EngineDiagnostics, EngineNotification, NotificationSink};
use crate::error::{UaError, UaResult};
use crate::events::{EventBus, EventStream, SessionEvent};
use crate::registration::RegistrationState;

/// Mutable state guarded by the manager's lock
#[derive(Debug, Default)]
pub(crate) struct CoreState {
    pub(crate) initialized: bool,
    pub(crate) accounts: AccountRegistry,
    pub(crate) dialogs: DialogTable,
}

impl CoreState {
    pub(crate) fn ensure_initialized(&self) -> UaResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(UaError::NotInitialized)
        }
    }
}

/// Aggregate counters returned by [`SessionManager::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UaStats {
    pub total_accounts: usize,
    pub registered_accounts: usize,
    /// Accounts with a register or unregister in flight
    pub pending_registrations: usize,
    pub failed_registrations: usize,
    pub calls: CallStats,
}

/// Account and call session manager
pub struct SessionManager {
    config: ManagerConfig,
    engine: Arc<dyn EngineAdapter>,
    events: EventBus,
    state: Mutex<CoreState>,
    sink: NotificationSink,
    /// Serializes `init` and `shutdown`
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .field("events", &self.events)
            .finish()
    }
}

impl SessionManager {
    /// Create a manager driving `engine`
    ///
    /// Must be called from within a tokio runtime: the event dispatcher and
    /// the engine notification pump are spawned here. The manager starts
    /// uninitialized; call [`init`](Self::init) before anything else.
    ///
    /// # Errors
    ///
    /// * `UaError::InvalidConfiguration` - `config` failed validation
    /// * `UaError::Internal` - no tokio runtime is running
    pub fn new(config: ManagerConfig, engine: Arc<dyn EngineAdapter>) -> UaResult<Arc<Self>> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| UaError::internal(format!("SessionManager requires a tokio runtime: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            events: EventBus::new(config.event_capacity),
            config,
            engine,
            state: Mutex::new(CoreState::default()),
            sink: NotificationSink::new(tx),
            lifecycle: tokio::sync::Mutex::new(()),
        });

        tokio::spawn(pump(Arc::downgrade(&manager), rx));
        Ok(manager)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Stream of every event published from now on
    pub fn events(&self) -> EventStream {
        self.events.stream()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Current counters for accounts and dialogs
    pub fn stats(&self) -> UaStats {
        let state = self.lock();
        let count = |wanted: RegistrationState| state.accounts.iter().filter(|a| a.state == wanted).count();
        UaStats {
            total_accounts: state.accounts.len(),
            registered_accounts: count(RegistrationState::Registered),
            pending_registrations: state.accounts.iter().filter(|a| a.state.is_pending()).count(),
            failed_registrations: count(RegistrationState::Failed),
            calls: state.dialogs.stats(),
        }
    }

    // ----- read-only call projections -----

    pub fn get_call(&self, key: &DialogKey) -> UaResult<CallDialog> {
        self.lock()
            .dialogs
            .get(key)
            .map(|entry| entry.dialog.clone())
            .ok_or_else(|| UaError::DialogNotFound { key: key.clone() })
    }

    /// Active dialogs, oldest first
    pub fn active_calls(&self) -> Vec<CallDialog> {
        self.lock().dialogs.snapshots()
    }

    // ----- engine diagnostics -----

    pub fn version(&self) -> String {
        self.engine.query_version()
    }

    pub fn local_address(&self) -> String {
        self.engine.query_local_address()
    }

    pub fn bound_port(&self) -> u16 {
        self.engine.query_bound_port()
    }

    pub fn diagnostics(&self) -> EngineDiagnostics {
        EngineDiagnostics {
            version: self.version(),
            local_address: self.local_address(),
            bound_port: self.bound_port(),
        }
    }

    /// The engine's view of one account
    pub fn engine_account_info(&self, id: AccountId) -> UaResult<Option<EngineAccountSnapshot>> {
        let handle = self.lock().accounts.get(id)?.engine_handle;
        Ok(self.engine.query_account_info(handle))
    }

    pub fn engine_accounts(&self) -> Vec<EngineAccountSnapshot> {
        self.engine.query_accounts()
    }

    // ----- internals shared by the operation modules -----

    pub(crate) fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        self.events.publish(event);
    }

    /// Log an engine failure and broadcast it as an `error` event
    pub(crate) fn report_engine_failure(&self, err: &UaError) {
        warn!(error = %err, "engine reported failure");
        self.publish(SessionEvent::from_error(err));
    }

    /// Wait for a parked command to be resolved, bounded by the operation timeout
    pub(crate) async fn await_completion<T>(
        &self,
        operation: &str,
        waiter: oneshot::Receiver<UaResult<T>>,
    ) -> UaResult<T> {
        let limit = self.config.operation_timeout;
        match tokio::time::timeout(limit, waiter).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(UaError::internal(format!("{operation} completion was dropped"))),
            Err(_) => {
                warn!(operation, timeout_ms = limit.as_millis() as u64, "engine did not complete operation in time");
                Err(UaError::OperationTimeout {
                    operation: operation.to_string(),
                    duration_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    fn apply_notification(&self, notification: EngineNotification) {
        match notification {
            EngineNotification::Registration { account, outcome } => {
                self.apply_registration_outcome(account, outcome);
            }
            EngineNotification::IncomingCall {
                account,
                key,
                cseq,
                caller,
            } => {
                self.apply_incoming_call(account, key, cseq, caller);
            }
            EngineNotification::CallState { key, state } => {
                self.apply_call_state(&key, state);
            }
        }
    }
}

/// Feed engine notifications into the manager, one at a time, in arrival order
async fn pump(manager: Weak<SessionManager>, mut notifications: mpsc::UnboundedReceiver<EngineNotification>) {
    while let Some(notification) = notifications.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.apply_notification(notification);
    }
    debug!("engine notification pump stopped");
}
