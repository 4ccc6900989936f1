//! Event stream for account and call state changes
//!
//! Every state transition in the core is announced as exactly one
//! [`SessionEvent`] on the manager's [`EventBus`]. Consumers either
//!
//! - register an [`EventListener`] for one event name ([`EventBus::on_named`],
//!   [`EventBus::on`]) or for all of them ([`EventBus::on_any`]), or
//! - take a broadcast receiver ([`EventBus::subscribe`]) or an
//!   [`EventStream`] and pull events at their own pace.
//!
//! # Ordering
//!
//! Events are published in the order their transitions happen, and all
//! consumers see that order. In particular events about one account or one
//! dialog are never reordered.
//!
//! # Failure isolation
//!
//! Listeners run one at a time on a dedicated dispatcher task. A listener
//! that returns an error or panics is logged and skipped; the remaining
//! listeners still receive the event and core state is unaffected.
//!
//! ```rust
//! use rvoip_ua_core::events::{EventBus, EventKind, listener_fn};
//!
//! # async fn example() -> Result<(), rvoip_ua_core::UaError> {
//! let bus = EventBus::new(64);
//! bus.on_named("registered", listener_fn(|event| {
//!     println!("registered: {:?}", event.account_id());
//!     Ok(())
//! }))?;
//! assert_eq!(bus.listener_count(), 1);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, trace, warn};
use uuid::Uuid;

use crate::account::{AccountConfig, AccountId};
use crate::call::{CallDialog, DialogKey};
use crate::error::{UaError, UaResult};

/// Events published by the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SessionEvent {
    Initialized,
    Shutdown,
    AccountAdded { id: AccountId, config: AccountConfig },
    AccountRemoved { id: AccountId },
    RegistrationStarted { id: AccountId },
    Registered { id: AccountId },
    RegisterFailed { id: AccountId, reason: String },
    UnregistrationStarted { id: AccountId },
    Unregistered { id: AccountId },
    CallInitiated { account_id: AccountId, destination: String },
    CallRinging { dialog: CallDialog },
    CallAnswered { dialog: CallDialog },
    CallActive { dialog: CallDialog },
    CallHangup { dialog: CallDialog },
    CallTerminated { dialog: CallDialog },
    /// Engine-originated failure; `kind` is the [`UaError::category`]
    Error { kind: String, detail: String },
}

impl SessionEvent {
    pub(crate) fn from_error(err: &UaError) -> Self {
        SessionEvent::Error {
            kind: err.category().to_string(),
            detail: err.to_string(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Initialized => EventKind::Initialized,
            SessionEvent::Shutdown => EventKind::Shutdown,
            SessionEvent::AccountAdded { .. } => EventKind::AccountAdded,
            SessionEvent::AccountRemoved { .. } => EventKind::AccountRemoved,
            SessionEvent::RegistrationStarted { .. } => EventKind::RegistrationStarted,
            SessionEvent::Registered { .. } => EventKind::Registered,
            SessionEvent::RegisterFailed { .. } => EventKind::RegisterFailed,
            SessionEvent::UnregistrationStarted { .. } => EventKind::UnregistrationStarted,
            SessionEvent::Unregistered { .. } => EventKind::Unregistered,
            SessionEvent::CallInitiated { .. } => EventKind::CallInitiated,
            SessionEvent::CallRinging { .. } => EventKind::CallRinging,
            SessionEvent::CallAnswered { .. } => EventKind::CallAnswered,
            SessionEvent::CallActive { .. } => EventKind::CallActive,
            SessionEvent::CallHangup { .. } => EventKind::CallHangup,
            SessionEvent::CallTerminated { .. } => EventKind::CallTerminated,
            SessionEvent::Error { .. } => EventKind::Error,
        }
    }

    /// Public event name, e.g. `"registrationStarted"`
    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Account the event concerns, if any
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            SessionEvent::AccountAdded { id, .. }
            | SessionEvent::AccountRemoved { id }
            | SessionEvent::RegistrationStarted { id }
            | SessionEvent::Registered { id }
            | SessionEvent::RegisterFailed { id, .. }
            | SessionEvent::UnregistrationStarted { id }
            | SessionEvent::Unregistered { id } => Some(*id),
            SessionEvent::CallInitiated { account_id, .. } => Some(*account_id),
            _ => self.dialog().map(|d| d.account_id),
        }
    }

    pub fn dialog(&self) -> Option<&CallDialog> {
        match self {
            SessionEvent::CallRinging { dialog }
            | SessionEvent::CallAnswered { dialog }
            | SessionEvent::CallActive { dialog }
            | SessionEvent::CallHangup { dialog }
            | SessionEvent::CallTerminated { dialog } => Some(dialog),
            _ => None,
        }
    }

    pub fn dialog_key(&self) -> Option<&DialogKey> {
        self.dialog().map(|d| &d.key)
    }
}

/// Event names consumers can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Initialized,
    Shutdown,
    AccountAdded,
    AccountRemoved,
    RegistrationStarted,
    Registered,
    RegisterFailed,
    UnregistrationStarted,
    Unregistered,
    CallInitiated,
    CallRinging,
    CallAnswered,
    CallActive,
    CallHangup,
    CallTerminated,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 16] = [
        EventKind::Initialized,
        EventKind::Shutdown,
        EventKind::AccountAdded,
        EventKind::AccountRemoved,
        EventKind::RegistrationStarted,
        EventKind::Registered,
        EventKind::RegisterFailed,
        EventKind::UnregistrationStarted,
        EventKind::Unregistered,
        EventKind::CallInitiated,
        EventKind::CallRinging,
        EventKind::CallAnswered,
        EventKind::CallActive,
        EventKind::CallHangup,
        EventKind::CallTerminated,
        EventKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Initialized => "initialized",
            EventKind::Shutdown => "shutdown",
            EventKind::AccountAdded => "accountAdded",
            EventKind::AccountRemoved => "accountRemoved",
            EventKind::RegistrationStarted => "registrationStarted",
            EventKind::Registered => "registered",
            EventKind::RegisterFailed => "registerFailed",
            EventKind::UnregistrationStarted => "unregistrationStarted",
            EventKind::Unregistered => "unregistered",
            EventKind::CallInitiated => "callInitiated",
            EventKind::CallRinging => "callRinging",
            EventKind::CallAnswered => "callAnswered",
            EventKind::CallActive => "callActive",
            EventKind::CallHangup => "callHangup",
            EventKind::CallTerminated => "callTerminated",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UaError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| UaError::UnknownEventName { name: name.to_string() })
    }
}

/// Receiver of published events
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &SessionEvent) -> anyhow::Result<()>;
}

struct FnListener<F>(F);

#[async_trait]
impl<F> EventListener for FnListener<F>
where
    F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_event(&self, event: &SessionEvent) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

/// Wrap a closure as a listener
pub fn listener_fn<F>(f: F) -> Arc<dyn EventListener>
where
    F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

pub type ListenerId = Uuid;

/// Stream of events for pull-style consumers
pub type EventStream = BroadcastStream<SessionEvent>;

struct Subscription {
    id: ListenerId,
    /// `None` receives every event
    kind: Option<EventKind>,
    listener: Arc<dyn EventListener>,
}

impl Subscription {
    fn wants(&self, kind: EventKind) -> bool {
        self.kind.is_none_or(|k| k == kind)
    }
}

type Subscriptions = Arc<RwLock<Vec<Subscription>>>;

/// Ordered publish/subscribe channel
pub struct EventBus {
    stream_tx: broadcast::Sender<SessionEvent>,
    queue_tx: mpsc::UnboundedSender<SessionEvent>,
    subscriptions: Subscriptions,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("stream_receivers", &self.stream_tx.receiver_count())
            .finish()
    }
}

impl EventBus {
    /// Create a bus and spawn its dispatcher; must run inside a tokio runtime
    pub fn new(capacity: usize) -> Self {
        let (stream_tx, _) = broadcast::channel(capacity.max(1));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let subscriptions: Subscriptions = Arc::new(RwLock::new(Vec::new()));

        tokio::spawn(dispatch(queue_rx, subscriptions.clone()));

        Self {
            stream_tx,
            queue_tx,
            subscriptions,
        }
    }

    /// Publish one event to every listener and stream subscriber
    pub fn publish(&self, event: SessionEvent) {
        trace!(event = event.name(), "publishing");
        // no stream subscribers is fine
        let _ = self.stream_tx.send(event.clone());
        if self.queue_tx.send(event).is_err() {
            warn!("event dispatcher stopped; listener delivery skipped");
        }
    }

    pub fn on(&self, kind: EventKind, listener: Arc<dyn EventListener>) -> ListenerId {
        self.add(Some(kind), listener)
    }

    /// Subscribe by public event name, e.g. `"callRinging"`
    pub fn on_named(&self, name: &str, listener: Arc<dyn EventListener>) -> UaResult<ListenerId> {
        let kind = name.parse::<EventKind>()?;
        Ok(self.on(kind, listener))
    }

    pub fn on_any(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.add(None, listener)
    }

    /// Remove a listener; returns whether it was registered
    pub fn off(&self, id: ListenerId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Receiver for every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.stream_tx.subscribe()
    }

    pub fn stream(&self) -> EventStream {
        BroadcastStream::new(self.subscribe())
    }

    fn add(&self, kind: Option<EventKind>, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = Uuid::new_v4();
        self.subscriptions.write().push(Subscription { id, kind, listener });
        id
    }
}

async fn dispatch(mut queue: mpsc::UnboundedReceiver<SessionEvent>, subscriptions: Subscriptions) {
    while let Some(event) = queue.recv().await {
        let kind = event.kind();
        let targets: Vec<Arc<dyn EventListener>> = subscriptions
            .read()
            .iter()
            .filter(|s| s.wants(kind))
            .map(|s| s.listener.clone())
            .collect();

        for listener in targets {
            match AssertUnwindSafe(listener.on_event(&event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(event = event.name(), error = %e, "event listener failed"),
                Err(_) => error!(event = event.name(), "event listener panicked"),
            }
        }
    }
}
