//! # RVOIP UA Core
//!
//! Account registration and call dialog management on top of a SIP engine.
//!
//! This crate sits between application code and a SIP protocol stack. It
//! owns the set of configured accounts, runs the per-account registration
//! state machine and the per-dialog call state machine, and turns the
//! engine's asynchronous notifications into one ordered event stream.
//!
//! The engine itself (transport, message encoding, media) is not part of
//! this crate; it is plugged in through the [`EngineAdapter`] trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_ua_core::{AccountConfig, EngineAdapter, ManagerConfig, SessionManager};
//!
//! async fn run(engine: Arc<dyn EngineAdapter>) -> Result<(), rvoip_ua_core::UaError> {
//!     let manager = SessionManager::new(ManagerConfig::default(), engine)?;
//!     manager.init().await?;
//!
//!     let account = manager
//!         .add_account(AccountConfig::new("sip:100@ex.com", "sip:ex.com", "100", "secret"))
//!         .await?;
//!     manager.register(account).await?;
//!
//!     let call = manager.make_call(account, "sip:200@ex.com").await?;
//!     manager.hangup_call(account, &call.key, call.cseq).await?;
//!
//!     manager.shutdown().await
//! }
//! ```
//!
//! ## Events
//!
//! Every state change is published as a [`SessionEvent`]. Listeners can be
//! attached by event name through [`EventBus::on_named`], or the whole
//! stream consumed with [`SessionManager::events`].
//!
//! ## Modules
//!
//! - [`account`] - account configuration and the account registry
//! - [`registration`] - registration states and transitions
//! - [`call`] - dialog keys, call states and the dialog table
//! - [`events`] - the event enum and the event bus
//! - [`engine`] - the engine boundary
//! - [`manager`] - the session manager tying it all together

pub mod account;
pub mod call;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod manager;
pub mod registration;

pub use account::{AccountConfig, AccountId, AccountInfo, Password};
pub use call::{CallDialog, CallDirection, CallState, CallStats, DialogId, DialogKey};
pub use config::ManagerConfig;
pub use engine::{
    DialogHandle, EngineAccountHandle, EngineAccountSnapshot, EngineAck, EngineAdapter, EngineCallState,
    EngineDiagnostics, EngineFailure, EngineNotification, NotificationSink, RegistrationOutcome,
};
pub use error::{UaError, UaResult};
pub use events::{EventBus, EventKind, EventListener, EventStream, ListenerId, SessionEvent, listener_fn};
pub use manager::{SessionManager, UaStats};
pub use registration::RegistrationState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
