//! Error types for the user-agent core
//!
//! Every failing operation reports a [`UaError`]. Errors fall into the
//! categories returned by [`UaError::category`]:
//!
//! - **validation** - malformed or missing input, raised before anything is touched
//! - **not_found** - an unknown account id or dialog key
//! - **precondition** - the entity is in a state that forbids the operation
//!   (unregistered account, stale CSeq, call not ringing, manager not initialized)
//! - **engine** - the SIP engine rejected an otherwise valid request
//! - **system** - timeouts and internal faults
//!
//! Validation, not-found and precondition failures are local contract
//! violations: they are returned to the caller and never published on the
//! event stream. Engine failures are returned to the caller *and* broadcast
//! as an `error` event so passive observers learn about them.
//!
//! ```rust
//! use rvoip_ua_core::{UaError, AccountId};
//!
//! let err = UaError::AccountNotFound { account_id: AccountId(7) };
//! assert_eq!(err.category(), "not_found");
//! assert!(!err.is_engine_error());
//! ```

use thiserror::Error;

use crate::account::AccountId;
use crate::call::{CallState, DialogKey};
use crate::registration::RegistrationState;

/// Result alias used throughout the crate
pub type UaResult<T> = Result<T, UaError>;

/// Errors produced by the account registry, the registration state machine
/// and the call dialog manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UaError {
    // ----- validation -----
    /// A required field was absent or empty
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// A field was present but unusable
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// A listener subscribed to an event name that does not exist
    #[error("Unknown event name: {name}")]
    UnknownEventName { name: String },

    // ----- not found -----
    #[error("Account not found: {account_id}")]
    AccountNotFound { account_id: AccountId },

    #[error("Dialog not found: {key}")]
    DialogNotFound { key: DialogKey },

    // ----- precondition -----
    /// Commands other than `init` require an initialized manager
    #[error("Manager not initialized")]
    NotInitialized,

    #[error("Account {account_id} is not registered (state: {state})")]
    NotRegistered {
        account_id: AccountId,
        state: RegistrationState,
    },

    /// Registration command arrived while the opposite command is still in flight
    #[error("Account {account_id} is busy (state: {state})")]
    RegistrationBusy {
        account_id: AccountId,
        state: RegistrationState,
    },

    #[error("Invalid call state for dialog {key}: current state is {state}")]
    InvalidCallState { key: DialogKey, state: CallState },

    #[error("Stale CSeq for dialog {key}: supplied {supplied}, current {current}")]
    StaleCSeq {
        key: DialogKey,
        supplied: u32,
        current: u32,
    },

    #[error("Dialog already exists: {key}")]
    DuplicateDialog { key: DialogKey },

    /// The dialog ended before the awaited transition happened
    #[error("Call terminated: {key}")]
    CallTerminated { key: DialogKey },

    /// A later authoritative command replaced this one
    #[error("Operation superseded: {operation}")]
    OperationSuperseded { operation: String },

    // ----- engine -----
    #[error("Engine error during {operation}: {reason}")]
    Engine { operation: String, reason: String },

    // ----- system -----
    #[error("Operation timeout: {operation} after {duration_ms}ms")]
    OperationTimeout { operation: String, duration_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl UaError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField { field: field.into() }
    }

    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn engine(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn superseded(operation: impl Into<String>) -> Self {
        Self::OperationSuperseded {
            operation: operation.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the SIP engine itself reported the failure
    pub fn is_engine_error(&self) -> bool {
        matches!(self, UaError::Engine { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            UaError::AccountNotFound { .. } | UaError::DialogNotFound { .. }
        )
    }

    /// Group the error for metrics and for the `error` event's `kind` field
    pub fn category(&self) -> &'static str {
        match self {
            UaError::MissingField { .. }
            | UaError::InvalidConfiguration { .. }
            | UaError::UnknownEventName { .. } => "validation",

            UaError::AccountNotFound { .. } | UaError::DialogNotFound { .. } => "not_found",

            UaError::NotInitialized
            | UaError::NotRegistered { .. }
            | UaError::RegistrationBusy { .. }
            | UaError::InvalidCallState { .. }
            | UaError::StaleCSeq { .. }
            | UaError::DuplicateDialog { .. }
            | UaError::CallTerminated { .. }
            | UaError::OperationSuperseded { .. } => "precondition",

            UaError::Engine { .. } => "engine",

            UaError::OperationTimeout { .. } | UaError::Internal { .. } => "system",
        }
    }
}
