//! Registration state machine
//!
//! Per-account registration lifecycle:
//!
//! ```text
//! Unregistered --register()------> Registering
//! Registering  --engine:success--> Registered
//! Registering  --engine:failure--> Failed
//! Registered   --unregister()----> Unregistering
//! Unregistering --engine:success-> Unregistered
//! Failed       --register()------> Registering
//! ```
//!
//! Two extra edges resolve races between commands: `unregister()` while
//! `Registering` supersedes the pending register, and an unregistration
//! the engine reports as failed still lands in `Unregistered`.
//!
//! The functions here are pure: they only decide. The manager applies the
//! decision to the account record, publishes the event and talks to the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::engine::RegistrationOutcome;
use crate::events::SessionEvent;

/// Registration state of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Unregistering,
    Failed,
}

impl RegistrationState {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationState::Registered)
    }

    /// A register or unregister request is in flight
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            RegistrationState::Registering | RegistrationState::Unregistering
        )
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Unregistered => "Unregistered",
            RegistrationState::Registering => "Registering",
            RegistrationState::Registered => "Registered",
            RegistrationState::Unregistering => "Unregistering",
            RegistrationState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegistrationCommand {
    Register,
    Unregister,
}

/// Decision for an explicit command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandEffect {
    /// Move to the given state and send the request to the engine
    Transition(RegistrationState),
    /// Already pending or done; answer with the current state
    NoOp,
    /// Opposite command in flight
    Busy,
}

/// Decision for an engine notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutcomeEffect {
    Transition {
        next: RegistrationState,
        failure: Option<String>,
    },
    /// Duplicate or late notification; dropped
    Stale,
}

pub(crate) fn on_command(state: RegistrationState, command: RegistrationCommand) -> CommandEffect {
    use RegistrationCommand::*;
    use RegistrationState::*;

    match (command, state) {
        (Register, Unregistered | Failed) => CommandEffect::Transition(Registering),
        (Register, Registering | Registered) => CommandEffect::NoOp,
        (Register, Unregistering) => CommandEffect::Busy,

        (Unregister, Registered | Registering) => CommandEffect::Transition(Unregistering),
        (Unregister, Unregistered | Unregistering | Failed) => CommandEffect::NoOp,
    }
}

pub(crate) fn on_outcome(state: RegistrationState, outcome: &RegistrationOutcome) -> OutcomeEffect {
    use RegistrationState::*;

    match (state, outcome) {
        (Registering, RegistrationOutcome::Registered) => OutcomeEffect::Transition {
            next: Registered,
            failure: None,
        },
        (Registering, RegistrationOutcome::RegisterFailed { reason }) => OutcomeEffect::Transition {
            next: Failed,
            failure: Some(reason.clone()),
        },
        (Unregistering, RegistrationOutcome::Unregistered) => OutcomeEffect::Transition {
            next: Unregistered,
            failure: None,
        },
        (Unregistering, RegistrationOutcome::UnregisterFailed { reason }) => OutcomeEffect::Transition {
            next: Unregistered,
            failure: Some(reason.clone()),
        },
        _ => OutcomeEffect::Stale,
    }
}

/// The one event announcing that `id` entered `next`
pub(crate) fn transition_event(id: AccountId, next: RegistrationState, reason: Option<&str>) -> SessionEvent {
    match next {
        RegistrationState::Registering => SessionEvent::RegistrationStarted { id },
        RegistrationState::Registered => SessionEvent::Registered { id },
        RegistrationState::Failed => SessionEvent::RegisterFailed {
            id,
            reason: reason.unwrap_or("registration failed").to_string(),
        },
        RegistrationState::Unregistering => SessionEvent::UnregistrationStarted { id },
        RegistrationState::Unregistered => SessionEvent::Unregistered { id },
    }
}
