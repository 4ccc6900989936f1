//! Registration commands and engine registration outcomes

use tokio::sync::oneshot;
use tracing::debug;

use crate::account::AccountId;
use crate::engine::{EngineAccountHandle, RegistrationOutcome};
use crate::error::{UaError, UaResult};
use crate::registration::{
    CommandEffect, OutcomeEffect, RegistrationCommand, RegistrationState, on_command, on_outcome, transition_event,
};

/// Result of applying a command to the account record
enum Started {
    /// Nothing to send; the command is answered with this state
    Settled(RegistrationState),
    Pending {
        handle: EngineAccountHandle,
        waiter: oneshot::Receiver<UaResult<RegistrationState>>,
    },
}

impl super::SessionManager {
    /// Register an account with its registrar
    ///
    /// Resolves once the engine reports the outcome: `Ok(Registered)` on
    /// success, `UaError::Engine` when the registrar refused. Calling it while
    /// the account is already `Registering` or `Registered` returns the
    /// current state at once without contacting the engine.
    ///
    /// # Errors
    ///
    /// * `UaError::AccountNotFound` - unknown id
    /// * `UaError::RegistrationBusy` - an unregistration is still in flight
    /// * `UaError::OperationSuperseded` - `unregister` or `remove_account` overtook it
    /// * `UaError::OperationTimeout` - no outcome within the operation timeout
    pub async fn register(&self, id: AccountId) -> UaResult<RegistrationState> {
        let (handle, waiter) = match self.start_registration(id, RegistrationCommand::Register)? {
            Started::Settled(state) => return Ok(state),
            Started::Pending { handle, waiter } => (handle, waiter),
        };

        if let Err(failure) = self.engine.request_register(handle).await {
            self.apply_registration_outcome(handle, RegistrationOutcome::RegisterFailed { reason: failure.reason });
        }
        self.await_completion("register", waiter).await
    }

    /// Remove the account's binding at the registrar
    ///
    /// A no-op returning the current state when the account is
    /// `Unregistered`, `Unregistering` or `Failed`. While `Registering`, the
    /// pending register is superseded. An unregistration the engine reports
    /// as failed still leaves the account `Unregistered` and returns
    /// `UaError::Engine`.
    pub async fn unregister(&self, id: AccountId) -> UaResult<RegistrationState> {
        let (handle, waiter) = match self.start_registration(id, RegistrationCommand::Unregister)? {
            Started::Settled(state) => return Ok(state),
            Started::Pending { handle, waiter } => (handle, waiter),
        };

        if let Err(failure) = self.engine.request_unregister(handle).await {
            self.apply_registration_outcome(handle, RegistrationOutcome::UnregisterFailed { reason: failure.reason });
        }
        self.await_completion("unregister", waiter).await
    }

    fn start_registration(&self, id: AccountId, command: RegistrationCommand) -> UaResult<Started> {
        let mut state = self.lock();
        state.ensure_initialized()?;
        let account = state.accounts.get_mut(id)?;

        match on_command(account.state, command) {
            CommandEffect::NoOp => {
                debug!(account_id = %id, state = %account.state, ?command, "registration command is a no-op");
                Ok(Started::Settled(account.state))
            }
            CommandEffect::Busy => Err(UaError::RegistrationBusy {
                account_id: id,
                state: account.state,
            }),
            CommandEffect::Transition(next) => {
                if account.state == RegistrationState::Registering {
                    account.resolve(Err(UaError::superseded("register")));
                }
                debug!(account_id = %id, from = %account.state, to = %next, "registration transition");
                account.state = next;
                let (tx, waiter) = oneshot::channel();
                account.waiter = Some(tx);
                self.publish(transition_event(id, next, None));
                Ok(Started::Pending {
                    handle: account.engine_handle,
                    waiter,
                })
            }
        }
    }

    /// Apply a terminal registration result reported by the engine
    pub(crate) fn apply_registration_outcome(&self, handle: EngineAccountHandle, outcome: RegistrationOutcome) {
        let mut state = self.lock();
        let Some(account) = state.accounts.find_by_handle_mut(handle) else {
            debug!(engine_handle = handle, ?outcome, "dropping registration outcome for unknown account");
            return;
        };

        let (next, failure) = match on_outcome(account.state, &outcome) {
            OutcomeEffect::Transition { next, failure } => (next, failure),
            OutcomeEffect::Stale => {
                debug!(account_id = %account.id, state = %account.state, ?outcome, "dropping stale registration outcome");
                return;
            }
        };

        let id = account.id;
        debug!(account_id = %id, from = %account.state, to = %next, "registration transition");
        let operation = match outcome {
            RegistrationOutcome::RegisterFailed { .. } => "register",
            _ => "unregister",
        };
        account.state = next;
        self.publish(transition_event(id, next, failure.as_deref()));

        match failure {
            None => account.resolve(Ok(next)),
            Some(reason) => {
                let err = UaError::engine(operation, reason);
                self.report_engine_failure(&err);
                account.resolve(Err(err));
            }
        }
    }
}
