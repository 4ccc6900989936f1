//! Call operations and dialog notifications
//!
//! Commands:
//!
//! - [`make_call`](super::SessionManager::make_call) resolves when the engine
//!   accepted the INVITE and the dialog is `Ringing`
//! - [`answer_call`](super::SessionManager::answer_call) resolves when the
//!   engine confirms the answer and the dialog is `Active`
//! - [`hangup_call`](super::SessionManager::hangup_call) resolves when the
//!   dialog is `Terminated` and gone from the active set
//!
//! A hangup always wins over an answer in flight: the dialog moves to
//! `Terminating` at once and a late answer confirmation is dropped.

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::account::AccountId;
use crate::call::{CallDialog, CallDirection, CallState, DialogId, DialogKey, on_engine_state, transition_event};
use crate::engine::{DialogHandle, EngineAccountHandle, EngineCallState};
use crate::error::{UaError, UaResult};
use crate::events::SessionEvent;

type DialogWaiter = oneshot::Receiver<UaResult<CallDialog>>;

/// What to do once the engine accepted an outbound call
enum Accepted {
    Ringing(CallDialog),
    /// The idle dialog vanished while the engine was working
    Orphaned(DialogHandle),
    /// The engine handed back a key that an active dialog already owns
    Duplicate(DialogHandle),
}

impl super::SessionManager {
    /// Place an outbound call from a registered account
    ///
    /// Publishes `callInitiated` at once and `callRinging` when the engine
    /// accepts the call; the returned snapshot carries the dialog key the
    /// engine assigned.
    ///
    /// # Errors
    ///
    /// * `UaError::MissingField` - empty destination
    /// * `UaError::AccountNotFound` - unknown account
    /// * `UaError::NotRegistered` - the account is not `Registered`
    /// * `UaError::Engine` - the engine rejected the call, or accepted it under
    ///   a dialog key already in use; no dialog remains
    /// * `UaError::OperationSuperseded` - the account was removed meanwhile
    pub async fn make_call(&self, account_id: AccountId, destination: impl Into<String>) -> UaResult<CallDialog> {
        let destination = destination.into();
        if destination.trim().is_empty() {
            return Err(UaError::missing_field("destination"));
        }

        let (handle, dialog_id) = {
            let mut state = self.lock();
            state.ensure_initialized()?;
            let account = state.accounts.get(account_id)?;
            if !account.state.is_registered() {
                return Err(UaError::NotRegistered {
                    account_id,
                    state: account.state,
                });
            }
            let handle = account.engine_handle;

            let dialog = CallDialog::outbound(account_id, destination.clone());
            let dialog_id = dialog.id;
            state.dialogs.insert_idle(dialog);
            debug!(account_id = %account_id, %dialog_id, %destination, "outbound dialog created");
            self.publish(SessionEvent::CallInitiated {
                account_id,
                destination: destination.clone(),
            });
            (handle, dialog_id)
        };

        match self.engine.request_call(handle, &destination).await {
            Ok(accepted) => match self.accept_outbound(dialog_id, accepted)? {
                Accepted::Ringing(dialog) => Ok(dialog),
                Accepted::Orphaned(accepted) => {
                    debug!(call_id = %accepted.key.call_id, "hanging up call accepted for a removed dialog");
                    if let Err(failure) = self.engine.request_hangup(handle, &accepted.key, accepted.cseq).await {
                        warn!(call_id = %accepted.key.call_id, reason = %failure, "orphaned call hangup failed");
                    }
                    Err(UaError::superseded("make_call"))
                }
                Accepted::Duplicate(accepted) => {
                    if let Err(failure) = self.engine.request_hangup(handle, &accepted.key, accepted.cseq).await {
                        warn!(call_id = %accepted.key.call_id, reason = %failure, "duplicate call hangup failed");
                    }
                    let err = UaError::engine("make_call", format!("dialog key already in use: {}", accepted.key));
                    self.report_engine_failure(&err);
                    Err(err)
                }
            },
            Err(failure) => {
                let mut state = self.lock();
                state.dialogs.take_idle(dialog_id);
                let err = UaError::engine("make_call", failure.reason);
                self.report_engine_failure(&err);
                Err(err)
            }
        }
    }

    fn accept_outbound(&self, dialog_id: DialogId, accepted: DialogHandle) -> UaResult<Accepted> {
        let mut state = self.lock();
        let Some(mut dialog) = state.dialogs.take_idle(dialog_id) else {
            return Ok(Accepted::Orphaned(accepted));
        };
        if state.dialogs.contains(&accepted.key) {
            warn!(call_id = %accepted.key.call_id, "engine returned a dialog key that is already active");
            return Ok(Accepted::Duplicate(accepted));
        }

        dialog.key = accepted.key;
        dialog.cseq = accepted.cseq;
        dialog.state = CallState::Ringing;
        state.dialogs.insert(dialog.clone())?;
        info!(account_id = %dialog.account_id, call_id = %dialog.key.call_id, "outbound call ringing");
        self.publish(SessionEvent::CallRinging { dialog: dialog.clone() });
        Ok(Accepted::Ringing(dialog))
    }

    /// Answer a ringing inbound call
    ///
    /// Publishes `callAnswered` at once and `callActive` when the engine
    /// confirms. `cseq` must not be lower than the dialog's current CSeq.
    ///
    /// # Errors
    ///
    /// * `UaError::DialogNotFound` - no such dialog on this account
    /// * `UaError::InvalidCallState` - not an inbound call in `Ringing`
    /// * `UaError::StaleCSeq` - `cseq` below the dialog's; nothing changes
    /// * `UaError::OperationSuperseded` - hung up before the engine confirmed
    /// * `UaError::CallTerminated` - the remote side ended the call first
    /// * `UaError::Engine` - the engine rejected the answer; the dialog is gone
    pub async fn answer_call(&self, account_id: AccountId, key: &DialogKey, cseq: u32) -> UaResult<CallDialog> {
        let (handle, waiter) = {
            let mut state = self.lock();
            state.ensure_initialized()?;
            let handle = state.accounts.get(account_id)?.engine_handle;
            let entry = state.dialogs.owned_mut(account_id, key)?;
            if entry.dialog.direction != CallDirection::Inbound || entry.dialog.state != CallState::Ringing {
                return Err(UaError::InvalidCallState {
                    key: key.clone(),
                    state: entry.dialog.state,
                });
            }
            entry.dialog.advance_cseq(cseq)?;

            entry.dialog.state = CallState::Answered;
            let (tx, waiter) = oneshot::channel();
            entry.answer_waiter = Some(tx);
            debug!(call_id = %key.call_id, cseq, "answering call");
            self.publish(SessionEvent::CallAnswered {
                dialog: entry.dialog.clone(),
            });
            (handle, waiter)
        };

        if let Err(failure) = self.engine.request_answer(handle, key, cseq).await {
            self.abort_dialog(key, CallState::Answered, UaError::engine("answer_call", failure.reason));
        }
        self.await_completion("answer_call", waiter).await
    }

    /// Hang up a call in any non-terminal state
    ///
    /// Publishes `callHangup` at once and `callTerminated` when the engine
    /// confirms; the dialog then leaves the active set. Hanging up a dialog
    /// that is already `Terminating` waits for the same completion without
    /// sending another request.
    ///
    /// # Errors
    ///
    /// * `UaError::DialogNotFound` - no such dialog on this account
    /// * `UaError::StaleCSeq` - `cseq` below the dialog's; nothing changes
    /// * `UaError::Engine` - the engine rejected the hangup; the dialog is
    ///   terminated locally
    pub async fn hangup_call(&self, account_id: AccountId, key: &DialogKey, cseq: u32) -> UaResult<CallDialog> {
        let (handle, waiter, send) = {
            let mut state = self.lock();
            state.ensure_initialized()?;
            let handle = state.accounts.get(account_id)?.engine_handle;
            let entry = state.dialogs.owned_mut(account_id, key)?;
            entry.dialog.advance_cseq(cseq)?;

            let send = entry.dialog.state != CallState::Terminating;
            if send {
                entry.dialog.state = CallState::Terminating;
                entry.resolve_answer(Err(UaError::superseded("answer_call")));
                debug!(call_id = %key.call_id, cseq, "hanging up call");
                self.publish(SessionEvent::CallHangup {
                    dialog: entry.dialog.clone(),
                });
            }
            let (tx, waiter): (_, DialogWaiter) = oneshot::channel();
            entry.hangup_waiters.push(tx);
            (handle, waiter, send)
        };

        if send {
            if let Err(failure) = self.engine.request_hangup(handle, key, cseq).await {
                self.abort_dialog(key, CallState::Terminating, UaError::engine("hangup_call", failure.reason));
            }
        }
        self.await_completion("hangup_call", waiter).await
    }

    /// End a dialog whose engine request failed, if it is still in `expected`
    fn abort_dialog(&self, key: &DialogKey, expected: CallState, err: UaError) {
        let mut state = self.lock();
        let still_waiting = state
            .dialogs
            .get(key)
            .is_some_and(|entry| entry.dialog.state == expected);
        if still_waiting {
            if let Some(mut entry) = state.dialogs.remove(key) {
                entry.resolve_answer(Err(err.clone()));
                entry.resolve_hangups(Err(err.clone()));
                entry.dialog.state = CallState::Terminated;
                let dialog = entry.finish();
                self.publish(SessionEvent::CallTerminated { dialog });
            }
        }
        self.report_engine_failure(&err);
    }

    /// New inbound dialog announced by the engine
    pub(crate) fn apply_incoming_call(&self, handle: EngineAccountHandle, key: DialogKey, cseq: u32, caller: String) {
        let mut state = self.lock();
        let Some(account_id) = state.accounts.find_by_handle(handle).map(|account| account.id) else {
            debug!(engine_handle = handle, call_id = %key.call_id, "dropping incoming call for unknown account");
            return;
        };

        let dialog = CallDialog::inbound(account_id, key, cseq, caller);
        match state.dialogs.insert(dialog.clone()) {
            Ok(()) => {
                info!(account_id = %account_id, call_id = %dialog.key.call_id, caller = %dialog.remote_uri, "incoming call");
                self.publish(SessionEvent::CallRinging { dialog });
            }
            Err(e) => debug!(error = %e, "dropping incoming call"),
        }
    }

    /// Dialog state change reported by the engine
    pub(crate) fn apply_call_state(&self, key: &DialogKey, reported: EngineCallState) {
        let mut state = self.lock();
        let Some(entry) = state.dialogs.get_mut(key) else {
            debug!(call_id = %key.call_id, ?reported, "dropping state report for unknown dialog");
            return;
        };
        let Some(steps) = on_engine_state(entry.dialog.state, reported) else {
            debug!(call_id = %key.call_id, state = %entry.dialog.state, ?reported, "dropping stale dialog state report");
            return;
        };

        for &step in steps {
            debug!(call_id = %key.call_id, from = %entry.dialog.state, to = %step, "dialog transition");
            entry.dialog.state = step;
            if let Some(event) = transition_event(&entry.dialog) {
                self.publish(event);
            }
        }

        let reached = entry.dialog.state;
        match reached {
            CallState::Active => {
                let dialog = entry.dialog.clone();
                entry.resolve_answer(Ok(dialog));
            }
            CallState::Terminated => {
                if let Some(entry) = state.dialogs.remove(key) {
                    info!(call_id = %key.call_id, "call terminated");
                    entry.finish();
                }
            }
            _ => {}
        }
    }
}
