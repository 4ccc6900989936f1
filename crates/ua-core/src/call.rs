//! Call dialogs and their state machine
//!
//! A dialog is identified by the tuple (Call-ID, from-tag, to-tag), held in
//! [`DialogKey`]. Dialog state moves forward only:
//!
//! ```text
//! Idle -> Ringing -> Answered -> Active -> Terminating -> Terminated
//! ```
//!
//! Steps may be skipped (a remote BYE jumps straight to `Terminated`, a
//! rejected call never rings) but never taken backwards. Once a dialog is
//! `Terminating` the hangup has won: late answer confirmations from the
//! engine are dropped.
//!
//! Outbound dialogs start `Idle` while the engine is still deciding whether
//! to accept the INVITE; at that point no dialog key exists yet, so they are
//! tracked by their local [`DialogId`] until the engine hands one back.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::account::AccountId;
use crate::engine::EngineCallState;
use crate::error::{UaError, UaResult};
use crate::events::SessionEvent;

/// Local identifier of a dialog, stable from `Idle` onwards
pub type DialogId = Uuid;

/// SIP dialog identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogKey {
    pub call_id: String,
    pub from_tag: String,
    pub to_tag: String,
}

impl DialogKey {
    pub fn new(call_id: impl Into<String>, from_tag: impl Into<String>, to_tag: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            from_tag: from_tag.into(),
            to_tag: to_tag.into(),
        }
    }
}

impl fmt::Display for DialogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};from-tag={};to-tag={}", self.call_id, self.from_tag, self.to_tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CallState {
    Idle,
    Ringing,
    Answered,
    Active,
    Terminating,
    Terminated,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Terminated)
    }

    /// Established media path
    pub fn is_active(&self) -> bool {
        matches!(self, CallState::Active)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Snapshot of a call dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDialog {
    pub id: DialogId,
    pub account_id: AccountId,
    /// Empty until the engine accepts an outbound call
    pub key: DialogKey,
    /// Highest CSeq seen on this dialog
    pub cseq: u32,
    pub direction: CallDirection,
    pub state: CallState,
    /// Destination for outbound calls, caller for inbound ones
    pub remote_uri: String,
    pub created_at: DateTime<Utc>,
}

impl CallDialog {
    pub(crate) fn outbound(account_id: AccountId, destination: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            key: DialogKey::default(),
            cseq: 0,
            direction: CallDirection::Outbound,
            state: CallState::Idle,
            remote_uri: destination,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn inbound(account_id: AccountId, key: DialogKey, cseq: u32, caller: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            key,
            cseq,
            direction: CallDirection::Inbound,
            state: CallState::Ringing,
            remote_uri: caller,
            created_at: Utc::now(),
        }
    }

    /// Reject a CSeq below the current one; otherwise adopt it
    pub(crate) fn advance_cseq(&mut self, cseq: u32) -> UaResult<()> {
        if cseq < self.cseq {
            return Err(UaError::StaleCSeq {
                key: self.key.clone(),
                supplied: cseq,
                current: self.cseq,
            });
        }
        self.cseq = cseq;
        Ok(())
    }
}

/// The one event announcing that `dialog` entered its current state
pub(crate) fn transition_event(dialog: &CallDialog) -> Option<SessionEvent> {
    let dialog = dialog.clone();
    match dialog.state {
        CallState::Idle => None,
        CallState::Ringing => Some(SessionEvent::CallRinging { dialog }),
        CallState::Answered => Some(SessionEvent::CallAnswered { dialog }),
        CallState::Active => Some(SessionEvent::CallActive { dialog }),
        CallState::Terminating => Some(SessionEvent::CallHangup { dialog }),
        CallState::Terminated => Some(SessionEvent::CallTerminated { dialog }),
    }
}

/// Steps an engine state report drives the dialog through, or `None` when
/// the report is stale for the current state
pub(crate) fn on_engine_state(current: CallState, reported: EngineCallState) -> Option<&'static [CallState]> {
    use CallState::*;

    match (current, reported) {
        (Ringing, EngineCallState::Answered) => Some(&[Answered, Active]),
        (Answered, EngineCallState::Answered) => Some(&[Active]),
        (Terminated, _) => None,
        (_, EngineCallState::Terminated) => Some(&[Terminated]),
        _ => None,
    }
}

/// An active dialog and the callers parked on it
#[derive(Debug)]
pub(crate) struct DialogEntry {
    pub(crate) dialog: CallDialog,
    pub(crate) answer_waiter: Option<oneshot::Sender<UaResult<CallDialog>>>,
    pub(crate) hangup_waiters: Vec<oneshot::Sender<UaResult<CallDialog>>>,
}

impl DialogEntry {
    fn new(dialog: CallDialog) -> Self {
        Self {
            dialog,
            answer_waiter: None,
            hangup_waiters: Vec::new(),
        }
    }

    pub(crate) fn resolve_answer(&mut self, result: UaResult<CallDialog>) {
        if let Some(tx) = self.answer_waiter.take() {
            let _ = tx.send(result);
        }
    }

    pub(crate) fn resolve_hangups(&mut self, result: UaResult<CallDialog>) {
        for tx in self.hangup_waiters.drain(..) {
            let _ = tx.send(result.clone());
        }
    }

    /// Final bookkeeping once the dialog reached `Terminated`
    pub(crate) fn finish(mut self) -> CallDialog {
        let key = self.dialog.key.clone();
        self.resolve_answer(Err(UaError::CallTerminated { key }));
        self.resolve_hangups(Ok(self.dialog.clone()));
        self.dialog
    }
}

/// Active-dialog table
#[derive(Debug, Default)]
pub(crate) struct DialogTable {
    dialogs: HashMap<DialogKey, DialogEntry>,
    /// Outbound calls waiting for the engine to accept them
    idle: HashMap<DialogId, CallDialog>,
}

impl DialogTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_idle(&mut self, dialog: CallDialog) {
        self.idle.insert(dialog.id, dialog);
    }

    pub(crate) fn take_idle(&mut self, id: DialogId) -> Option<CallDialog> {
        self.idle.remove(&id)
    }

    pub(crate) fn contains(&self, key: &DialogKey) -> bool {
        self.dialogs.contains_key(key)
    }

    /// Insert a dialog that already has its key; the key must be unused
    pub(crate) fn insert(&mut self, dialog: CallDialog) -> UaResult<()> {
        if self.dialogs.contains_key(&dialog.key) {
            return Err(UaError::DuplicateDialog { key: dialog.key });
        }
        self.dialogs.insert(dialog.key.clone(), DialogEntry::new(dialog));
        Ok(())
    }

    pub(crate) fn get(&self, key: &DialogKey) -> Option<&DialogEntry> {
        self.dialogs.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &DialogKey) -> Option<&mut DialogEntry> {
        self.dialogs.get_mut(key)
    }

    /// Look up a dialog that must belong to `account_id`
    pub(crate) fn owned_mut(&mut self, account_id: AccountId, key: &DialogKey) -> UaResult<&mut DialogEntry> {
        self.dialogs
            .get_mut(key)
            .filter(|entry| entry.dialog.account_id == account_id)
            .ok_or_else(|| UaError::DialogNotFound { key: key.clone() })
    }

    pub(crate) fn remove(&mut self, key: &DialogKey) -> Option<DialogEntry> {
        self.dialogs.remove(key)
    }

    /// Remove every dialog of an account, idle ones included
    pub(crate) fn drain_account(&mut self, account_id: AccountId) -> Vec<DialogEntry> {
        self.idle.retain(|_, dialog| dialog.account_id != account_id);
        let keys: Vec<DialogKey> = self
            .dialogs
            .iter()
            .filter(|(_, entry)| entry.dialog.account_id == account_id)
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter().filter_map(|key| self.dialogs.remove(key)).collect()
    }

    pub(crate) fn snapshots(&self) -> Vec<CallDialog> {
        let mut dialogs: Vec<CallDialog> = self.dialogs.values().map(|e| e.dialog.clone()).collect();
        dialogs.sort_by_key(|d| d.created_at);
        dialogs
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.dialogs.len()
    }
}

/// Aggregate call counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStats {
    /// Dialogs in the active set
    pub total_active_calls: usize,
    /// Dialogs with an established media path
    pub connected_calls: usize,
    pub ringing_calls: usize,
    /// Outbound calls still waiting for the engine
    pub pending_outbound_calls: usize,
}

impl DialogTable {
    pub(crate) fn stats(&self) -> CallStats {
        let count = |state: CallState| self.dialogs.values().filter(|e| e.dialog.state == state).count();
        CallStats {
            total_active_calls: self.len(),
            connected_calls: count(CallState::Active),
            ringing_calls: count(CallState::Ringing),
            pending_outbound_calls: self.idle_count(),
        }
    }
}
