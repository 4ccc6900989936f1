//! Account operations
//!
//! Adding, removing and inspecting accounts. Every mutation publishes its
//! event while the state lock is held, so observers see account events in
//! the order the registry changed.

use tracing::{debug, info, warn};

use crate::account::{AccountConfig, AccountId, AccountInfo};
use crate::call::CallState;
use crate::error::{UaError, UaResult};
use crate::events::SessionEvent;
use crate::registration::{RegistrationState, transition_event};

impl super::SessionManager {
    /// Validate `config`, create the engine account and store it `Unregistered`
    ///
    /// Publishes `accountAdded` with the stored configuration.
    ///
    /// # Errors
    ///
    /// * `UaError::MissingField` - `aor`, `registrar`, `username` or `password` is empty
    /// * `UaError::NotInitialized` - `init` has not succeeded
    /// * `UaError::Engine` - the engine refused to create the account
    pub async fn add_account(&self, config: AccountConfig) -> UaResult<AccountId> {
        config.validate()?;
        self.lock().ensure_initialized()?;

        let config = config.normalized();
        let handle = self.engine.create_account(&config).await;
        if handle < 0 {
            let err = UaError::engine("add_account", format!("engine returned handle {handle}"));
            self.report_engine_failure(&err);
            return Err(err);
        }

        let mut state = self.lock();
        let id = state.accounts.insert(handle, config.clone());
        info!(account_id = %id, aor = %config.aor, engine_handle = handle, "account added");
        self.publish(SessionEvent::AccountAdded { id, config });
        Ok(id)
    }

    /// Add an account and register it in one step
    ///
    /// The account is kept when registration fails; it is then `Failed` and
    /// can be registered again with [`register`](Self::register).
    pub async fn add_and_register(&self, config: AccountConfig) -> UaResult<AccountId> {
        let id = self.add_account(config).await?;
        self.register(id).await?;
        Ok(id)
    }

    /// Remove an account, tearing down its dialogs and registration first
    ///
    /// Event order for a registered account with one call:
    /// `callHangup`, `unregistrationStarted`, `callTerminated`,
    /// `unregistered`, `accountRemoved`. A pending `register` of the account
    /// fails with `UaError::OperationSuperseded`.
    ///
    /// # Errors
    ///
    /// * `UaError::AccountNotFound` - unknown id
    /// * `UaError::Engine` - the engine failed to destroy its account; the
    ///   account is removed from the registry regardless
    pub async fn remove_account(&self, id: AccountId) -> UaResult<()> {
        let (mut account, dialogs, unregister_sent) = {
            let mut state = self.lock();
            state.ensure_initialized()?;
            let mut account = state
                .accounts
                .remove(id)
                .ok_or(UaError::AccountNotFound { account_id: id })?;

            let mut dialogs = Vec::new();
            for mut entry in state.dialogs.drain_account(id) {
                entry.resolve_answer(Err(UaError::superseded("answer_call")));
                // a Terminating dialog already has its hangup at the engine
                let hangup_sent = entry.dialog.state == CallState::Terminating;
                if !hangup_sent {
                    entry.dialog.state = CallState::Terminating;
                    self.publish(SessionEvent::CallHangup {
                        dialog: entry.dialog.clone(),
                    });
                }
                dialogs.push((entry, hangup_sent));
            }

            let unregister_sent = account.state == RegistrationState::Unregistering;
            if matches!(account.state, RegistrationState::Registering | RegistrationState::Registered) {
                account.resolve(Err(UaError::superseded("register")));
                account.state = RegistrationState::Unregistering;
                self.publish(transition_event(id, account.state, None));
            }
            (account, dialogs, unregister_sent)
        };

        // Removed entities are unreachable from the notification pump, so the
        // rest of the teardown publishes without the lock.
        let handle = account.engine_handle;
        for (mut entry, hangup_sent) in dialogs {
            if !hangup_sent {
                if let Err(failure) = self.engine.request_hangup(handle, &entry.dialog.key, entry.dialog.cseq).await {
                    warn!(account_id = %id, call_id = %entry.dialog.key.call_id, reason = %failure, "hangup during account removal failed");
                }
            }
            entry.dialog.state = CallState::Terminated;
            let dialog = entry.finish();
            self.publish(SessionEvent::CallTerminated { dialog });
        }

        if account.state == RegistrationState::Unregistering {
            if !unregister_sent {
                if let Err(failure) = self.engine.request_unregister(handle).await {
                    warn!(account_id = %id, reason = %failure, "unregister during account removal failed");
                }
            }
            account.state = RegistrationState::Unregistered;
            self.publish(transition_event(id, account.state, None));
            account.resolve(Ok(account.state));
        }

        let destroyed = self.engine.destroy_account(handle).await;
        info!(account_id = %id, "account removed");
        self.publish(SessionEvent::AccountRemoved { id });

        if !destroyed {
            let err = UaError::engine("remove_account", format!("engine failed to destroy account handle {handle}"));
            self.report_engine_failure(&err);
            return Err(err);
        }
        Ok(())
    }

    pub fn get_account_info(&self, id: AccountId) -> UaResult<AccountInfo> {
        self.lock().accounts.get(id).map(|account| account.info())
    }

    /// All accounts, ordered by id
    pub fn get_accounts(&self) -> Vec<AccountInfo> {
        self.lock().accounts.iter().map(|account| account.info()).collect()
    }

    /// `false` for unknown ids
    pub fn is_account_registered(&self, id: AccountId) -> bool {
        let registered = self
            .lock()
            .accounts
            .get(id)
            .is_ok_and(|account| account.state.is_registered());
        debug!(account_id = %id, registered, "registration query");
        registered
    }
}
