//! SIP accounts and the account registry
//!
//! An account binds an address-of-record to a registrar and a set of
//! credentials. The [`AccountRegistry`] owns every configured account,
//! hands out identifiers and is the only place account records are stored.
//!
//! # Identifiers
//!
//! Ids are assigned monotonically starting at `0` and are never reused
//! within the lifetime of a manager, even after the account is removed.
//! The engine's own handle for the account is kept alongside and is only
//! used to route engine notifications back to the right record.
//!
//! # Usage
//!
//! ```rust
//! use rvoip_ua_core::AccountConfig;
//!
//! let config = AccountConfig::new("sip:100@ex.com", "sip:ex.com", "100", "p")
//!     .with_proxy("sip:proxy.ex.com");
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(format!("{}", config.password), "***");
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::engine::EngineAccountHandle;
use crate::error::{UaError, UaResult};
use crate::registration::RegistrationState;

/// Identifier assigned by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account password
///
/// Never printed: `Debug` and `Display` render `***`, and the owning
/// [`AccountConfig`] skips it when serialized.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    /// The clear-text value, for handing to the engine
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Configuration supplied to `add_account`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Address-of-record, e.g. `sip:alice@example.com`
    pub aor: String,
    /// Registrar accepting REGISTER for the AOR, e.g. `sip:example.com`
    pub registrar: String,
    /// Digest authentication user
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: Password,
    /// Outbound proxy; an empty string is treated as absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl AccountConfig {
    pub fn new(
        aor: impl Into<String>,
        registrar: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<Password>,
    ) -> Self {
        Self {
            aor: aor.into(),
            registrar: registrar.into(),
            username: username.into(),
            password: password.into(),
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Check that `aor`, `registrar`, `username` and `password` are present
    pub fn validate(&self) -> UaResult<()> {
        let required = [
            ("aor", self.aor.as_str()),
            ("registrar", self.registrar.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password.expose()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(UaError::missing_field(field));
            }
        }
        Ok(())
    }

    /// Same configuration with a blank proxy folded into `None`
    pub(crate) fn normalized(mut self) -> Self {
        if self.proxy.as_deref().is_some_and(|p| p.trim().is_empty()) {
            self.proxy = None;
        }
        self
    }
}

/// Read-only projection of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id: AccountId,
    pub aor: String,
    pub registrar: String,
    pub username: String,
    pub proxy: Option<String>,
    pub registration_state: RegistrationState,
    pub is_registered: bool,
    pub created_at: DateTime<Utc>,
}

/// Account record owned by the registry
#[derive(Debug)]
pub(crate) struct Account {
    pub(crate) id: AccountId,
    pub(crate) engine_handle: EngineAccountHandle,
    pub(crate) config: AccountConfig,
    pub(crate) state: RegistrationState,
    pub(crate) created_at: DateTime<Utc>,
    /// Caller waiting for the in-flight register/unregister to complete
    pub(crate) waiter: Option<oneshot::Sender<UaResult<RegistrationState>>>,
}

impl Account {
    pub(crate) fn info(&self) -> AccountInfo {
        AccountInfo {
            id: self.id,
            aor: self.config.aor.clone(),
            registrar: self.config.registrar.clone(),
            username: self.config.username.clone(),
            proxy: self.config.proxy.clone(),
            registration_state: self.state,
            is_registered: self.state.is_registered(),
            created_at: self.created_at,
        }
    }

    /// Resolve the parked caller, if any
    pub(crate) fn resolve(&mut self, result: UaResult<RegistrationState>) {
        if let Some(tx) = self.waiter.take() {
            let _ = tx.send(result);
        }
    }
}

/// Owner of all configured accounts
#[derive(Debug, Default)]
pub(crate) struct AccountRegistry {
    accounts: BTreeMap<AccountId, Account>,
    next_id: u32,
}

impl AccountRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store a new account in `Unregistered` and return its id
    pub(crate) fn insert(&mut self, engine_handle: EngineAccountHandle, config: AccountConfig) -> AccountId {
        let id = AccountId(self.next_id);
        self.next_id += 1;
        self.accounts.insert(
            id,
            Account {
                id,
                engine_handle,
                config,
                state: RegistrationState::Unregistered,
                created_at: Utc::now(),
                waiter: None,
            },
        );
        id
    }

    pub(crate) fn get(&self, id: AccountId) -> UaResult<&Account> {
        self.accounts
            .get(&id)
            .ok_or(UaError::AccountNotFound { account_id: id })
    }

    pub(crate) fn get_mut(&mut self, id: AccountId) -> UaResult<&mut Account> {
        self.accounts
            .get_mut(&id)
            .ok_or(UaError::AccountNotFound { account_id: id })
    }

    pub(crate) fn remove(&mut self, id: AccountId) -> Option<Account> {
        self.accounts.remove(&id)
    }

    pub(crate) fn find_by_handle_mut(&mut self, handle: EngineAccountHandle) -> Option<&mut Account> {
        self.accounts
            .values_mut()
            .find(|account| account.engine_handle == handle)
    }

    pub(crate) fn find_by_handle(&self, handle: EngineAccountHandle) -> Option<&Account> {
        self.accounts
            .values()
            .find(|account| account.engine_handle == handle)
    }

    pub(crate) fn ids(&self) -> Vec<AccountId> {
        self.accounts.keys().copied().collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.accounts.len()
    }
}
