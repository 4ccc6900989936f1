//! Manager configuration
//!
//! [`ManagerConfig`] holds the instance-level knobs of a
//! [`SessionManager`](crate::SessionManager). Account-level settings live in
//! [`AccountConfig`](crate::AccountConfig).
//!
//! ```rust
//! use rvoip_ua_core::ManagerConfig;
//! use std::time::Duration;
//!
//! let config = ManagerConfig::new()
//!     .with_event_capacity(1024)
//!     .with_operation_timeout(Duration::from_secs(10));
//!
//! assert_eq!(config.event_capacity, 1024);
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{UaError, UaResult};

/// Default broadcast buffer for event stream subscribers
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default wait for a terminal engine notification (64 * T1)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Number of events buffered per stream subscriber before it starts lagging
    pub event_capacity: usize,

    /// How long `register`, `unregister`, `answer_call` and `hangup_call`
    /// wait for the engine to report the terminal transition
    #[serde(with = "duration_ms", rename = "operation_timeout_ms")]
    pub operation_timeout: Duration,
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn validate(&self) -> UaResult<()> {
        if self.event_capacity == 0 {
            return Err(UaError::invalid_configuration(
                "event_capacity",
                "must be greater than zero",
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err(UaError::invalid_configuration(
                "operation_timeout",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
