//! Manager lifecycle: `init` and `shutdown`
//!
//! Both are idempotent. Calling either while the manager is already in the
//! target state succeeds without contacting the engine.

use tracing::{debug, info, warn};

use crate::error::{UaError, UaResult};
use crate::events::SessionEvent;

impl super::SessionManager {
    /// Start the engine and open the manager for commands
    ///
    /// Publishes `initialized` on success. A refusal by the engine is
    /// returned as `UaError::Engine` and broadcast as an `error` event.
    pub async fn init(&self) -> UaResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_initialized() {
            debug!("init called on an initialized manager");
            return Ok(());
        }

        if !self.engine.init(self.sink.clone()).await {
            let err = UaError::engine("init", "engine failed to start");
            self.report_engine_failure(&err);
            return Err(err);
        }

        let mut state = self.lock();
        state.initialized = true;
        self.publish(SessionEvent::Initialized);
        info!("session manager initialized");
        Ok(())
    }

    /// Tear down every account and dialog, then stop the engine
    ///
    /// Each account is removed exactly as [`remove_account`](Self::remove_account)
    /// would: dialogs are hung up, registered accounts unregistered, engine
    /// accounts destroyed. Failures of individual removals are logged and do
    /// not stop the teardown. Publishes `shutdown` last.
    pub async fn shutdown(&self) -> UaResult<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.is_initialized() {
            debug!("shutdown called on a stopped manager");
            return Ok(());
        }

        let ids = self.lock().accounts.ids();
        info!(accounts = ids.len(), "shutting down session manager");
        for id in ids {
            if let Err(e) = self.remove_account(id).await {
                warn!(account_id = %id, error = %e, "account teardown failed during shutdown");
            }
        }

        let stopped = self.engine.shutdown().await;

        let mut state = self.lock();
        state.initialized = false;
        self.publish(SessionEvent::Shutdown);
        if !stopped {
            let err = UaError::engine("shutdown", "engine failed to stop cleanly");
            self.report_engine_failure(&err);
            return Err(err);
        }
        info!("session manager stopped");
        Ok(())
    }
}
