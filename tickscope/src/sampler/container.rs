//! Single active sampler slot
//!
//! At most one session runs at a time. Ending a session and freeing the
//! slot are separate steps: the session ends first, then the slot is
//! cleared only if it still holds that same session, so a late timer never
//! evicts a newer session.

use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::domain::SamplerError;
use crate::export::Report;
use crate::sampler::session::{EndReason, Session, SessionInfo, SessionState};

#[derive(Default)]
pub struct SamplerContainer {
    slot: Mutex<Option<Arc<Session>>>,
}

impl SamplerContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        // The slot holds a plain pointer, a poisoned lock leaves it consistent
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Claim the slot for `session`.
    ///
    /// # Errors
    /// Returns [`SamplerError::AlreadyRunning`] if another session holds it
    pub fn install(&self, session: Arc<Session>) -> Result<(), SamplerError> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(SamplerError::AlreadyRunning);
        }
        *slot = Some(session);
        Ok(())
    }

    #[must_use]
    pub fn current(&self) -> Option<Arc<Session>> {
        self.slot().clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }

    /// Empty the slot if it still holds `session`.
    pub fn clear_if(&self, session: &Arc<Session>) -> bool {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, session) => {
                *slot = None;
                debug!("Released sampler slot held by #{}", session.id());
                true
            }
            _ => false,
        }
    }

    /// Empty the slot unconditionally.
    pub fn take(&self) -> Option<Arc<Session>> {
        self.slot().take()
    }

    /// Stop the active session and return its report.
    ///
    /// # Errors
    /// Returns [`SamplerError::NotRunning`] if no session is active or it
    /// already ended, or the engine's error
    pub fn stop(&self) -> Result<Arc<Report>, SamplerError> {
        self.end(EndReason::Stopped)?
            .ok_or(SamplerError::NotRunning)
    }

    /// Cancel the active session, discarding its data.
    ///
    /// # Errors
    /// Returns [`SamplerError::NotRunning`] if no session is active
    pub fn cancel(&self) -> Result<(), SamplerError> {
        self.end(EndReason::Cancelled).map(|_| ())
    }

    /// Info on the session that holds the slot.
    ///
    /// A session whose start is still in progress claims the slot but is
    /// not reported yet, matching [`stop`](Self::stop) and
    /// [`cancel`](Self::cancel), which return `NotRunning` for it.
    #[must_use]
    pub fn info(&self) -> Option<SessionInfo> {
        self.current()
            .filter(|s| s.state() != SessionState::Created)
            .map(|s| s.info())
    }

    fn end(&self, reason: EndReason) -> Result<Option<Arc<Report>>, SamplerError> {
        let session = self.current().ok_or(SamplerError::NotRunning)?;
        let outcome = session.finish(reason);
        // Free the slot even when the engine failed
        if !matches!(outcome, Err(SamplerError::NotRunning)) {
            self.clear_if(&session);
        }
        outcome
    }
}
