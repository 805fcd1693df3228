// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session store: single source of truth for the auth state.
//!
//! Passive state only. Policy lives in the coordinator, which is the only
//! caller of [`SessionStore::set`] and [`SessionStore::clear`]. Readers
//! observe changes through a `watch` channel.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::provider::{Profile, User};
use crate::session::persist::{PersistedAuthSnapshot, SnapshotStorage};
use crate::session::{AuthState, SessionSlot, SessionStatus};

/// A patch that would break the status/session coupling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("status {0} requires a session")]
    MissingSession(SessionStatus),
    #[error("status {0} cannot hold a session")]
    UnexpectedSession(SessionStatus),
}

/// Partial update merged atomically into the [`AuthState`].
///
/// `None` leaves a field untouched; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    status: Option<SessionStatus>,
    session: Option<Option<SessionSlot>>,
    user: Option<Option<User>>,
    profile: Option<Option<Profile>>,
    error: Option<Option<String>>,
    last_activity_ms: Option<u64>,
    password_recovery: Option<bool>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn session(mut self, session: Option<SessionSlot>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn user(mut self, user: Option<User>) -> Self {
        self.user = Some(user);
        self
    }

    pub fn profile(mut self, profile: Option<Profile>) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn last_activity(mut self, at_ms: u64) -> Self {
        self.last_activity_ms = Some(at_ms);
        self
    }

    pub fn password_recovery(mut self, recovery: bool) -> Self {
        self.password_recovery = Some(recovery);
        self
    }

    pub fn touches_session(&self) -> bool {
        self.session.is_some()
    }

    fn apply(self, state: &mut AuthState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(session) = self.session {
            state.session = session;
        }
        if let Some(user) = self.user {
            state.user = user;
        }
        if let Some(profile) = self.profile {
            state.profile = profile;
        }
        if let Some(error) = self.error {
            state.error = error;
        }
        if let Some(at) = self.last_activity_ms {
            state.last_activity_ms = at;
        }
        if let Some(recovery) = self.password_recovery {
            state.password_recovery = recovery;
        }
    }
}

/// Check the status/session coupling.
pub fn check_invariant(state: &AuthState) -> Result<(), StoreError> {
    if state.status.requires_session() && state.session.is_none() {
        return Err(StoreError::MissingSession(state.status));
    }
    if state.status == SessionStatus::Expired && state.session.is_some() {
        return Err(StoreError::UnexpectedSession(state.status));
    }
    Ok(())
}

/// Owner of the in-memory auth state and its persisted snapshot.
pub struct SessionStore {
    state: watch::Sender<AuthState>,
    storage: Arc<dyn SnapshotStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SnapshotStorage>, initial: AuthState) -> Self {
        let (state, _rx) = watch::channel(initial);
        Self { state, storage }
    }

    /// Current state snapshot.
    pub fn get(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Merge a patch. The whole patch is rejected if the result would break
    /// the status/session coupling; otherwise the snapshot is rewritten.
    pub fn set(&self, patch: StatePatch) -> Result<(), StoreError> {
        let mut next = self.get();
        patch.apply(&mut next);
        check_invariant(&next)?;
        self.persist(&next);
        self.state.send_replace(next);
        Ok(())
    }

    /// Drop the session, user and profile and delete the persisted snapshot.
    pub fn clear(&self, status: SessionStatus, error: Option<String>) {
        let mut next = AuthState::initial(self.state.borrow().last_activity_ms);
        next.status = status;
        next.error = error;
        if let Err(e) = self.storage.clear() {
            warn!(err = %e, "failed to delete auth snapshot");
        }
        self.state.send_replace(next);
    }

    /// Read the snapshot left by a previous process, if any.
    pub fn load_snapshot(&self) -> Option<PersistedAuthSnapshot> {
        match self.storage.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(err = %e, "ignoring unreadable auth snapshot");
                None
            }
        }
    }

    fn persist(&self, state: &AuthState) {
        let snapshot = PersistedAuthSnapshot::from_state(state);
        match self.storage.save(&snapshot) {
            Ok(()) => debug!(authenticated = snapshot.is_authenticated, "persisted auth snapshot"),
            Err(e) => warn!(err = %e, "failed to persist auth snapshot"),
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
