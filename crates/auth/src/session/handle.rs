// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UI-facing handle to the session manager.
//!
//! Reads come straight from the `watch` channel. Credential calls go to the
//! provider directly and their results are handed to the coordinator, which
//! stays the only writer to the store.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::clock::Clock;
use crate::provider::{AuthChange, IdentityProvider, OAuthRequest, ProviderError, Session, SignUpOutcome};
use crate::session::coordinator::Command;
use crate::session::refresh::RefreshError;
use crate::session::{AuthState, LifecycleSignal, SessionStatus};

/// Failure of a handle operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("not signed in")]
    NotAuthenticated,
    #[error(transparent)]
    Refresh(RefreshError),
    #[error("session manager stopped")]
    Closed,
}

impl From<RefreshError> for AuthError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::NotAuthenticated => Self::NotAuthenticated,
            RefreshError::Provider(e) => Self::Provider(e),
            other => Self::Refresh(other),
        }
    }
}

/// Cloneable handle; the coordinator stops when the last one is dropped.
#[derive(Clone)]
pub struct AuthHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<AuthState>,
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
}

impl AuthHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        state: watch::Receiver<AuthState>,
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { commands, state, provider, clock }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `predicate` and return it.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&AuthState) -> bool,
    ) -> Result<AuthState, AuthError> {
        let mut rx = self.state.clone();
        let state = rx.wait_for(|s| predicate(s)).await.map_err(|_| AuthError::Closed)?;
        Ok(state.clone())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let session = self.provider.sign_in_with_password(email, password).await?;
        self.authenticated(session, AuthChange::SignedIn).await
    }

    /// Create an account. Signs in immediately unless the provider requires
    /// e-mail confirmation.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError> {
        let outcome = self.provider.sign_up(email, password).await?;
        if let SignUpOutcome::SignedIn(ref session) = outcome {
            self.authenticated(session.clone(), AuthChange::SignedIn).await?;
        }
        Ok(outcome)
    }

    /// Return the URL the shell should open in the system browser.
    pub async fn sign_in_with_oauth(&self, request: &OAuthRequest) -> Result<String, AuthError> {
        Ok(self.provider.sign_in_with_oauth(request).await?)
    }

    /// Finish a browser redirect. Recovery links set `password_recovery`.
    pub async fn complete_oauth(&self, callback_url: &str) -> Result<(), AuthError> {
        let callback = self.provider.complete_oauth(callback_url).await?;
        let change =
            if callback.recovery { AuthChange::PasswordRecovery } else { AuthChange::SignedIn };
        self.authenticated(callback.session, change).await
    }

    /// Sign out locally, then ask the provider to end the session.
    ///
    /// Once this returns, no background refresh or recovery result can
    /// repopulate the session.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.request(|reply| Command::SignOut { reply }).await
    }

    pub async fn reset_password(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        Ok(self.provider.reset_password_for_email(email, redirect_to).await?)
    }

    pub async fn update_password(&self, password: &str) -> Result<(), AuthError> {
        let session = self.state().live_session().cloned().ok_or(AuthError::NotAuthenticated)?;
        let user = self.provider.update_password(&session, password).await?;
        self.request(|reply| Command::UserUpdated { user, reply }).await
    }

    /// Manual refresh. Joins any refresh already in flight.
    ///
    /// From the error status this retries bootstrap validation instead.
    pub async fn refresh_session(&self) -> Result<(), AuthError> {
        let result = self.request(|reply| Command::Refresh { reply }).await?;
        Ok(result?)
    }

    /// True if a session is held and not past its expiry.
    pub fn is_session_valid(&self) -> bool {
        let state = self.state.borrow();
        state.status.requires_session()
            && state.session_expires_at_ms().is_some_and(|at| at > self.clock.now_ms())
    }

    pub async fn update_last_activity(&self) -> Result<(), AuthError> {
        self.request(|reply| Command::TouchActivity { reply }).await
    }

    /// Forward a platform signal from the desktop shell.
    pub async fn lifecycle(&self, signal: LifecycleSignal) -> Result<(), AuthError> {
        self.commands.send(Command::Lifecycle(signal)).await.map_err(|_| AuthError::Closed)
    }

    async fn authenticated(&self, session: Session, change: AuthChange) -> Result<(), AuthError> {
        self.request(|reply| Command::Authenticated { session, change, reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AuthError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| AuthError::Closed)?;
        rx.await.map_err(|_| AuthError::Closed)
    }
}
