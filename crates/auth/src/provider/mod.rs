// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity provider seam.
//!
//! The session manager never speaks the identity protocol itself. It drives an
//! [`IdentityProvider`] and reacts to the [`ProviderEvent`]s it broadcasts.
//! [`hosted::HostedProvider`] is the adapter for the hosted auth/database
//! service.

pub mod hosted;
pub mod pkce;
pub mod vault;

use std::collections::BTreeMap;
use std::fmt;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Credential bundle issued by the identity provider.
///
/// The refresh token is opaque to the session manager; only the provider
/// adapter reads it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry as milliseconds since the Unix epoch.
    pub expires_at_ms: u64,
    pub user: User,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at_ms", &self.expires_at_ms)
            .field("user", &self.user)
            .finish()
    }
}

/// Authenticated identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// User record from the profiles table.
///
/// Permission flags live here and are never persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub can_add_snippets: bool,
    #[serde(default)]
    pub is_admin: bool,
}

/// Kind of auth-state change announced by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChange {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// Auth-state change broadcast by a provider, with the session it now holds.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub change: AuthChange,
    pub session: Option<Session>,
}

impl ProviderEvent {
    pub fn new(change: AuthChange, session: Option<Session>) -> Self {
        Self { change, session }
    }
}

/// Failure reported by an identity provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider could not be reached or answered with a server error.
    #[error("network error: {0}")]
    Network(String),
    /// The provider answered and refused the request.
    #[error("rejected by identity provider ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The provider holds no session to act on.
    #[error("no session")]
    NoSession,
    /// The provider answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl ProviderError {
    /// Transient failures are retried on the next timer tick or lifecycle
    /// event; everything else is a definitive answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Result of a sign-up request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// The account is usable immediately.
    SignedIn(Session),
    /// The provider sent a confirmation e-mail; no session yet.
    ConfirmationRequired(User),
}

/// Parameters for starting an OAuth sign-in in the system browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthRequest {
    /// Provider identifier: "github", "google", etc.
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Extra query parameters forwarded to the authorize endpoint.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// Session obtained by completing a browser redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCallback {
    pub session: Session,
    /// The redirect came from a password-recovery link.
    pub recovery: bool,
}

/// Hosted identity/database backend, as consumed by the session manager.
///
/// Object-safe for use as `Arc<dyn IdentityProvider>`.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Return the provider's live session after validating it remotely.
    fn get_session(&self) -> BoxFuture<'_, Result<Option<Session>, ProviderError>>;

    /// Exchange the provider-held refresh token for a new session.
    fn refresh_session(&self) -> BoxFuture<'_, Result<Session, ProviderError>>;

    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Session, ProviderError>>;

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<SignUpOutcome, ProviderError>>;

    /// Prepare an OAuth sign-in and return the URL to open in the browser.
    fn sign_in_with_oauth<'a>(
        &'a self,
        request: &'a OAuthRequest,
    ) -> BoxFuture<'a, Result<String, ProviderError>>;

    /// Finish a browser redirect (OAuth code, implicit fragment or recovery link).
    fn complete_oauth<'a>(
        &'a self,
        callback_url: &'a str,
    ) -> BoxFuture<'a, Result<AuthCallback, ProviderError>>;

    /// Best-effort remote sign-out. Local provider state is dropped first.
    fn sign_out(&self) -> BoxFuture<'_, Result<(), ProviderError>>;

    fn reset_password_for_email<'a>(
        &'a self,
        email: &'a str,
        redirect_to: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ProviderError>>;

    fn update_password<'a>(
        &'a self,
        session: &'a Session,
        password: &'a str,
    ) -> BoxFuture<'a, Result<User, ProviderError>>;

    /// Fetch the profile row using the given session's access token.
    fn fetch_profile<'a>(
        &'a self,
        user_id: &'a str,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<Option<Profile>, ProviderError>>;

    /// Subscribe to auth-state changes.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}
