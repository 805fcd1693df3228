// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter for a hosted GoTrue/PostgREST-style auth and database service.
//!
//! The adapter owns the refresh token (in its [`Vault`]) and broadcasts a
//! [`ProviderEvent`] for every change it makes, the same way the hosted
//! client library does. A refresh the service rejects clears the vault and
//! emits `SignedOut`; the coordinator treats that as a spurious logout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::provider::pkce::{self, callback_params};
use crate::provider::vault::Vault;
use crate::provider::{
    AuthCallback, AuthChange, IdentityProvider, OAuthRequest, Profile, ProviderError,
    ProviderEvent, Session, SignUpOutcome, User,
};

/// Default table holding user profiles.
pub const DEFAULT_PROFILE_TABLE: &str = "profiles";

/// A held session this close to expiry is refreshed instead of validated.
const EXPIRY_LEEWAY_MS: u64 = 30_000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Install the ring crypto provider for rustls (idempotent).
pub fn ensure_crypto() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Connection settings for the hosted service.
#[derive(Debug, Clone)]
pub struct HostedConfig {
    /// Project URL, e.g. `https://abc.supabase.co`.
    pub base_url: String,
    /// Public anonymous API key, sent as `apikey` on every request.
    pub anon_key: String,
    pub profile_table: String,
    /// Default OAuth redirect target.
    pub redirect_url: Option<String>,
    /// Directory for the credential vault; `None` keeps it in memory.
    pub state_dir: Option<PathBuf>,
}

impl HostedConfig {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            anon_key: anon_key.into(),
            profile_table: DEFAULT_PROFILE_TABLE.to_owned(),
            redirect_url: None,
            state_dir: None,
        }
    }
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    /// Absolute expiry in epoch seconds.
    #[serde(default)]
    expires_at: Option<u64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now_ms: u64) -> Session {
        let expires_at_ms = match self.expires_at {
            Some(secs) => secs.saturating_mul(1000),
            None => now_ms.saturating_add(self.expires_in.saturating_mul(1000)),
        };
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at_ms,
            user: self.user,
        }
    }
}

/// Error body; the service uses several shapes.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.error_description.or(self.msg).or(self.message).or(self.error)
    }
}

struct Inner {
    vault: Vault,
    /// Bumped by sign-out. A refresh started under an older generation must
    /// not write the vault back.
    generation: u64,
    /// PKCE verifier of the OAuth flow in progress.
    verifier: Option<String>,
}

pub struct HostedProvider {
    client: reqwest::Client,
    config: HostedConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    /// Serializes refresh-token use; the service rotates refresh tokens.
    refresh_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ProviderEvent>,
}

impl HostedProvider {
    pub fn new(config: HostedConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        ensure_crypto();
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let vault = match config.state_dir {
            Some(ref dir) => Vault::in_dir(dir),
            None => Vault::ephemeral(),
        };
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            client,
            config,
            clock,
            inner: Mutex::new(Inner { vault, generation: 0, verifier: None }),
            refresh_lock: tokio::sync::Mutex::new(()),
            events,
        })
    }

    /// Session currently held in the vault.
    pub fn held_session(&self) -> Option<Session> {
        self.inner.lock().vault.session().cloned()
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.config.base_url))
            .header("apikey", &self.config.anon_key)
    }

    fn emit(&self, change: AuthChange, session: Option<Session>) {
        let _ = self.events.send(ProviderEvent::new(change, session));
    }

    fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Store `session` unless a sign-out happened since `generation`.
    fn store_if_current(&self, generation: u64, session: &Session) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.vault.store(session.clone());
        true
    }

    async fn token(&self, grant_type: &str, body: serde_json::Value) -> Result<Session, ProviderError> {
        let resp = self
            .request(reqwest::Method::POST, "/auth/v1/token")
            .query(&[("grant_type", grant_type)])
            .json(&body)
            .send()
            .await
            .map_err(network)?;
        let token: TokenResponse = decode(check(resp).await?).await?;
        Ok(token.into_session(self.clock.now_ms()))
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, ProviderError> {
        let resp = self
            .request(reqwest::Method::GET, "/auth/v1/user")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(network)?;
        decode(check(resp).await?).await
    }

    /// Session from an implicit-flow redirect fragment.
    async fn implicit_session(
        &self,
        params: &std::collections::HashMap<String, String>,
        access_token: &str,
    ) -> Result<Session, ProviderError> {
        let now_ms = self.clock.now_ms();
        let expires_at_ms = match params.get("expires_at").and_then(|v| v.parse::<u64>().ok()) {
            Some(secs) => secs.saturating_mul(1000),
            None => {
                let expires_in =
                    params.get("expires_in").and_then(|v| v.parse::<u64>().ok()).unwrap_or(3600);
                now_ms.saturating_add(expires_in.saturating_mul(1000))
            }
        };
        let user = self.fetch_user(access_token).await?;
        Ok(Session {
            access_token: access_token.to_owned(),
            refresh_token: params.get("refresh_token").cloned(),
            expires_at_ms,
            user,
        })
    }

    async fn do_refresh(&self) -> Result<Session, ProviderError> {
        let before = self.held_session();
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have rotated the token while we waited.
        let (held, generation) = {
            let inner = self.inner.lock();
            (inner.vault.session().cloned(), inner.generation)
        };
        let Some(held) = held else {
            return Err(ProviderError::NoSession);
        };
        let rotated = before.as_ref().is_some_and(|b| b.access_token != held.access_token);
        if rotated && !held.is_expired_at(self.clock.now_ms() + EXPIRY_LEEWAY_MS) {
            debug!("refresh already performed by a concurrent caller");
            return Ok(held);
        }
        let Some(refresh_token) = held.refresh_token else {
            return Err(ProviderError::NoSession);
        };

        match self.token("refresh_token", json!({ "refresh_token": refresh_token })).await {
            Ok(session) => {
                if !self.store_if_current(generation, &session) {
                    debug!("discarding refresh that completed after sign-out");
                    return Err(ProviderError::NoSession);
                }
                self.emit(AuthChange::TokenRefreshed, Some(session.clone()));
                Ok(session)
            }
            Err(e @ ProviderError::Rejected { .. }) => {
                warn!(err = %e, "refresh token rejected, dropping provider session");
                let cleared = {
                    let mut inner = self.inner.lock();
                    inner.generation == generation && inner.vault.take().is_some()
                };
                if cleared {
                    self.emit(AuthChange::SignedOut, None);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn signed_in(&self, session: &Session, change: AuthChange) {
        let generation = self.generation();
        self.store_if_current(generation, session);
        info!(user_id = %session.user.id, ?change, "provider session established");
        self.emit(change, Some(session.clone()));
    }
}

impl IdentityProvider for HostedProvider {
    fn get_session(&self) -> BoxFuture<'_, Result<Option<Session>, ProviderError>> {
        async move {
            let Some(held) = self.held_session() else {
                return Ok(None);
            };
            if held.is_expired_at(self.clock.now_ms() + EXPIRY_LEEWAY_MS) {
                debug!("held session expired, refreshing");
                return match self.do_refresh().await {
                    Ok(session) => Ok(Some(session)),
                    Err(ProviderError::Rejected { .. } | ProviderError::NoSession) => Ok(None),
                    Err(e) => Err(e),
                };
            }
            match self.fetch_user(&held.access_token).await {
                Ok(user) => Ok(Some(Session { user, ..held })),
                Err(ProviderError::Rejected { status, .. }) if status == 401 || status == 403 => {
                    debug!(status, "held session rejected, refreshing");
                    match self.do_refresh().await {
                        Ok(session) => Ok(Some(session)),
                        Err(ProviderError::Rejected { .. } | ProviderError::NoSession) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    fn refresh_session(&self) -> BoxFuture<'_, Result<Session, ProviderError>> {
        self.do_refresh().boxed()
    }

    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Session, ProviderError>> {
        async move {
            let session =
                self.token("password", json!({ "email": email, "password": password })).await?;
            self.signed_in(&session, AuthChange::SignedIn);
            Ok(session)
        }
        .boxed()
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<SignUpOutcome, ProviderError>> {
        async move {
            let resp = self
                .request(reqwest::Method::POST, "/auth/v1/signup")
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await
                .map_err(network)?;
            let body: serde_json::Value = decode(check(resp).await?).await?;
            if body.get("access_token").is_some() {
                let token: TokenResponse = serde_json::from_value(body)
                    .map_err(|e| ProviderError::Protocol(e.to_string()))?;
                let session = token.into_session(self.clock.now_ms());
                self.signed_in(&session, AuthChange::SignedIn);
                return Ok(SignUpOutcome::SignedIn(session));
            }
            let user: User =
                serde_json::from_value(body).map_err(|e| ProviderError::Protocol(e.to_string()))?;
            info!(user_id = %user.id, "sign-up awaiting e-mail confirmation");
            Ok(SignUpOutcome::ConfirmationRequired(user))
        }
        .boxed()
    }

    fn sign_in_with_oauth<'a>(
        &'a self,
        request: &'a OAuthRequest,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        async move {
            let verifier = pkce::generate_code_verifier();
            let challenge = pkce::compute_code_challenge(&verifier);
            self.inner.lock().verifier = Some(verifier);
            let redirect = request.redirect_url.as_deref().or(self.config.redirect_url.as_deref());
            Ok(pkce::build_authorize_url(
                &self.config.base_url,
                &request.provider,
                redirect,
                &challenge,
                &request.params,
            ))
        }
        .boxed()
    }

    fn complete_oauth<'a>(
        &'a self,
        callback_url: &'a str,
    ) -> BoxFuture<'a, Result<AuthCallback, ProviderError>> {
        async move {
            let params = callback_params(callback_url);
            if let Some(error) = params.get("error_description").or(params.get("error")) {
                return Err(ProviderError::Rejected { status: 400, message: error.clone() });
            }
            let recovery = params.get("type").is_some_and(|t| t == "recovery");

            let session = if let Some(access_token) = params.get("access_token") {
                self.implicit_session(&params, access_token).await?
            } else if let Some(code) = params.get("code") {
                let verifier = self.inner.lock().verifier.take().ok_or_else(|| {
                    ProviderError::Protocol("no OAuth sign-in in progress".to_owned())
                })?;
                self.token("pkce", json!({ "auth_code": code, "code_verifier": verifier })).await?
            } else {
                return Err(ProviderError::Protocol(
                    "callback carries neither a code nor an access token".to_owned(),
                ));
            };

            let change = if recovery { AuthChange::PasswordRecovery } else { AuthChange::SignedIn };
            self.signed_in(&session, change);
            Ok(AuthCallback { session, recovery })
        }
        .boxed()
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), ProviderError>> {
        async move {
            let held = {
                let mut inner = self.inner.lock();
                inner.generation += 1;
                inner.verifier = None;
                inner.vault.take()
            };
            self.emit(AuthChange::SignedOut, None);
            let Some(held) = held else {
                return Ok(());
            };
            let resp = self
                .request(reqwest::Method::POST, "/auth/v1/logout")
                .bearer_auth(&held.access_token)
                .send()
                .await
                .map_err(network)?;
            check(resp).await?;
            Ok(())
        }
        .boxed()
    }

    fn reset_password_for_email<'a>(
        &'a self,
        email: &'a str,
        redirect_to: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        async move {
            let mut req = self
                .request(reqwest::Method::POST, "/auth/v1/recover")
                .json(&json!({ "email": email }));
            if let Some(redirect) = redirect_to.or(self.config.redirect_url.as_deref()) {
                req = req.query(&[("redirect_to", redirect)]);
            }
            check(req.send().await.map_err(network)?).await?;
            Ok(())
        }
        .boxed()
    }

    fn update_password<'a>(
        &'a self,
        session: &'a Session,
        password: &'a str,
    ) -> BoxFuture<'a, Result<User, ProviderError>> {
        async move {
            let resp = self
                .request(reqwest::Method::PUT, "/auth/v1/user")
                .bearer_auth(&session.access_token)
                .json(&json!({ "password": password }))
                .send()
                .await
                .map_err(network)?;
            let user: User = decode(check(resp).await?).await?;
            let updated = Session { user: user.clone(), ..session.clone() };
            self.store_if_current(self.generation(), &updated);
            self.emit(AuthChange::UserUpdated, Some(updated));
            Ok(user)
        }
        .boxed()
    }

    fn fetch_profile<'a>(
        &'a self,
        user_id: &'a str,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<Option<Profile>, ProviderError>> {
        async move {
            let path = format!("/rest/v1/{}", self.config.profile_table);
            let id_filter = format!("eq.{user_id}");
            let resp = self
                .request(reqwest::Method::GET, &path)
                .bearer_auth(access_token)
                .query(&[("id", id_filter.as_str()), ("select", "*")])
                .send()
                .await
                .map_err(network)?;
            let rows: Vec<Profile> = decode(check(resp).await?).await?;
            Ok(rows.into_iter().next())
        }
        .boxed()
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

fn network(e: reqwest::Error) -> ProviderError {
    ProviderError::Network(e.to_string())
}

/// Map a non-success response to a [`ProviderError`].
///
/// Server errors and rate limiting are transient; other statuses are the
/// service refusing the request.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or(text);
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(ProviderError::Network(format!("{status}: {message}")))
    } else {
        Err(ProviderError::Rejected { status: status.as_u16(), message })
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, ProviderError> {
    resp.json().await.map_err(|e| ProviderError::Protocol(e.to_string()))
}

#[cfg(test)]
#[path = "hosted_tests.rs"]
mod tests;
