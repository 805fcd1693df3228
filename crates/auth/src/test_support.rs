// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted identity provider, in-memory
//! snapshot storage and a clock that follows tokio's paused time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::clock::{duration_ms, Clock};
use crate::provider::{
    AuthCallback, AuthChange, IdentityProvider, OAuthRequest, Profile, ProviderError,
    ProviderEvent, Session, SignUpOutcome, User,
};
use crate::session::persist::{PersistedAuthSnapshot, SnapshotStorage};
use crate::session::Collaborators;

/// Build a session for `user_id` with the given access token and expiry.
pub fn session(user_id: &str, access_token: &str, expires_at_ms: u64) -> Session {
    Session {
        access_token: access_token.to_owned(),
        refresh_token: Some(format!("{access_token}-refresh")),
        expires_at_ms,
        user: User { id: user_id.to_owned(), email: Some(format!("{user_id}@example.com")) },
    }
}

/// Build a profile row for `user_id`.
pub fn profile(user_id: &str, is_admin: bool) -> Profile {
    Profile {
        id: user_id.to_owned(),
        display_name: Some(user_id.to_owned()),
        can_add_snippets: is_admin,
        is_admin,
    }
}

/// Provider operation, for call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    GetSession,
    Refresh,
    SignIn,
    SignUp,
    OAuth,
    CompleteOAuth,
    SignOut,
    ResetPassword,
    UpdatePassword,
    FetchProfile,
}

#[derive(Default)]
struct Script {
    session: Option<Session>,
    get_session_error: Option<ProviderError>,
    get_session_delay: Duration,
    refreshes: VecDeque<Result<Session, ProviderError>>,
    refresh_delay: Duration,
    sign_in: Option<Result<Session, ProviderError>>,
    confirm_sign_up: bool,
    profiles: HashMap<String, Profile>,
    profile_delay: Duration,
    /// Bumped by sign-out; a refresh that started earlier is discarded.
    generation: u64,
}

/// Scripted [`IdentityProvider`].
///
/// `get_session` returns the held session. `refresh_session` pops scripted
/// results and fails with [`ProviderError::NoSession`] once they run out. All
/// delays use tokio time, so they cooperate with paused-clock tests.
///
/// Events follow the hosted adapter: sign-in style calls announce the new
/// session, a successful refresh announces `TokenRefreshed`, a rejected
/// refresh drops the held session and announces `SignedOut`.
pub struct FakeProvider {
    script: Mutex<Script>,
    calls: Mutex<HashMap<Call, usize>>,
    events: broadcast::Sender<ProviderEvent>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self { script: Mutex::new(Script::default()), calls: Mutex::new(HashMap::new()), events }
    }

    /// Provider already holding `session`.
    pub fn with_session(session: Session) -> Self {
        let provider = Self::new();
        provider.set_session(Some(session));
        provider
    }

    pub fn set_session(&self, session: Option<Session>) {
        self.script.lock().session = session;
    }

    pub fn set_get_session_error(&self, error: Option<ProviderError>) {
        self.script.lock().get_session_error = error;
    }

    pub fn set_get_session_delay(&self, delay: Duration) {
        self.script.lock().get_session_delay = delay;
    }

    pub fn push_refresh(&self, result: Result<Session, ProviderError>) {
        self.script.lock().refreshes.push_back(result);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.script.lock().refresh_delay = delay;
    }

    pub fn set_sign_in(&self, result: Result<Session, ProviderError>) {
        self.script.lock().sign_in = Some(result);
    }

    /// Make sign-up return [`SignUpOutcome::ConfirmationRequired`].
    pub fn require_confirmation(&self) {
        self.script.lock().confirm_sign_up = true;
    }

    pub fn set_profile(&self, profile: Profile) {
        self.script.lock().profiles.insert(profile.id.clone(), profile);
    }

    pub fn set_profile_delay(&self, delay: Duration) {
        self.script.lock().profile_delay = delay;
    }

    /// Broadcast an auth-state change to subscribers.
    pub fn emit(&self, change: AuthChange, session: Option<Session>) {
        let _ = self.events.send(ProviderEvent::new(change, session));
    }

    pub fn calls(&self, call: Call) -> usize {
        self.calls.lock().get(&call).copied().unwrap_or(0)
    }

    fn record(&self, call: Call) {
        *self.calls.lock().entry(call).or_insert(0) += 1;
    }

    /// Hold `session` and announce it.
    fn establish(&self, session: &Session, change: AuthChange) {
        self.script.lock().session = Some(session.clone());
        self.emit(change, Some(session.clone()));
    }

    fn sign_in_result(&self) -> Result<Session, ProviderError> {
        self.script.lock().sign_in.clone().unwrap_or_else(|| {
            Err(ProviderError::Rejected { status: 400, message: "invalid login credentials".to_owned() })
        })
    }
}

impl IdentityProvider for FakeProvider {
    fn get_session(&self) -> BoxFuture<'_, Result<Option<Session>, ProviderError>> {
        async move {
            self.record(Call::GetSession);
            let delay = self.script.lock().get_session_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let script = self.script.lock();
            match script.get_session_error {
                Some(ref e) => Err(e.clone()),
                None => Ok(script.session.clone()),
            }
        }
        .boxed()
    }

    fn refresh_session(&self) -> BoxFuture<'_, Result<Session, ProviderError>> {
        async move {
            self.record(Call::Refresh);
            let (delay, generation) = {
                let script = self.script.lock();
                (script.refresh_delay, script.generation)
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let (result, change) = {
                let mut script = self.script.lock();
                let result = script.refreshes.pop_front().unwrap_or(Err(ProviderError::NoSession));
                let change = match result {
                    _ if script.generation != generation => return Err(ProviderError::NoSession),
                    Ok(ref session) => {
                        script.session = Some(session.clone());
                        Some(AuthChange::TokenRefreshed)
                    }
                    Err(ProviderError::Rejected { .. }) if script.session.take().is_some() => {
                        Some(AuthChange::SignedOut)
                    }
                    Err(_) => None,
                };
                (result, change)
            };
            if let Some(change) = change {
                self.emit(change, result.as_ref().ok().cloned());
            }
            result
        }
        .boxed()
    }

    fn sign_in_with_password<'a>(
        &'a self,
        _email: &'a str,
        _password: &'a str,
    ) -> BoxFuture<'a, Result<Session, ProviderError>> {
        async move {
            self.record(Call::SignIn);
            let result = self.sign_in_result();
            if let Ok(ref session) = result {
                self.establish(session, AuthChange::SignedIn);
            }
            result
        }
        .boxed()
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        _password: &'a str,
    ) -> BoxFuture<'a, Result<SignUpOutcome, ProviderError>> {
        async move {
            self.record(Call::SignUp);
            if self.script.lock().confirm_sign_up {
                let user = User { id: "pending".to_owned(), email: Some(email.to_owned()) };
                return Ok(SignUpOutcome::ConfirmationRequired(user));
            }
            let session = self.sign_in_result()?;
            self.establish(&session, AuthChange::SignedIn);
            Ok(SignUpOutcome::SignedIn(session))
        }
        .boxed()
    }

    fn sign_in_with_oauth<'a>(
        &'a self,
        request: &'a OAuthRequest,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        async move {
            self.record(Call::OAuth);
            Ok(format!("https://auth.example.com/authorize?provider={}", request.provider))
        }
        .boxed()
    }

    fn complete_oauth<'a>(
        &'a self,
        callback_url: &'a str,
    ) -> BoxFuture<'a, Result<AuthCallback, ProviderError>> {
        async move {
            self.record(Call::CompleteOAuth);
            let session = self.sign_in_result()?;
            let recovery = callback_url.contains("type=recovery");
            let change = if recovery { AuthChange::PasswordRecovery } else { AuthChange::SignedIn };
            self.establish(&session, change);
            Ok(AuthCallback { session, recovery })
        }
        .boxed()
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), ProviderError>> {
        async move {
            self.record(Call::SignOut);
            {
                let mut script = self.script.lock();
                script.session = None;
                script.generation += 1;
            }
            self.emit(AuthChange::SignedOut, None);
            Ok(())
        }
        .boxed()
    }

    fn reset_password_for_email<'a>(
        &'a self,
        _email: &'a str,
        _redirect_to: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        async move {
            self.record(Call::ResetPassword);
            Ok(())
        }
        .boxed()
    }

    fn update_password<'a>(
        &'a self,
        session: &'a Session,
        _password: &'a str,
    ) -> BoxFuture<'a, Result<User, ProviderError>> {
        async move {
            self.record(Call::UpdatePassword);
            self.emit(AuthChange::UserUpdated, Some(session.clone()));
            Ok(session.user.clone())
        }
        .boxed()
    }

    fn fetch_profile<'a>(
        &'a self,
        user_id: &'a str,
        _access_token: &'a str,
    ) -> BoxFuture<'a, Result<Option<Profile>, ProviderError>> {
        async move {
            self.record(Call::FetchProfile);
            let delay = self.script.lock().profile_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(self.script.lock().profiles.get(user_id).cloned())
        }
        .boxed()
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

/// In-memory [`SnapshotStorage`] with a failure switch.
#[derive(Default)]
pub struct MemoryStorage {
    snapshot: Mutex<Option<PersistedAuthSnapshot>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn with_snapshot(snapshot: PersistedAuthSnapshot) -> Self {
        let storage = Self::default();
        *storage.snapshot.lock() = Some(snapshot);
        storage
    }

    pub fn snapshot(&self) -> Option<PersistedAuthSnapshot> {
        self.snapshot.lock().clone()
    }

    /// Make every save fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl SnapshotStorage for MemoryStorage {
    fn load(&self) -> anyhow::Result<Option<PersistedAuthSnapshot>> {
        Ok(self.snapshot.lock().clone())
    }

    fn save(&self, snapshot: &PersistedAuthSnapshot) -> anyhow::Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            anyhow::bail!("storage unavailable");
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        *self.snapshot.lock() = None;
        Ok(())
    }
}

/// Wall clock pinned to `base_ms` at creation and advanced by tokio time.
///
/// Under `start_paused` tests, `tokio::time::advance` moves both timers and
/// this clock together.
pub struct PausedClock {
    base_ms: u64,
    start: tokio::time::Instant,
}

impl PausedClock {
    pub fn new(base_ms: u64) -> Self {
        Self { base_ms, start: tokio::time::Instant::now() }
    }
}

impl Clock for PausedClock {
    fn now_ms(&self) -> u64 {
        self.base_ms.saturating_add(duration_ms(self.start.elapsed()))
    }
}

/// Fixed wall-clock start for paused-time tests.
pub const T0_MS: u64 = 1_700_000_000_000;

/// Collaborators wired to the given fakes and a [`PausedClock`] at [`T0_MS`].
pub fn collaborators(provider: &Arc<FakeProvider>, storage: &Arc<MemoryStorage>) -> Collaborators {
    Collaborators {
        provider: Arc::clone(provider) as Arc<dyn IdentityProvider>,
        storage: Arc::clone(storage) as Arc<dyn SnapshotStorage>,
        clock: Arc::new(PausedClock::new(T0_MS)),
    }
}

/// Snapshot of a signed-in user, as a previous process would have left it.
pub fn signed_in_snapshot(user_id: &str, expires_at_ms: u64) -> PersistedAuthSnapshot {
    PersistedAuthSnapshot {
        is_authenticated: true,
        user_id: Some(user_id.to_owned()),
        user_email: Some(format!("{user_id}@example.com")),
        last_activity: T0_MS - 60_000,
        session_expires_at: Some(expires_at_ms),
    }
}
