// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recovery coordinator: the single writer to the session store.
//!
//! One task owns the store, the scheduler and the refresh flight. UI
//! commands, provider events, timer ticks and the results of spawned provider
//! calls all arrive over channels and are handled one at a time, so there is
//! no shared mutable state. Every provider call runs in its own task and
//! reports back with the epoch it started in; sign-out and sign-in bump the
//! epoch, which makes late results inert.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{duration_ms, Clock};
use crate::provider::{AuthChange, IdentityProvider, Profile, ProviderError, ProviderEvent, Session, User};
use crate::session::bootstrap::{self, ValidationOutcome};
use crate::session::handle::AuthHandle;
use crate::session::machine::{self, Action, Event, Transition, Validation};
use crate::session::persist::PersistedAuthSnapshot;
use crate::session::refresh::{Join, RefreshError, RefreshFlight, RefreshResult};
use crate::session::scheduler::{RefreshScheduler, Tick, TimerKind};
use crate::session::store::{SessionStore, StatePatch};
use crate::session::{AuthState, Collaborators, LifecycleConfig, LifecycleSignal, SessionSlot, SessionStatus};

/// Message shown when the user must sign in again.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session expired, please sign in again.";

/// Message shown when bootstrap could not reach the provider.
pub const PROVIDER_UNREACHABLE_MESSAGE: &str =
    "Could not reach the sign-in service. Check your connection and retry.";

/// A pre-expiry tick this soon after a successful refresh is skipped; a
/// provider issuing sessions shorter than the refresh margin would otherwise
/// be refreshed in a tight loop.
const MIN_TIMER_REFRESH_SPACING: Duration = Duration::from_secs(30);

/// Request from an [`AuthHandle`].
pub(crate) enum Command {
    Authenticated { session: Session, change: AuthChange, reply: oneshot::Sender<()> },
    UserUpdated { user: User, reply: oneshot::Sender<()> },
    SignOut { reply: oneshot::Sender<()> },
    Refresh { reply: oneshot::Sender<RefreshResult> },
    Lifecycle(LifecycleSignal),
    TouchActivity { reply: oneshot::Sender<()> },
}

/// Result of a provider call spawned by the coordinator.
pub(crate) enum TaskResult {
    Validated { epoch: u64, outcome: ValidationOutcome },
    Refreshed { epoch: u64, result: Result<Session, ProviderError> },
    Fallback { epoch: u64, result: Result<Option<Session>, ProviderError> },
    Profile { epoch: u64, user_id: String, result: Result<Option<Profile>, ProviderError> },
}

/// Data an [`Event`] carries for the actions that need it.
#[derive(Default)]
struct Payload {
    session: Option<Session>,
    user: Option<User>,
    waiter: Option<oneshot::Sender<RefreshResult>>,
}

impl Payload {
    fn session(session: Session) -> Self {
        Self { session: Some(session), ..Self::default() }
    }

    fn user(user: User) -> Self {
        Self { user: Some(user), ..Self::default() }
    }

    fn waiter(waiter: oneshot::Sender<RefreshResult>) -> Self {
        Self { waiter: Some(waiter), ..Self::default() }
    }
}

/// Spawn the coordinator task and return the UI-facing handle.
///
/// Bootstrap runs once, as the first thing the task does. The task exits when
/// every handle has been dropped.
pub fn spawn(collaborators: Collaborators, config: LifecycleConfig) -> (AuthHandle, JoinHandle<()>) {
    let (coordinator, handle) = Coordinator::new(collaborators, config);
    let task = tokio::spawn(coordinator.run());
    (handle, task)
}

pub struct Coordinator {
    store: SessionStore,
    scheduler: RefreshScheduler,
    flight: RefreshFlight,
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    /// Bumped whenever in-flight work must be discarded.
    epoch: u64,
    /// Set just before a user-requested sign-out reaches the provider.
    logout_intended: bool,
    online: bool,
    /// A refresh was skipped (offline) and should run at the next chance.
    refresh_due: bool,
    restored: Option<(SessionSlot, User)>,
    last_refresh_ms: Option<u64>,
    validating: bool,
    validation_waiters: Vec<oneshot::Sender<RefreshResult>>,
    commands: mpsc::Receiver<Command>,
    results_tx: mpsc::UnboundedSender<TaskResult>,
    results_rx: mpsc::UnboundedReceiver<TaskResult>,
    ticks: mpsc::UnboundedReceiver<Tick>,
    events: Option<broadcast::Receiver<ProviderEvent>>,
}

impl Coordinator {
    pub fn new(collaborators: Collaborators, config: LifecycleConfig) -> (Self, AuthHandle) {
        let Collaborators { provider, storage, clock } = collaborators;
        let (command_tx, commands) = mpsc::channel(64);
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let store = SessionStore::new(storage, AuthState::initial(clock.now_ms()));
        let scheduler = RefreshScheduler::new(&config, Arc::clone(&clock), tick_tx);
        let handle =
            AuthHandle::new(command_tx, store.subscribe(), Arc::clone(&provider), Arc::clone(&clock));
        // Subscribe before bootstrap so no provider event can slip past.
        let events = Some(provider.subscribe());

        let coordinator = Self {
            store,
            scheduler,
            flight: RefreshFlight::default(),
            provider,
            clock,
            config,
            epoch: 0,
            logout_intended: false,
            online: true,
            refresh_due: false,
            restored: None,
            last_refresh_ms: None,
            validating: false,
            validation_waiters: Vec::new(),
            commands,
            results_tx,
            results_rx,
            ticks,
            events,
        };
        (coordinator, handle)
    }

    /// Bootstrap, then process messages until every handle is dropped.
    pub async fn run(mut self) {
        self.begin_bootstrap();
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(result) = self.results_rx.recv() => self.on_result(result),
                Some(tick) = self.ticks.recv() => self.on_tick(tick),
                event = next_event(&mut self.events) => self.on_event_recv(event),
            }
        }
        self.scheduler.stop();
        debug!("session coordinator stopped");
    }

    pub fn state(&self) -> AuthState {
        self.store.get()
    }

    /// Rehydrate from the persisted snapshot and start validation.
    pub(crate) fn begin_bootstrap(&mut self) {
        let snapshot = self.store.load_snapshot();
        self.restored = snapshot.as_ref().and_then(PersistedAuthSnapshot::restore);
        let restored = self.restored.is_some();
        info!(restored, "bootstrapping session");
        self.dispatch(Event::BootstrapStarted { restored }, Payload::default());
        if let Some(at) = snapshot.as_ref().map(|s| s.last_activity).filter(|at| *at > 0) {
            if let Err(e) = self.store.set(StatePatch::new().last_activity(at)) {
                warn!(err = %e, "failed to restore last activity");
            }
        }
    }

    // -- Inputs ---------------------------------------------------------------

    pub(crate) fn on_command(&mut self, command: Command) {
        match command {
            Command::Authenticated { session, change, reply } => {
                if self.holds(&session) {
                    debug!(?change, "session already applied from provider event");
                    let _ = reply.send(());
                    return;
                }
                info!(user_id = %session.user.id, ?change, "session established");
                let event = match change {
                    AuthChange::PasswordRecovery => Event::PasswordRecovery,
                    _ => Event::SignedIn,
                };
                self.dispatch(event, Payload::session(session));
                let _ = reply.send(());
            }
            Command::UserUpdated { user, reply } => {
                self.dispatch(Event::UserUpdated, Payload::user(user));
                let _ = reply.send(());
            }
            Command::SignOut { reply } => {
                info!("signing out");
                self.dispatch(Event::SignOutRequested, Payload::default());
                let _ = reply.send(());
            }
            Command::Refresh { reply } => {
                self.dispatch(Event::RefreshRequested { manual: true }, Payload::waiter(reply));
            }
            Command::Lifecycle(signal) => self.on_lifecycle(signal),
            Command::TouchActivity { reply } => {
                let patch = StatePatch::new().last_activity(self.clock.now_ms());
                if let Err(e) = self.store.set(patch) {
                    warn!(err = %e, "failed to record activity");
                }
                let _ = reply.send(());
            }
        }
    }

    pub(crate) fn on_provider_event(&mut self, event: ProviderEvent) {
        let ProviderEvent { change, session } = event;
        if change == AuthChange::SignedOut {
            let intentional = self.logout_intended;
            if intentional {
                info!("provider confirmed sign-out");
            } else {
                warn!("provider reported sign-out without a user request, keeping session");
            }
            self.dispatch(Event::ProviderSignedOut { intentional }, Payload::default());
            return;
        }

        let Some(session) = session else {
            debug!(?change, "ignoring provider event without a session");
            return;
        };
        if self.logout_intended && change != AuthChange::SignedIn {
            debug!(?change, "ignoring provider event after sign-out");
            return;
        }
        if change != AuthChange::UserUpdated && self.holds(&session) {
            debug!(?change, "provider event carries the session already held");
            return;
        }
        let (event, payload) = match change {
            AuthChange::SignedIn => (Event::SignedIn, Payload::session(session)),
            AuthChange::TokenRefreshed => {
                self.last_refresh_ms = Some(self.clock.now_ms());
                (Event::TokenRefreshed, Payload::session(session))
            }
            AuthChange::PasswordRecovery => (Event::PasswordRecovery, Payload::session(session)),
            AuthChange::UserUpdated => (Event::UserUpdated, Payload::user(session.user)),
            AuthChange::SignedOut => return,
        };
        self.dispatch(event, payload);
    }

    pub(crate) fn on_lifecycle(&mut self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Online => {
                if self.online {
                    return;
                }
                self.online = true;
                let due = self.refresh_due
                    || self.store.get().session_expires_at_ms().is_some_and(|at| self.scheduler.is_due(at));
                info!(due, "device back online");
                self.dispatch(Event::Online { due }, Payload::default());
            }
            LifecycleSignal::Offline => {
                if self.online {
                    info!("device offline");
                }
                self.online = false;
                self.dispatch(Event::Offline, Payload::default());
            }
            LifecycleSignal::Visible => {
                debug!("window visible");
                self.dispatch(Event::Visible { online: self.online }, Payload::default());
            }
            LifecycleSignal::Hidden => debug!("window hidden"),
        }
    }

    pub(crate) fn on_tick(&mut self, tick: Tick) {
        if !self.scheduler.is_current(&tick) {
            debug!(?tick, "dropping tick from replaced timer");
            return;
        }
        if tick.kind == TimerKind::PreExpiry && self.refreshed_recently() {
            debug!("skipping pre-expiry tick, session was just refreshed");
            return;
        }
        debug!(kind = ?tick.kind, online = self.online, "refresh timer fired");
        self.dispatch(Event::TimerFired { online: self.online }, Payload::default());
    }

    pub(crate) fn on_result(&mut self, result: TaskResult) {
        match result {
            TaskResult::Refreshed { epoch, result } => {
                if self.is_stale(epoch) {
                    debug!("discarding refresh result from a superseded session");
                    return;
                }
                match result {
                    Ok(session) => self.finish_refresh(Ok(session)),
                    Err(e) => {
                        warn!(err = %e, "session refresh failed");
                        if self.flight.enter_fallback() {
                            debug!("asking provider for its current session");
                            self.spawn_fallback();
                            return;
                        }
                        self.finish_refresh(Err(e));
                    }
                }
            }
            TaskResult::Fallback { epoch, result } => {
                if self.is_stale(epoch) {
                    debug!("discarding recovery result from a superseded session");
                    return;
                }
                match result {
                    Ok(Some(session)) if !self.holds(&session) => self.finish_refresh(Ok(session)),
                    Ok(_) => {
                        warn!("recovery found no newer session, keeping the current one");
                        self.finish_refresh(Err(ProviderError::NoSession));
                    }
                    Err(e) => {
                        warn!(err = %e, "recovery fallback failed");
                        self.finish_refresh(Err(e));
                    }
                }
            }
            TaskResult::Validated { epoch, outcome } => {
                if self.is_stale(epoch) {
                    debug!("discarding validation result from a superseded session");
                    return;
                }
                self.validating = false;
                self.on_validated(outcome);
            }
            TaskResult::Profile { epoch, user_id, result } => {
                if self.is_stale(epoch) {
                    return;
                }
                let state = self.store.get();
                if state.user.as_ref().map(|u| u.id.as_str()) != Some(user_id.as_str()) {
                    debug!(user_id = %user_id, "discarding profile for a different user");
                    return;
                }
                match result {
                    Ok(profile) => {
                        debug!(user_id = %user_id, found = profile.is_some(), "profile loaded");
                        if let Err(e) = self.store.set(StatePatch::new().profile(profile)) {
                            warn!(err = %e, "failed to store profile");
                        }
                    }
                    Err(e) => warn!(user_id = %user_id, err = %e, "profile fetch failed"),
                }
            }
        }
    }

    fn on_event_recv(&mut self, event: Result<ProviderEvent, broadcast::error::RecvError>) {
        match event {
            Ok(event) => self.on_provider_event(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "provider events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("provider event stream closed");
                self.events = None;
            }
        }
    }

    fn on_validated(&mut self, outcome: ValidationOutcome) {
        let (validation, payload, reply) = match outcome {
            ValidationOutcome::Live(session) => {
                if let Some((ref slot, _)) = self.restored {
                    if slot.user_id() != session.user_id() {
                        warn!(
                            restored = %slot.user_id(),
                            live = %session.user_id(),
                            "live session belongs to a different user than the snapshot"
                        );
                    }
                }
                (Validation::Live, Payload::session(session), Ok(()))
            }
            ValidationOutcome::Denied => {
                if self.store.get().live_session().is_some() {
                    debug!("validation verdict superseded by a live session");
                    self.answer_validation(Ok(()));
                    return;
                }
                let had_snapshot = self.restored.is_some();
                info!(had_snapshot, "no valid session at bootstrap");
                (Validation::Denied { had_snapshot }, Payload::default(), Err(RefreshError::NotAuthenticated))
            }
            ValidationOutcome::Unreachable(reason) => {
                if self.store.get().live_session().is_some() {
                    debug!("validation verdict superseded by a live session");
                    self.answer_validation(Ok(()));
                    return;
                }
                warn!(reason = %reason, "identity provider unreachable during bootstrap");
                (
                    Validation::Unreachable,
                    Payload::default(),
                    Err(RefreshError::Provider(ProviderError::Network(reason))),
                )
            }
        };
        self.dispatch(Event::Validated(validation), payload);
        self.answer_validation(reply);
    }

    // -- Transition execution -------------------------------------------------

    /// Feed one event to the state machine and execute the resulting actions.
    ///
    /// The store update happens first as one atomic patch; scheduler and task
    /// actions follow in the same step with no await in between, so a timer
    /// never outlives the session it was armed for.
    fn dispatch(&mut self, event: Event, mut payload: Payload) {
        let current = self.store.status();
        let Transition { next, actions } = machine::transition(current, event);
        if next != current {
            info!(from = %current, to = %next, ?event, "session status changed");
        }

        let mut patch = StatePatch::new().status(next);
        let mut clear = false;
        let mut message = None;
        for action in &actions {
            match action {
                Action::RestoreSnapshot => {
                    if let Some((ref slot, ref user)) = self.restored {
                        patch = patch.session(Some(slot.clone())).user(Some(user.clone()));
                    }
                }
                Action::ApplySession => {
                    if let Some(ref session) = payload.session {
                        patch = self.session_patch(patch, session);
                    }
                }
                Action::UpdateUser => {
                    if let Some(user) = payload.user.take() {
                        patch = patch.user(Some(user)).password_recovery(false);
                    }
                }
                Action::ClearSession => clear = true,
                Action::MarkPasswordRecovery => patch = patch.password_recovery(true),
                Action::SurfaceExpired => message = Some(SESSION_EXPIRED_MESSAGE.to_owned()),
                Action::SurfaceUnreachable => message = Some(PROVIDER_UNREACHABLE_MESSAGE.to_owned()),
                _ => {}
            }
        }

        if clear {
            self.store.clear(next, message);
        } else {
            if message.is_some() {
                patch = patch.error(message);
            }
            if let Err(e) = self.store.set(patch) {
                warn!(err = %e, ?event, "rejected session update");
                if let Some(waiter) = payload.waiter.take() {
                    let _ = waiter.send(Err(RefreshError::NotReady));
                }
                return;
            }
        }

        for action in actions {
            match action {
                Action::StartValidation => self.start_validation(payload.waiter.take()),
                Action::ArmScheduler => {
                    if let Some(expires_at) = self.store.get().live_session().map(|s| s.expires_at_ms) {
                        self.scheduler.schedule(expires_at);
                    }
                }
                Action::StopScheduler => self.scheduler.stop(),
                Action::FetchProfile => self.spawn_profile_fetch(),
                Action::Supersede => self.supersede(),
                Action::SetLogoutFlag => self.logout_intended = true,
                Action::ClearLogoutFlag => self.logout_intended = false,
                Action::StartRefresh => self.start_refresh(false, payload.waiter.take()),
                Action::StartRecovery => self.start_refresh(true, payload.waiter.take()),
                Action::MarkRefreshDue => {
                    debug!("refresh deferred until the device is online");
                    self.refresh_due = true;
                }
                Action::RejectRefresh => {
                    if let Some(waiter) = payload.waiter.take() {
                        let err = if current == SessionStatus::Initializing {
                            RefreshError::NotReady
                        } else {
                            RefreshError::NotAuthenticated
                        };
                        let _ = waiter.send(Err(err));
                    }
                }
                Action::ProviderSignOut => self.spawn_provider_sign_out(),
                Action::RestoreSnapshot
                | Action::ApplySession
                | Action::UpdateUser
                | Action::ClearSession
                | Action::MarkPasswordRecovery
                | Action::SurfaceExpired
                | Action::SurfaceUnreachable => {}
            }
        }
    }

    fn session_patch(&self, patch: StatePatch, session: &Session) -> StatePatch {
        let same_user =
            self.store.get().user.as_ref().is_some_and(|u| u.id == session.user.id);
        let patch = patch
            .session(Some(SessionSlot::Live(session.clone())))
            .user(Some(session.user.clone()))
            .error(None);
        if same_user {
            patch
        } else {
            patch.profile(None).password_recovery(false)
        }
    }

    fn supersede(&mut self) {
        self.epoch += 1;
        self.refresh_due = false;
        self.validating = false;
        self.flight.abandon();
        self.answer_validation(Err(RefreshError::Cancelled));
    }

    fn answer_validation(&mut self, result: RefreshResult) {
        for waiter in self.validation_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn is_stale(&self, epoch: u64) -> bool {
        epoch != self.epoch || self.logout_intended
    }

    /// True if `session` is the one already in the store.
    fn holds(&self, session: &Session) -> bool {
        self.store.get().live_session().is_some_and(|s| s.access_token == session.access_token)
    }

    fn refreshed_recently(&self) -> bool {
        let spacing = duration_ms(MIN_TIMER_REFRESH_SPACING);
        self.last_refresh_ms.is_some_and(|at| self.clock.now_ms().saturating_sub(at) < spacing)
    }

    fn finish_refresh(&mut self, result: Result<Session, ProviderError>) {
        match result {
            Ok(session) => {
                self.last_refresh_ms = Some(self.clock.now_ms());
                info!(user_id = %session.user.id, expires_at_ms = session.expires_at_ms, "session refreshed");
                if self.holds(&session) {
                    self.dispatch(Event::RefreshConfirmed, Payload::default());
                } else {
                    self.dispatch(Event::RefreshSucceeded, Payload::session(session));
                }
                self.flight.finish(Ok(()));
            }
            Err(e) => {
                self.dispatch(Event::RefreshFailed, Payload::default());
                self.flight.finish(Err(RefreshError::Provider(e)));
            }
        }
    }

    // -- Spawned provider calls -----------------------------------------------

    fn start_refresh(&mut self, recover: bool, waiter: Option<oneshot::Sender<RefreshResult>>) {
        self.refresh_due = false;
        if self.validating {
            // Validation may be running its own refresh; share its verdict.
            debug!(recover, "joined bootstrap validation");
            self.validation_waiters.extend(waiter);
            return;
        }
        match self.flight.join(self.epoch, recover, waiter) {
            Join::Joined => debug!(recover, "joined in-flight refresh"),
            Join::Started => {
                debug!(recover, "starting refresh");
                let provider = Arc::clone(&self.provider);
                let tx = self.results_tx.clone();
                let epoch = self.epoch;
                tokio::spawn(async move {
                    let result = provider.refresh_session().await;
                    let _ = tx.send(TaskResult::Refreshed { epoch, result });
                });
            }
        }
    }

    fn spawn_fallback(&self) {
        let provider = Arc::clone(&self.provider);
        let tx = self.results_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = provider.get_session().await;
            let _ = tx.send(TaskResult::Fallback { epoch, result });
        });
    }

    fn start_validation(&mut self, waiter: Option<oneshot::Sender<RefreshResult>>) {
        self.validation_waiters.extend(waiter);
        if self.validating {
            return;
        }
        self.validating = true;
        let provider = Arc::clone(&self.provider);
        let tx = self.results_tx.clone();
        let epoch = self.epoch;
        let timeout = self.config.bootstrap_timeout;
        tokio::spawn(async move {
            let outcome = bootstrap::validate(provider.as_ref(), timeout).await;
            let _ = tx.send(TaskResult::Validated { epoch, outcome });
        });
    }

    fn spawn_profile_fetch(&self) {
        let Some(session) = self.store.get().live_session().cloned() else {
            return;
        };
        let provider = Arc::clone(&self.provider);
        let tx = self.results_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let user_id = session.user.id.clone();
            let result = provider.fetch_profile(&user_id, &session.access_token).await;
            let _ = tx.send(TaskResult::Profile { epoch, user_id, result });
        });
    }

    /// Remote sign-out is best effort; local state is already cleared.
    fn spawn_provider_sign_out(&self) {
        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            if let Err(e) = provider.sign_out().await {
                warn!(err = %e, "provider sign-out failed, local sign-out stands");
            }
        });
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ProviderEvent>>,
) -> Result<ProviderEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
