// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state machine.
//!
//! [`transition`] is a pure function from `(status, event)` to the next status
//! and the actions the coordinator must perform. It knows nothing about
//! networks, timers or storage, so every row of the table is unit-testable.

use crate::session::SessionStatus;

/// Verdict of the bootstrap validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// The provider holds (or could refresh into) a live session.
    Live,
    /// The provider answered that there is no session.
    Denied { had_snapshot: bool },
    /// The provider did not answer in time.
    Unreachable,
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    BootstrapStarted { restored: bool },
    Validated(Validation),
    SignedIn,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
    /// Provider announced the session ended. `intentional` is the value of the
    /// intentional-logout flag when the event arrived.
    ProviderSignedOut { intentional: bool },
    RefreshRequested { manual: bool },
    RefreshSucceeded,
    /// A refresh finished whose session is already in the store.
    RefreshConfirmed,
    RefreshFailed,
    /// The device came back online; `due` if a refresh is pending or the
    /// session is inside the refresh margin.
    Online { due: bool },
    Offline,
    Visible { online: bool },
    TimerFired { online: bool },
    SignOutRequested,
}

/// Side effect requested by a transition, executed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Put the snapshot-derived placeholder session in the store.
    RestoreSnapshot,
    StartValidation,
    /// Store the session carried by the event.
    ApplySession,
    UpdateUser,
    ArmScheduler,
    StopScheduler,
    FetchProfile,
    /// Invalidate every in-flight refresh, validation and profile fetch.
    Supersede,
    /// Drop session, user and profile and delete the snapshot.
    ClearSession,
    SetLogoutFlag,
    ClearLogoutFlag,
    /// Refresh through the single-flight guard.
    StartRefresh,
    /// Refresh, falling back to `getSession` if the refresh fails.
    StartRecovery,
    MarkRefreshDue,
    RejectRefresh,
    ProviderSignOut,
    MarkPasswordRecovery,
    SurfaceExpired,
    SurfaceUnreachable,
}

/// Outcome of feeding one event to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionStatus,
    pub actions: Vec<Action>,
}

fn to(next: SessionStatus, actions: &[Action]) -> Transition {
    Transition { next, actions: actions.to_vec() }
}

/// Compute the next status and actions for `event` in `current`.
pub fn transition(current: SessionStatus, event: Event) -> Transition {
    use Action::*;
    use SessionStatus::*;

    match (current, event) {
        // Bootstrap. A persisted snapshot unblocks the UI before any network call.
        (Initializing, Event::BootstrapStarted { restored: true }) => {
            to(Active, &[RestoreSnapshot, StartValidation])
        }
        (Initializing, Event::BootstrapStarted { restored: false }) => {
            to(Initializing, &[StartValidation])
        }
        (_, Event::BootstrapStarted { .. }) => to(current, &[]),

        // Validation verdicts are discarded once the user is signed out.
        (Expired, Event::Validated(_)) => to(Expired, &[]),
        (_, Event::Validated(Validation::Live)) => {
            to(Active, &[ApplySession, ArmScheduler, FetchProfile])
        }
        (_, Event::Validated(Validation::Denied { had_snapshot: true })) => {
            to(Expired, &[Supersede, StopScheduler, ClearSession, SurfaceExpired])
        }
        (_, Event::Validated(Validation::Denied { had_snapshot: false })) => {
            to(Expired, &[Supersede, StopScheduler, ClearSession])
        }
        (_, Event::Validated(Validation::Unreachable)) => to(Error, &[SurfaceUnreachable]),

        // Explicit sign-out is authoritative from any status.
        (_, Event::SignOutRequested) => {
            to(Expired, &[SetLogoutFlag, Supersede, StopScheduler, ClearSession, ProviderSignOut])
        }

        // Provider sign-out: only honoured when the user asked for it.
        (_, Event::ProviderSignedOut { intentional: true }) => {
            to(Expired, &[ClearLogoutFlag, Supersede, StopScheduler, ClearSession])
        }
        (Active | Refreshing, Event::ProviderSignedOut { intentional: false }) => {
            to(current, &[StartRecovery])
        }
        (_, Event::ProviderSignedOut { intentional: false }) => to(current, &[]),

        (_, Event::SignedIn) => {
            to(Active, &[Supersede, ClearLogoutFlag, ApplySession, ArmScheduler, FetchProfile])
        }
        (_, Event::PasswordRecovery) => to(
            Active,
            &[
                Supersede,
                ClearLogoutFlag,
                ApplySession,
                ArmScheduler,
                FetchProfile,
                MarkPasswordRecovery,
            ],
        ),

        (Active | Refreshing, Event::TokenRefreshed) => to(current, &[ApplySession, ArmScheduler]),
        (Error, Event::TokenRefreshed) => to(Active, &[ApplySession, ArmScheduler, FetchProfile]),
        (_, Event::TokenRefreshed) => to(current, &[]),

        (Active | Refreshing, Event::UserUpdated) => to(current, &[UpdateUser]),
        (_, Event::UserUpdated) => to(current, &[]),

        (Active, Event::RefreshRequested { manual: true }) => to(Refreshing, &[StartRefresh]),
        (Active | Refreshing, Event::RefreshRequested { .. }) => to(current, &[StartRefresh]),
        (Error, Event::RefreshRequested { manual: true }) => {
            to(Initializing, &[StartValidation])
        }
        (_, Event::RefreshRequested { .. }) => to(current, &[RejectRefresh]),

        // A failed refresh never downgrades the session.
        (Active | Refreshing, Event::RefreshSucceeded) => to(Active, &[ApplySession, ArmScheduler]),
        (Active | Refreshing, Event::RefreshConfirmed | Event::RefreshFailed) => to(Active, &[]),
        (_, Event::RefreshSucceeded | Event::RefreshConfirmed | Event::RefreshFailed) => {
            to(current, &[])
        }

        (Active, Event::Online { due: true }) => to(Active, &[StartRefresh]),
        (Active, Event::Visible { online: true }) => to(Active, &[StartRefresh]),
        (Active, Event::Visible { online: false }) => to(Active, &[MarkRefreshDue]),
        (Active, Event::TimerFired { online: true }) => to(Active, &[StartRefresh]),
        (Active, Event::TimerFired { online: false }) => to(Active, &[MarkRefreshDue]),
        (
            _,
            Event::Online { .. } | Event::Offline | Event::Visible { .. } | Event::TimerFired { .. },
        ) => to(current, &[]),
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
