// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight guard for provider refresh calls.
//!
//! Keep-alive ticks, pre-expiry ticks, visibility changes, online events and
//! manual retries can all ask for a refresh in the same instant. Only the
//! first one reaches the provider; later callers wait on the same flight.

use tokio::sync::oneshot;

use crate::provider::ProviderError;

/// Why a refresh request did not produce a new session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("session is still initializing")]
    NotReady,
    #[error("refresh abandoned: session was replaced or signed out")]
    Cancelled,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type RefreshResult = Result<(), RefreshError>;

/// Which provider call the current flight is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Refresh,
    /// The refresh failed during a recovery pass; asking `getSession`.
    Fallback,
}

/// Whether a caller started a new flight or joined the running one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    Started,
    Joined,
}

struct Flight {
    epoch: u64,
    stage: Stage,
    recover: bool,
    waiters: Vec<oneshot::Sender<RefreshResult>>,
}

/// At most one in-flight refresh, shared by every concurrent caller.
#[derive(Default)]
pub struct RefreshFlight {
    current: Option<Flight>,
}

impl RefreshFlight {
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn stage(&self) -> Option<Stage> {
        self.current.as_ref().map(|f| f.stage)
    }

    /// Join the running flight or start a new one.
    ///
    /// `recover` upgrades the flight to fall back to `getSession` if the
    /// refresh fails, even when it was started as a plain refresh.
    pub fn join(
        &mut self,
        epoch: u64,
        recover: bool,
        waiter: Option<oneshot::Sender<RefreshResult>>,
    ) -> Join {
        if let Some(ref mut flight) = self.current {
            flight.recover |= recover;
            flight.waiters.extend(waiter);
            return Join::Joined;
        }
        self.current =
            Some(Flight { epoch, stage: Stage::Refresh, recover, waiters: waiter.into_iter().collect() });
        Join::Started
    }

    /// True if the running flight belongs to `epoch`.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.current.as_ref().is_some_and(|f| f.epoch == epoch)
    }

    /// After a failed refresh: move to the fallback stage if this flight is a
    /// recovery pass. Returns whether the fallback should run.
    pub fn enter_fallback(&mut self) -> bool {
        match self.current {
            Some(ref mut flight) if flight.recover && flight.stage == Stage::Refresh => {
                flight.stage = Stage::Fallback;
                true
            }
            _ => false,
        }
    }

    /// Complete the flight and hand the result to every waiter.
    pub fn finish(&mut self, result: RefreshResult) {
        if let Some(flight) = self.current.take() {
            for waiter in flight.waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    /// Drop the flight; waiters see [`RefreshError::Cancelled`].
    pub fn abandon(&mut self) {
        self.finish(Err(RefreshError::Cancelled));
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
