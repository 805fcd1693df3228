// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: store, refresh scheduler, recovery coordinator and
//! bootstrap sequence.
//!
//! ```text
//!  bootstrap ──► store ──► scheduler ──ticks──┐
//!                  ▲                          ▼
//!   provider events, UI commands ──► coordinator (single writer)
//! ```

pub mod bootstrap;
pub mod coordinator;
pub mod handle;
pub mod machine;
pub mod persist;
pub mod refresh;
pub mod scheduler;
pub mod store;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::clock::Clock;
use crate::provider::{IdentityProvider, Profile, Session, User};
use crate::session::persist::SnapshotStorage;

pub use coordinator::spawn;

/// Refresh this long before the session expires.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(10 * 60);

/// Backstop refresh interval, independent of the computed expiry.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15 * 60);

/// Upper bound on the cold-start validation round trip.
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing policy for the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub refresh_margin: Duration,
    pub keep_alive: Duration,
    pub bootstrap_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            keep_alive: DEFAULT_KEEP_ALIVE,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }
}

/// Everything the coordinator needs from the outside world.
pub struct Collaborators {
    pub provider: Arc<dyn IdentityProvider>,
    pub storage: Arc<dyn SnapshotStorage>,
    pub clock: Arc<dyn Clock>,
}

/// Authentication status driving all UI gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Bootstrap has not reached a verdict yet.
    Initializing,
    Active,
    /// A user-requested refresh is in flight.
    Refreshing,
    /// No usable session; the user must sign in.
    Expired,
    /// Bootstrap could not reach the provider; a retry is possible.
    Error,
}

impl SessionStatus {
    /// Statuses that must always be backed by a session slot.
    pub fn requires_session(self) -> bool {
        matches!(self, Self::Active | Self::Refreshing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Refreshing => "refreshing",
            Self::Expired => "expired",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSlot {
    /// Provider-issued session.
    Live(Session),
    /// Tokenless placeholder rebuilt from the persisted snapshot, held only
    /// until bootstrap validation answers.
    Restored { user_id: String, expires_at_ms: u64 },
}

impl SessionSlot {
    pub fn expires_at_ms(&self) -> u64 {
        match self {
            Self::Live(s) => s.expires_at_ms,
            Self::Restored { expires_at_ms, .. } => *expires_at_ms,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::Live(s) => s.user_id(),
            Self::Restored { user_id, .. } => user_id,
        }
    }

    pub fn live(&self) -> Option<&Session> {
        match self {
            Self::Live(s) => Some(s),
            Self::Restored { .. } => None,
        }
    }
}

/// Tokens never leave the process through serialization.
impl Serialize for SessionSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("SessionSlot", 3)?;
        s.serialize_field(
            "kind",
            match self {
                Self::Live(_) => "live",
                Self::Restored { .. } => "restored",
            },
        )?;
        s.serialize_field("user_id", self.user_id())?;
        s.serialize_field("expires_at_ms", &self.expires_at_ms())?;
        s.end()
    }
}

/// Reactive session state published to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthState {
    pub status: SessionStatus,
    pub session: Option<SessionSlot>,
    pub user: Option<User>,
    pub profile: Option<Profile>,
    /// User-facing message for the current status, if any.
    pub error: Option<String>,
    pub last_activity_ms: u64,
    /// Set when the session came from a password-recovery link.
    pub password_recovery: bool,
}

impl AuthState {
    pub fn initial(now_ms: u64) -> Self {
        Self {
            status: SessionStatus::Initializing,
            session: None,
            user: None,
            profile: None,
            error: None,
            last_activity_ms: now_ms,
            password_recovery: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some() && self.user.is_some()
    }

    pub fn live_session(&self) -> Option<&Session> {
        self.session.as_ref().and_then(SessionSlot::live)
    }

    pub fn session_expires_at_ms(&self) -> Option<u64> {
        self.session.as_ref().map(SessionSlot::expires_at_ms)
    }
}

/// Platform signal forwarded from the desktop shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSignal {
    Online,
    Offline,
    Visible,
    Hidden,
}

