// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle management for the promptdock overlay.
//!
//! The [`session`] module owns the authentication state machine: the store,
//! the refresh scheduler, the recovery coordinator and the bootstrap
//! sequence. The [`provider`] module is the seam to the hosted identity
//! service.

pub mod clock;
pub mod provider;
pub mod session;
pub mod test_support;

pub use clock::{Clock, SystemClock};
pub use provider::{
    AuthCallback, AuthChange, IdentityProvider, OAuthRequest, Profile, ProviderError,
    ProviderEvent, Session, SignUpOutcome, User,
};
pub use session::handle::{AuthError, AuthHandle};
pub use session::{spawn, AuthState, LifecycleConfig, LifecycleSignal, SessionSlot, SessionStatus};
