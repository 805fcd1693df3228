// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cold-start validation.
//!
//! The coordinator restores the snapshot synchronously and then runs
//! [`validate`] in the background. Validation asks the provider for its
//! session, falls back to a refresh, and gives up after the bootstrap timeout.

use std::time::Duration;

use tracing::debug;

use crate::provider::{IdentityProvider, Session};

/// Verdict of one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The provider holds a live session, directly or after a refresh.
    Live(Session),
    /// The provider answered: nobody is signed in.
    Denied,
    /// No definitive answer: timeout or network failure.
    Unreachable(String),
}

/// Validate the provider session, bounded by `timeout`.
pub async fn validate(provider: &dyn IdentityProvider, timeout: Duration) -> ValidationOutcome {
    match tokio::time::timeout(timeout, validate_once(provider)).await {
        Ok(outcome) => outcome,
        Err(_) => ValidationOutcome::Unreachable(format!(
            "no answer within {}ms",
            timeout.as_millis()
        )),
    }
}

async fn validate_once(provider: &dyn IdentityProvider) -> ValidationOutcome {
    match provider.get_session().await {
        Ok(Some(session)) => return ValidationOutcome::Live(session),
        Ok(None) => debug!("provider has no session, trying refresh"),
        Err(e) if e.is_transient() => return ValidationOutcome::Unreachable(e.to_string()),
        Err(e) => debug!(err = %e, "provider rejected its session, trying refresh"),
    }
    match provider.refresh_session().await {
        Ok(session) => ValidationOutcome::Live(session),
        Err(e) if e.is_transient() => ValidationOutcome::Unreachable(e.to_string()),
        Err(e) => {
            debug!(err = %e, "refresh refused");
            ValidationOutcome::Denied
        }
    }
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
