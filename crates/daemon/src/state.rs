// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use promptdock_auth::AuthHandle;

/// Shared state passed to all handlers via the axum `State` extractor.
pub struct AppState {
    pub auth: AuthHandle,
    /// Bearer token required on every route except health. `None` disables auth.
    pub auth_token: Option<String>,
    pub started_at: Instant,
    /// Cancelled on shutdown; open WebSocket streams close with it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(auth: AuthHandle, auth_token: Option<String>, shutdown: CancellationToken) -> Self {
        Self { auth, auth_token, started_at: Instant::now(), shutdown }
    }
}
