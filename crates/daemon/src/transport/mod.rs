// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the session daemon.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all daemon routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Session
        .route("/api/v1/auth/state", get(http::auth_state))
        .route("/api/v1/auth/sign-in", post(http::sign_in))
        .route("/api/v1/auth/sign-up", post(http::sign_up))
        .route("/api/v1/auth/sign-out", post(http::sign_out))
        .route("/api/v1/auth/refresh", post(http::refresh))
        .route("/api/v1/auth/reset-password", post(http::reset_password))
        .route("/api/v1/auth/update-password", post(http::update_password))
        .route("/api/v1/auth/activity", post(http::activity))
        .route("/api/v1/auth/oauth", post(http::oauth))
        .route("/api/v1/auth/oauth/callback", post(http::oauth_callback))
        .route("/api/v1/lifecycle", post(http::lifecycle))
        // State stream
        .route("/ws/auth", get(ws::ws_auth))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
