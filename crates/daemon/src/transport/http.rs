// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the session daemon.
//!
//! Each handler is a thin adapter over [`promptdock_auth::AuthHandle`];
//! mutating routes answer with the resulting [`AuthState`].

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use promptdock_auth::{AuthState, LifecycleSignal, OAuthRequest, SignUpOutcome};

use crate::error::ApiError;
use crate::state::AppState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub auth_status: String,
    pub uptime_secs: u64,
}

/// Current auth state plus the derived validity flag.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    #[serde(flatten)]
    pub state: AuthState,
    pub session_valid: bool,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignUpResponse {
    pub confirmation_required: bool,
    pub state: StateResponse,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    #[serde(default)]
    pub redirect_to: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SentResponse {
    pub sent: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivityResponse {
    pub last_activity_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    pub signal: LifecycleSignal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LifecycleResponse {
    pub accepted: bool,
}

fn state_response(s: &AppState) -> StateResponse {
    StateResponse { state: s.auth.state(), session_valid: s.auth.is_session_valid() }
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(())
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_owned(),
        auth_status: s.auth.status().to_string(),
        uptime_secs: s.started_at.elapsed().as_secs(),
    })
}

/// `GET /api/v1/auth/state`
pub async fn auth_state(State(s): State<Arc<AppState>>) -> Json<StateResponse> {
    Json(state_response(&s))
}

/// `POST /api/v1/auth/sign-in`
pub async fn sign_in(
    State(s): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    require("email", &req.email)?;
    require("password", &req.password)?;
    s.auth.sign_in(req.email.trim(), &req.password).await?;
    Ok(Json(state_response(&s)))
}

/// `POST /api/v1/auth/sign-up`
pub async fn sign_up(
    State(s): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<SignUpResponse>, ApiError> {
    require("email", &req.email)?;
    require("password", &req.password)?;
    let outcome = s.auth.sign_up(req.email.trim(), &req.password).await?;
    Ok(Json(SignUpResponse {
        confirmation_required: matches!(outcome, SignUpOutcome::ConfirmationRequired(_)),
        state: state_response(&s),
    }))
}

/// `POST /api/v1/auth/sign-out`
pub async fn sign_out(State(s): State<Arc<AppState>>) -> Result<Json<StateResponse>, ApiError> {
    s.auth.sign_out().await?;
    Ok(Json(state_response(&s)))
}

/// `POST /api/v1/auth/refresh`
pub async fn refresh(State(s): State<Arc<AppState>>) -> Result<Json<StateResponse>, ApiError> {
    s.auth.refresh_session().await?;
    Ok(Json(state_response(&s)))
}

/// `POST /api/v1/auth/reset-password`
pub async fn reset_password(
    State(s): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<SentResponse>, ApiError> {
    require("email", &req.email)?;
    s.auth.reset_password(req.email.trim(), req.redirect_to.as_deref()).await?;
    Ok(Json(SentResponse { sent: true }))
}

/// `POST /api/v1/auth/update-password`
pub async fn update_password(
    State(s): State<Arc<AppState>>,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    require("password", &req.password)?;
    s.auth.update_password(&req.password).await?;
    Ok(Json(state_response(&s)))
}

/// `POST /api/v1/auth/activity`
pub async fn activity(State(s): State<Arc<AppState>>) -> Result<Json<ActivityResponse>, ApiError> {
    s.auth.update_last_activity().await?;
    Ok(Json(ActivityResponse { last_activity_ms: s.auth.state().last_activity_ms }))
}

/// `POST /api/v1/auth/oauth`: URL for the shell to open in the browser.
pub async fn oauth(
    State(s): State<Arc<AppState>>,
    Json(req): Json<OAuthRequest>,
) -> Result<Json<OAuthResponse>, ApiError> {
    require("provider", &req.provider)?;
    let url = s.auth.sign_in_with_oauth(&req).await?;
    Ok(Json(OAuthResponse { url }))
}

/// `POST /api/v1/auth/oauth/callback`
pub async fn oauth_callback(
    State(s): State<Arc<AppState>>,
    Json(req): Json<OAuthCallbackRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    require("url", &req.url)?;
    s.auth.complete_oauth(&req.url).await?;
    Ok(Json(state_response(&s)))
}

/// `POST /api/v1/lifecycle`
pub async fn lifecycle(
    State(s): State<Arc<AppState>>,
    Json(req): Json<LifecycleRequest>,
) -> Result<Json<LifecycleResponse>, ApiError> {
    tracing::debug!(signal = ?req.signal, "lifecycle signal from shell");
    s.auth.lifecycle(req.signal).await?;
    Ok(Json(LifecycleResponse { accepted: true }))
}
