// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `promptdock-authd` binary as a subprocess, pointed at an
//! in-process fake of the hosted auth service, and exercises it over HTTP
//! and WebSocket.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `promptdock-authd` binary.
pub fn daemon_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("promptdock-authd")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

// -- Fake hosted service ------------------------------------------------------

/// Password accepted by the fake service.
pub const PASSWORD: &str = "correct horse";

#[derive(Default)]
struct Backend {
    /// Live access tokens, by token, to user id.
    tokens: Mutex<HashMap<String, String>>,
    issued: AtomicUsize,
    refreshes: AtomicUsize,
}

impl Backend {
    fn issue(&self, user_id: &str) -> Value {
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        let access = format!("access-{n}");
        self.tokens.lock().insert(access.clone(), user_id.to_owned());
        json!({
            "access_token": access,
            "refresh_token": format!("refresh-{n}"),
            "expires_in": 3600,
            "user": { "id": user_id, "email": format!("{user_id}@example.com") }
        })
    }

    fn user_for(&self, headers: &HeaderMap) -> Option<String> {
        let token = headers.get("authorization")?.to_str().ok()?.strip_prefix("Bearer ")?;
        self.tokens.lock().get(token).cloned()
    }
}

async fn token(
    State(backend): State<Arc<Backend>>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    match query.get("grant_type").map(String::as_str) {
        Some("password") if body["password"] == PASSWORD => (StatusCode::OK, Json(backend.issue("u1"))),
        Some("refresh_token") if body["refresh_token"].as_str().is_some() => {
            backend.refreshes.fetch_add(1, Ordering::Relaxed);
            (StatusCode::OK, Json(backend.issue("u1")))
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" })),
        ),
    }
}

async fn user(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    match backend.user_for(&headers) {
        Some(id) => (StatusCode::OK, Json(json!({ "id": id, "email": format!("{id}@example.com") }))),
        None => (StatusCode::UNAUTHORIZED, Json(json!({ "msg": "invalid JWT" }))),
    }
}

async fn profiles(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    match backend.user_for(&headers) {
        Some(id) => (
            StatusCode::OK,
            Json(json!([{ "id": id, "display_name": "Una", "can_add_snippets": true, "is_admin": false }])),
        ),
        None => (StatusCode::UNAUTHORIZED, Json(json!({ "message": "permission denied" }))),
    }
}

async fn logout(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        backend.tokens.lock().remove(token);
    }
    StatusCode::NO_CONTENT
}

/// In-process stand-in for the hosted auth/database service.
pub struct FakeBackend {
    url: String,
    backend: Arc<Backend>,
}

impl FakeBackend {
    pub async fn start() -> anyhow::Result<Self> {
        let backend = Arc::new(Backend::default());
        let app = Router::new()
            .route("/auth/v1/token", post(token))
            .route("/auth/v1/user", get(user))
            .route("/auth/v1/logout", post(logout))
            .route("/rest/v1/profiles", get(profiles))
            .with_state(Arc::clone(&backend));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { url, backend })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn refreshes(&self) -> usize {
        self.backend.refreshes.load(Ordering::Relaxed)
    }
}

// -- Daemon process -----------------------------------------------------------

/// A running `promptdock-authd` process that is killed on drop.
pub struct DaemonProcess {
    child: Child,
    port: u16,
    auth_token: Option<String>,
}

/// Builder for a [`DaemonProcess`].
pub struct DaemonBuilder {
    backend_url: String,
    state_dir: PathBuf,
    auth_token: Option<String>,
}

impl DaemonBuilder {
    /// Require this bearer token (`--auth-token`).
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    pub fn spawn(self) -> anyhow::Result<DaemonProcess> {
        ensure_crypto();
        let binary = daemon_binary();
        anyhow::ensure!(binary.exists(), "daemon binary not found at {}", binary.display());

        let port = free_port()?;
        let mut args: Vec<String> = vec![
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
            "--backend-url".into(),
            self.backend_url,
            "--anon-key".into(),
            "spec-anon-key".into(),
            "--state-dir".into(),
            self.state_dir.to_string_lossy().into_owned(),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        if let Some(ref token) = self.auth_token {
            args.extend(["--auth-token".into(), token.clone()]);
        }

        let child = Command::new(&binary)
            .args(&args)
            .env_remove("PROMPTDOCK_AUTH_TOKEN")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(DaemonProcess { child, port, auth_token: self.auth_token })
    }
}

impl DaemonProcess {
    pub fn build(backend_url: &str, state_dir: &Path) -> DaemonBuilder {
        DaemonBuilder {
            backend_url: backend_url.to_owned(),
            state_dir: state_dir.to_owned(),
            auth_token: None,
        }
    }

    /// Spawn the daemon without API auth.
    pub fn start(backend_url: &str, state_dir: &Path) -> anyhow::Result<Self> {
        Self::build(backend_url, state_dir).spawn()
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_url(&self) -> String {
        match self.auth_token {
            Some(ref token) => format!("ws://127.0.0.1:{}/ws/auth?token={token}", self.port),
            None => format!("ws://127.0.0.1:{}/ws/auth", self.port),
        }
    }

    /// Client that sends the configured bearer token.
    pub fn client(&self) -> anyhow::Result<reqwest::Client> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(ref token) = self.auth_token {
            headers.insert(reqwest::header::AUTHORIZATION, format!("Bearer {token}").parse()?);
        }
        Ok(reqwest::Client::builder().default_headers(headers).build()?)
    }

    /// Poll health until responsive.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("daemon did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Poll `GET /api/v1/auth/state` until `status` matches.
    pub async fn wait_status(&self, status: &str, timeout: Duration) -> anyhow::Result<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = self.client()?;
        let url = format!("{}/api/v1/auth/state", self.base_url());
        loop {
            let state: Value = client.get(&url).send().await?.json().await?;
            if state["status"] == status {
                return Ok(state);
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("status never became {status}; last state: {state}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
