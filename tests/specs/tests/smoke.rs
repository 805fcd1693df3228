// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `promptdock-authd` binary
//! against a fake hosted auth service.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use promptdock_specs::{DaemonProcess, FakeBackend, PASSWORD};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn sign_in(daemon: &DaemonProcess) -> anyhow::Result<reqwest::Response> {
    Ok(daemon
        .client()?
        .post(format!("{}/api/v1/auth/sign-in", daemon.base_url()))
        .json(&json!({ "email": "u1@example.com", "password": PASSWORD }))
        .send()
        .await?)
}

#[tokio::test]
async fn fresh_install_settles_signed_out() -> anyhow::Result<()> {
    let backend = FakeBackend::start().await?;
    let dir = tempfile::tempdir()?;
    let daemon = DaemonProcess::start(backend.url(), dir.path())?;
    daemon.wait_healthy(TIMEOUT).await?;

    let state = daemon.wait_status("expired", TIMEOUT).await?;
    assert_eq!(state["user"], Value::Null);
    assert_eq!(state["session_valid"], false);

    let health: Value =
        reqwest::get(format!("{}/api/v1/health", daemon.base_url())).await?.json().await?;
    assert_eq!(health["status"], "running");
    Ok(())
}

#[tokio::test]
async fn sign_in_survives_restart() -> anyhow::Result<()> {
    let backend = FakeBackend::start().await?;
    let dir = tempfile::tempdir()?;

    {
        let daemon = DaemonProcess::start(backend.url(), dir.path())?;
        daemon.wait_healthy(TIMEOUT).await?;
        daemon.wait_status("expired", TIMEOUT).await?;

        let resp = sign_in(&daemon).await?;
        assert!(resp.status().is_success(), "sign-in failed: {}", resp.status());
        let state: Value = resp.json().await?;
        assert_eq!(state["status"], "active");

        let state = daemon.wait_status("active", TIMEOUT).await?;
        assert_eq!(state["user"]["id"], "u1");
    }

    let snapshot = std::fs::read_to_string(dir.path().join("auth-snapshot.json"))?;
    assert!(!snapshot.contains("access-"), "snapshot leaked a token: {snapshot}");
    let snapshot: Value = serde_json::from_str(&snapshot)?;
    assert_eq!(snapshot["isAuthenticated"], true);
    assert_eq!(snapshot["userId"], "u1");

    let daemon = DaemonProcess::start(backend.url(), dir.path())?;
    daemon.wait_healthy(TIMEOUT).await?;
    let state = daemon.wait_status("active", TIMEOUT).await?;
    assert_eq!(state["user"]["id"], "u1");
    Ok(())
}

#[tokio::test]
async fn wrong_password_stays_signed_out() -> anyhow::Result<()> {
    let backend = FakeBackend::start().await?;
    let dir = tempfile::tempdir()?;
    let daemon = DaemonProcess::start(backend.url(), dir.path())?;
    daemon.wait_healthy(TIMEOUT).await?;
    daemon.wait_status("expired", TIMEOUT).await?;

    let resp = daemon
        .client()?
        .post(format!("{}/api/v1/auth/sign-in", daemon.base_url()))
        .json(&json!({ "email": "u1@example.com", "password": "wrong" }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 502);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["code"], "PROVIDER_ERROR");
    Ok(())
}

#[tokio::test]
async fn manual_refresh_and_sign_out() -> anyhow::Result<()> {
    let backend = FakeBackend::start().await?;
    let dir = tempfile::tempdir()?;
    let daemon = DaemonProcess::start(backend.url(), dir.path())?;
    daemon.wait_healthy(TIMEOUT).await?;
    daemon.wait_status("expired", TIMEOUT).await?;
    sign_in(&daemon).await?;

    let client = daemon.client()?;
    let resp = client.post(format!("{}/api/v1/auth/refresh", daemon.base_url())).send().await?;
    assert!(resp.status().is_success(), "refresh failed: {}", resp.status());
    assert_eq!(backend.refreshes(), 1);

    let resp = client.post(format!("{}/api/v1/auth/sign-out", daemon.base_url())).send().await?;
    let state: Value = resp.json().await?;
    assert_eq!(state["status"], "expired");
    assert!(!dir.path().join("provider-session.json").exists());
    Ok(())
}

#[tokio::test]
async fn api_token_guards_routes_and_ws() -> anyhow::Result<()> {
    let backend = FakeBackend::start().await?;
    let dir = tempfile::tempdir()?;
    let daemon = DaemonProcess::build(backend.url(), dir.path()).auth_token("spec-token").spawn()?;
    daemon.wait_healthy(TIMEOUT).await?;

    let resp = reqwest::get(format!("{}/api/v1/auth/state", daemon.base_url())).await?;
    assert_eq!(resp.status().as_u16(), 401);

    let (mut ws, _) = tokio_tungstenite::connect_async(daemon.ws_url()).await?;
    daemon.wait_status("expired", TIMEOUT).await?;
    sign_in(&daemon).await?;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = tokio::time::timeout(remaining, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("websocket closed"))??;
        let Message::Text(text) = msg else {
            continue;
        };
        let state: Value = serde_json::from_str(&text)?;
        if state["status"] == "active" {
            assert_eq!(state["user"]["id"], "u1");
            break;
        }
    }
    Ok(())
}
