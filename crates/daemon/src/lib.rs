// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! promptdock-authd: local session daemon for the promptdock overlay.
//!
//! Owns the session lifecycle manager and exposes it to the desktop shell
//! over a localhost HTTP + WebSocket API.

pub mod config;
pub mod error;
pub mod state;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use promptdock_auth::provider::hosted::HostedProvider;
use promptdock_auth::session::persist::FileStorage;
use promptdock_auth::session::Collaborators;
use promptdock_auth::SystemClock;

use crate::config::Config;
use crate::state::AppState;
use crate::transport::build_router;

/// Install the global tracing subscriber from `--log-level`/`--log-format`.
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the daemon until `shutdown` is cancelled.
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)?;

    let clock = Arc::new(SystemClock);
    let provider = Arc::new(HostedProvider::new(config.hosted(), clock.clone())?);
    let collaborators = Collaborators {
        provider,
        storage: Arc::new(FileStorage::in_dir(&state_dir)),
        clock,
    };
    let (auth, coordinator) = promptdock_auth::spawn(collaborators, config.lifecycle());

    let state = Arc::new(AppState::new(auth, config.auth_token.clone(), shutdown.clone()));
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %listener.local_addr()?,
        state_dir = %state_dir.display(),
        auth = config.auth_token.is_some(),
        "promptdock-authd listening"
    );
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    // The router held the last handle; the coordinator exits once it is gone.
    coordinator.await?;
    info!("promptdock-authd stopped");
    Ok(())
}
