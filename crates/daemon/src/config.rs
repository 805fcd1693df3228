// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use promptdock_auth::provider::hosted::{HostedConfig, DEFAULT_PROFILE_TABLE};
use promptdock_auth::LifecycleConfig;

/// Directory name used under the platform state directories.
const APP_DIR: &str = "promptdock";

/// Local session daemon for the promptdock overlay.
#[derive(Debug, Clone, Parser)]
#[command(name = "promptdock-authd", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "PROMPTDOCK_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "PROMPTDOCK_PORT", default_value_t = 7450)]
    pub port: u16,

    /// Bearer token the desktop shell must present. If unset, auth is disabled.
    #[arg(long, env = "PROMPTDOCK_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Base URL of the hosted auth/database service.
    #[arg(long, env = "PROMPTDOCK_BACKEND_URL")]
    pub backend_url: String,

    /// Public anonymous API key of the hosted service.
    #[arg(long, env = "PROMPTDOCK_ANON_KEY")]
    pub anon_key: String,

    /// Table holding user profiles.
    #[arg(long, env = "PROMPTDOCK_PROFILE_TABLE", default_value = DEFAULT_PROFILE_TABLE)]
    pub profile_table: String,

    /// Default redirect target for OAuth and password-recovery links.
    #[arg(long, env = "PROMPTDOCK_REDIRECT_URL")]
    pub redirect_url: Option<String>,

    /// Directory for the auth snapshot and provider vault.
    #[arg(long, env = "PROMPTDOCK_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Refresh this many seconds before the session expires.
    #[arg(long, env = "PROMPTDOCK_REFRESH_MARGIN_SECS", default_value_t = 600)]
    pub refresh_margin_secs: u64,

    /// Keep-alive refresh interval in seconds.
    #[arg(long, env = "PROMPTDOCK_KEEP_ALIVE_SECS", default_value_t = 900)]
    pub keep_alive_secs: u64,

    /// Bootstrap validation timeout in milliseconds.
    #[arg(long, env = "PROMPTDOCK_BOOTSTRAP_TIMEOUT_MS", default_value_t = 10_000)]
    pub bootstrap_timeout_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "PROMPTDOCK_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PROMPTDOCK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.backend_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("--backend-url must be an http(s) URL, got {url:?}");
        }
        if self.anon_key.trim().is_empty() {
            anyhow::bail!("--anon-key must not be empty");
        }
        if self.profile_table.is_empty()
            || !self.profile_table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!("invalid profile table name: {:?}", self.profile_table);
        }
        if self.refresh_margin_secs == 0 || self.keep_alive_secs == 0 {
            anyhow::bail!("refresh margin and keep-alive interval must be positive");
        }
        if self.bootstrap_timeout_ms == 0 {
            anyhow::bail!("--bootstrap-timeout-ms must be positive");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
        if self.auth_token.as_deref().is_some_and(str::is_empty) {
            anyhow::bail!("--auth-token must not be empty when set");
        }
        Ok(())
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            refresh_margin: self.refresh_margin(),
            keep_alive: self.keep_alive(),
            bootstrap_timeout: self.bootstrap_timeout(),
        }
    }

    /// Resolved state directory (see [`resolve_state_dir`]).
    pub fn state_dir(&self) -> PathBuf {
        resolve_state_dir(
            self.state_dir.as_deref(),
            std::env::var_os("XDG_STATE_HOME").map(PathBuf::from).as_deref(),
            std::env::var_os("HOME").map(PathBuf::from).as_deref(),
        )
    }

    pub fn hosted(&self) -> HostedConfig {
        let mut hosted = HostedConfig::new(self.backend_url.trim(), self.anon_key.trim());
        hosted.profile_table = self.profile_table.clone();
        hosted.redirect_url = self.redirect_url.clone();
        hosted.state_dir = Some(self.state_dir());
        hosted
    }
}

/// Pick the state directory: explicit flag, then `$XDG_STATE_HOME/promptdock`,
/// then `$HOME/.local/state/promptdock`, then `.promptdock`.
pub fn resolve_state_dir(explicit: Option<&Path>, xdg: Option<&Path>, home: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_owned();
    }
    if let Some(xdg) = xdg.filter(|p| p.is_absolute()) {
        return xdg.join(APP_DIR);
    }
    if let Some(home) = home.filter(|p| !p.as_os_str().is_empty()) {
        return home.join(".local").join("state").join(APP_DIR);
    }
    PathBuf::from(format!(".{APP_DIR}"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
