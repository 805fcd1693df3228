// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable storage for the persisted auth snapshot.
//!
//! The snapshot is a deliberately small, token-free projection of the session
//! state. It exists so that a restarted process can unblock the UI before the
//! identity provider has answered.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::provider::User;
use crate::session::{AuthState, SessionSlot};

/// File name of the snapshot inside the state directory.
pub const SNAPSHOT_FILE: &str = "auth-snapshot.json";

/// Non-sensitive projection of the session state written on every change.
///
/// Never carries tokens, the profile, or permission flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAuthSnapshot {
    pub is_authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// Epoch millis of the last user activity.
    #[serde(default)]
    pub last_activity: u64,
    /// Epoch millis at which the session expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_expires_at: Option<u64>,
}

impl PersistedAuthSnapshot {
    pub fn from_state(state: &AuthState) -> Self {
        Self {
            is_authenticated: state.is_authenticated(),
            user_id: state.user.as_ref().map(|u| u.id.clone()),
            user_email: state.user.as_ref().and_then(|u| u.email.clone()),
            last_activity: state.last_activity_ms,
            session_expires_at: state.session.as_ref().map(SessionSlot::expires_at_ms),
        }
    }

    /// Tokenless session slot and user for the optimistic unblock, if the
    /// snapshot says a user was signed in.
    pub fn restore(&self) -> Option<(SessionSlot, User)> {
        if !self.is_authenticated {
            return None;
        }
        let user_id = self.user_id.clone()?;
        let slot = SessionSlot::Restored {
            user_id: user_id.clone(),
            expires_at_ms: self.session_expires_at.unwrap_or(0),
        };
        Some((slot, User { id: user_id, email: self.user_email.clone() }))
    }
}

/// Durable key-value slot holding the snapshot.
pub trait SnapshotStorage: Send + Sync + 'static {
    fn load(&self) -> anyhow::Result<Option<PersistedAuthSnapshot>>;
    fn save(&self, snapshot: &PersistedAuthSnapshot) -> anyhow::Result<()>;
    /// Delete the snapshot. Deleting a missing snapshot is not an error.
    fn clear(&self) -> anyhow::Result<()>;
}

/// Snapshot stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at `<dir>/auth-snapshot.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SNAPSHOT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStorage for FileStorage {
    fn load(&self) -> anyhow::Result<Option<PersistedAuthSnapshot>> {
        load_json(&self.path)
    }

    fn save(&self, snapshot: &PersistedAuthSnapshot) -> anyhow::Result<()> {
        save_json(&self.path, snapshot)
    }

    fn clear(&self) -> anyhow::Result<()> {
        remove_file(&self.path)
    }
}

/// Read a JSON file, treating a missing file as `None`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Write a JSON file atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) so concurrent saves never
/// interleave bytes in a shared `.tmp` file.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Remove a file, treating a missing file as success.
pub fn remove_file(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
