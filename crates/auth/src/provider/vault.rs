// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider-side credential vault.
//!
//! Unlike the auth snapshot, the vault holds the full session including the
//! refresh token. Only the provider adapter reads or writes it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::provider::Session;
use crate::session::persist::{load_json, remove_file, save_json};

/// File name of the vault inside the state directory.
pub const VAULT_FILE: &str = "provider-session.json";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct VaultFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session: Option<Session>,
}

/// In-memory session with optional file backing.
#[derive(Debug, Default)]
pub struct Vault {
    path: Option<PathBuf>,
    session: Option<Session>,
}

impl Vault {
    /// Memory-only vault.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Open a file-backed vault, loading any stored session.
    ///
    /// An unreadable vault is logged and treated as empty: the user signs in
    /// again rather than the process failing to start.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let session = match load_json::<VaultFile>(&path) {
            Ok(file) => file.and_then(|f| f.session),
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "ignoring unreadable provider vault");
                None
            }
        };
        Self { path: Some(path), session }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::open(dir.join(VAULT_FILE))
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn store(&mut self, session: Session) {
        self.session = Some(session);
        self.flush();
    }

    pub fn take(&mut self) -> Option<Session> {
        let session = self.session.take();
        if let Some(ref path) = self.path {
            if let Err(e) = remove_file(path) {
                tracing::warn!(path = %path.display(), err = %e, "failed to remove provider vault");
            }
        }
        session
    }

    fn flush(&self) {
        let Some(ref path) = self.path else {
            return;
        };
        let file = VaultFile { session: self.session.clone() };
        if let Err(e) = save_json(path, &file) {
            tracing::warn!(path = %path.display(), err = %e, "failed to write provider vault");
        }
    }
}
