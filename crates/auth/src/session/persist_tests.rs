// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::provider::User;
use crate::session::{AuthState, SessionSlot, SessionStatus};
use crate::test_support::session;

fn active_state() -> AuthState {
    let mut state = AuthState::initial(1_000);
    state.status = SessionStatus::Active;
    state.session = Some(SessionSlot::Live(session("u1", "secret-access", 90_000)));
    state.user = Some(User { id: "u1".to_owned(), email: Some("u1@example.com".to_owned()) });
    state
}

#[test]
fn snapshot_serializes_camel_case_without_tokens() -> anyhow::Result<()> {
    let snapshot = PersistedAuthSnapshot::from_state(&active_state());
    let json = serde_json::to_string(&snapshot)?;

    assert!(json.contains("\"isAuthenticated\":true"), "{json}");
    assert!(json.contains("\"userId\":\"u1\""), "{json}");
    assert!(json.contains("\"userEmail\":\"u1@example.com\""), "{json}");
    assert!(json.contains("\"lastActivity\":1000"), "{json}");
    assert!(json.contains("\"sessionExpiresAt\":90000"), "{json}");
    assert!(!json.contains("secret-access"), "snapshot leaked a token: {json}");
    assert!(!json.contains("refresh"), "snapshot leaked a token: {json}");
    Ok(())
}

#[test]
fn signed_out_snapshot_restores_nothing() -> anyhow::Result<()> {
    let snapshot = PersistedAuthSnapshot::from_state(&AuthState::initial(5));
    assert!(!snapshot.is_authenticated);
    assert_eq!(snapshot.restore(), None);
    Ok(())
}

#[test]
fn restore_builds_tokenless_slot() -> anyhow::Result<()> {
    let snapshot = PersistedAuthSnapshot::from_state(&active_state());
    let (slot, user) = snapshot.restore().ok_or_else(|| anyhow::anyhow!("expected restore"))?;

    assert_eq!(slot, SessionSlot::Restored { user_id: "u1".to_owned(), expires_at_ms: 90_000 });
    assert!(slot.live().is_none());
    assert_eq!(user.email.as_deref(), Some("u1@example.com"));
    Ok(())
}

#[test]
fn authenticated_snapshot_without_user_id_restores_nothing() -> anyhow::Result<()> {
    let snapshot = PersistedAuthSnapshot { is_authenticated: true, ..Default::default() };
    assert_eq!(snapshot.restore(), None);
    Ok(())
}

#[test]
fn file_storage_roundtrip_and_clear() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = FileStorage::in_dir(&dir.path().join("nested"));

    assert_eq!(storage.load()?, None);

    let snapshot = PersistedAuthSnapshot::from_state(&active_state());
    storage.save(&snapshot)?;
    assert_eq!(storage.load()?, Some(snapshot));
    assert!(storage.path().ends_with(SNAPSHOT_FILE));

    storage.clear()?;
    assert_eq!(storage.load()?, None);
    // Clearing twice is fine.
    storage.clear()?;
    Ok(())
}

#[test]
fn save_leaves_no_temp_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = FileStorage::in_dir(dir.path());
    for at in 0..5 {
        let snapshot = PersistedAuthSnapshot { last_activity: at, ..Default::default() };
        storage.save(&snapshot)?;
    }

    let names: Vec<String> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![SNAPSHOT_FILE.to_owned()]);
    Ok(())
}

#[test]
fn corrupt_snapshot_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = FileStorage::in_dir(dir.path());
    std::fs::write(storage.path(), "{not json")?;
    assert!(storage.load().is_err());
    Ok(())
}

#[test]
fn missing_fields_default() -> anyhow::Result<()> {
    let snapshot: PersistedAuthSnapshot = serde_json::from_str(r#"{"isAuthenticated":false}"#)?;
    assert_eq!(snapshot, PersistedAuthSnapshot::default());
    Ok(())
}
