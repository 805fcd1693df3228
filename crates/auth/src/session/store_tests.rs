// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::test_support::{profile, session, MemoryStorage};

fn store() -> (SessionStore, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::default());
    let store = SessionStore::new(Arc::clone(&storage) as _, AuthState::initial(0));
    (store, storage)
}

fn sign_in_patch() -> StatePatch {
    let s = session("u1", "a1", 60_000);
    StatePatch::new()
        .status(SessionStatus::Active)
        .user(Some(s.user.clone()))
        .session(Some(SessionSlot::Live(s)))
}

#[test]
fn set_merges_and_persists() -> anyhow::Result<()> {
    let (store, storage) = store();
    store.set(sign_in_patch())?;

    let state = store.get();
    assert_eq!(state.status, SessionStatus::Active);
    assert!(state.is_authenticated());

    let snapshot = storage.snapshot().ok_or_else(|| anyhow::anyhow!("no snapshot"))?;
    assert!(snapshot.is_authenticated);
    assert_eq!(snapshot.user_id.as_deref(), Some("u1"));
    assert_eq!(snapshot.session_expires_at, Some(60_000));
    Ok(())
}

#[test]
fn active_without_session_is_rejected_whole() -> anyhow::Result<()> {
    let (store, storage) = store();
    let patch = StatePatch::new().status(SessionStatus::Active).error(Some("x".to_owned()));

    assert_eq!(store.set(patch), Err(StoreError::MissingSession(SessionStatus::Active)));
    assert_eq!(store.get(), AuthState::initial(0));
    assert_eq!(storage.writes(), 0);
    Ok(())
}

#[test]
fn expired_with_session_is_rejected() -> anyhow::Result<()> {
    let (store, _storage) = store();
    store.set(sign_in_patch())?;

    let result = store.set(StatePatch::new().status(SessionStatus::Expired));
    assert_eq!(result, Err(StoreError::UnexpectedSession(SessionStatus::Expired)));
    assert_eq!(store.status(), SessionStatus::Active);
    Ok(())
}

#[test]
fn partial_patch_leaves_other_fields() -> anyhow::Result<()> {
    let (store, _storage) = store();
    store.set(sign_in_patch())?;
    store.set(StatePatch::new().profile(Some(profile("u1", true))))?;
    store.set(StatePatch::new().last_activity(42))?;

    let state = store.get();
    assert_eq!(state.status, SessionStatus::Active);
    assert_eq!(state.profile.map(|p| p.is_admin), Some(true));
    assert_eq!(state.last_activity_ms, 42);
    Ok(())
}

#[test]
fn clear_drops_identity_and_deletes_snapshot() -> anyhow::Result<()> {
    let (store, storage) = store();
    store.set(sign_in_patch().last_activity(7))?;
    store.set(StatePatch::new().profile(Some(profile("u1", false))))?;

    store.clear(SessionStatus::Expired, Some("bye".to_owned()));

    let state = store.get();
    assert_eq!(state.status, SessionStatus::Expired);
    assert!(state.session.is_none() && state.user.is_none() && state.profile.is_none());
    assert_eq!(state.error.as_deref(), Some("bye"));
    assert_eq!(state.last_activity_ms, 7);
    assert!(storage.snapshot().is_none());
    Ok(())
}

#[test]
fn persistence_failure_does_not_block_state() -> anyhow::Result<()> {
    let (store, storage) = store();
    storage.set_failing(true);

    store.set(sign_in_patch())?;
    assert_eq!(store.status(), SessionStatus::Active);
    assert!(storage.snapshot().is_none());
    Ok(())
}

#[tokio::test]
async fn subscribers_see_changes() -> anyhow::Result<()> {
    let (store, _storage) = store();
    let mut rx = store.subscribe();

    store.set(sign_in_patch())?;
    rx.changed().await?;
    assert_eq!(rx.borrow_and_update().status, SessionStatus::Active);
    Ok(())
}

#[test]
fn unreadable_snapshot_loads_as_none() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = crate::session::persist::FileStorage::in_dir(dir.path());
    std::fs::write(file.path(), "garbage")?;
    let store = SessionStore::new(Arc::new(file), AuthState::initial(0));

    assert!(store.load_snapshot().is_none());
    Ok(())
}
