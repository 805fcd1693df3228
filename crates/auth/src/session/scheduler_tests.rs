// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::*;
use crate::session::LifecycleConfig;
use crate::test_support::{PausedClock, T0_MS};

const MIN_MS: u64 = 60_000;

fn scheduler() -> (RefreshScheduler, mpsc::UnboundedReceiver<Tick>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let clock = Arc::new(PausedClock::new(T0_MS));
    (RefreshScheduler::new(&LifecycleConfig::default(), clock, tx), rx)
}

/// Paused time jumps straight to timer deadlines, up to millisecond rounding.
fn assert_elapsed(start: Instant, secs: u64) {
    let elapsed = start.elapsed();
    let expected = Duration::from_secs(secs);
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(10),
        "elapsed {elapsed:?}, expected {expected:?}"
    );
}

async fn next_tick(rx: &mut mpsc::UnboundedReceiver<Tick>) -> anyhow::Result<Tick> {
    rx.recv().await.ok_or_else(|| anyhow::anyhow!("tick channel closed"))
}

#[tokio::test(start_paused = true)]
async fn pre_expiry_fires_at_margin() -> anyhow::Result<()> {
    let (mut scheduler, mut rx) = scheduler();
    let start = Instant::now();
    scheduler.schedule(T0_MS + 20 * MIN_MS);

    let tick = next_tick(&mut rx).await?;
    assert_eq!(tick.kind, TimerKind::PreExpiry);
    assert_elapsed(start, 10 * 60);
    assert!(scheduler.is_current(&tick));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn inside_margin_fires_immediately() -> anyhow::Result<()> {
    let (mut scheduler, mut rx) = scheduler();
    scheduler.schedule(T0_MS + 5 * MIN_MS);

    let tick = rx.try_recv()?;
    assert_eq!(tick.kind, TimerKind::PreExpiry);
    assert!(scheduler.is_due(T0_MS + 5 * MIN_MS));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn past_expiry_has_zero_delay() -> anyhow::Result<()> {
    let (scheduler, _rx) = scheduler();
    assert_eq!(scheduler.refresh_delay(T0_MS - MIN_MS), Duration::ZERO);
    assert_eq!(scheduler.refresh_delay(T0_MS + 11 * MIN_MS), Duration::from_secs(60));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn keep_alive_repeats_independently_of_expiry() -> anyhow::Result<()> {
    let (mut scheduler, mut rx) = scheduler();
    let start = Instant::now();
    scheduler.schedule(T0_MS + 10 * 60 * MIN_MS);

    let first = next_tick(&mut rx).await?;
    assert_eq!(first.kind, TimerKind::KeepAlive);
    assert_elapsed(start, 15 * 60);

    let second = next_tick(&mut rx).await?;
    assert_eq!(second.kind, TimerKind::KeepAlive);
    assert_elapsed(start, 30 * 60);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reschedule_leaves_one_set_of_timers() -> anyhow::Result<()> {
    let (mut scheduler, mut rx) = scheduler();
    for minutes in [20, 30, 40] {
        scheduler.schedule(T0_MS + minutes * MIN_MS);
    }
    let generation = scheduler.generation();
    assert_eq!(scheduler.armed(), ArmedTimers { pre_expiry: true, keep_alive: true });

    // Only the last arming survives.
    let start = Instant::now();
    let tick = next_tick(&mut rx).await?;
    assert_eq!(tick, Tick { kind: TimerKind::KeepAlive, generation });
    assert_elapsed(start, 15 * 60);
    let tick = next_tick(&mut rx).await?;
    assert_eq!(tick, Tick { kind: TimerKind::PreExpiry, generation });
    assert_elapsed(start, 30 * 60);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_and_is_idempotent() -> anyhow::Result<()> {
    let (mut scheduler, mut rx) = scheduler();
    scheduler.schedule(T0_MS + 20 * MIN_MS);
    scheduler.stop();
    scheduler.stop();

    assert_eq!(scheduler.armed(), ArmedTimers::default());
    let waited = tokio::time::timeout(Duration::from_secs(24 * 3600), rx.recv()).await;
    assert!(waited.is_err(), "stopped scheduler still ticked: {waited:?}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn ticks_from_replaced_timers_are_stale() -> anyhow::Result<()> {
    let (mut scheduler, mut rx) = scheduler();
    scheduler.schedule(T0_MS + 5 * MIN_MS);
    let immediate = rx.try_recv()?;

    scheduler.schedule(T0_MS + 60 * MIN_MS);
    assert!(!scheduler.is_current(&immediate));
    Ok(())
}
