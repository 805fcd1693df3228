// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Refresh scheduler: pre-expiry timer plus keep-alive backstop.
//!
//! Timers do not refresh anything themselves. They post a [`Tick`] to the
//! coordinator, stamped with the generation that armed them, so a tick from a
//! replaced timer can always be recognised and dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::clock::{duration_ms, Clock};
use crate::session::LifecycleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    PreExpiry,
    KeepAlive,
}

/// Timer firing delivered to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Which timers currently have a live task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArmedTimers {
    pub pre_expiry: bool,
    pub keep_alive: bool,
}

/// Owner of the two refresh timers. One instance per coordinator.
pub struct RefreshScheduler {
    margin: Duration,
    keep_alive: Duration,
    clock: Arc<dyn Clock>,
    tick_tx: mpsc::UnboundedSender<Tick>,
    pre_expiry: Option<JoinHandle<()>>,
    keep_alive_timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl RefreshScheduler {
    pub fn new(
        config: &LifecycleConfig,
        clock: Arc<dyn Clock>,
        tick_tx: mpsc::UnboundedSender<Tick>,
    ) -> Self {
        Self {
            margin: config.refresh_margin,
            keep_alive: config.keep_alive,
            clock,
            tick_tx,
            pre_expiry: None,
            keep_alive_timer: None,
            generation: 0,
        }
    }

    /// Time until the pre-expiry refresh for a session expiring at
    /// `expires_at_ms`. Zero once inside the margin or past expiry.
    pub fn refresh_delay(&self, expires_at_ms: u64) -> Duration {
        let refresh_at = expires_at_ms.saturating_sub(duration_ms(self.margin));
        Duration::from_millis(refresh_at.saturating_sub(self.clock.now_ms()))
    }

    /// True if a session expiring at `expires_at_ms` should be refreshed now.
    pub fn is_due(&self, expires_at_ms: u64) -> bool {
        self.refresh_delay(expires_at_ms).is_zero()
    }

    /// Cancel any armed timers, then arm both for a session expiring at
    /// `expires_at_ms`.
    pub fn schedule(&mut self, expires_at_ms: u64) {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;

        let delay = self.refresh_delay(expires_at_ms);
        if delay.is_zero() {
            debug!(generation, "session inside refresh margin, firing pre-expiry now");
            let _ = self.tick_tx.send(Tick { kind: TimerKind::PreExpiry, generation });
        } else {
            debug!(generation, delay_secs = delay.as_secs(), "arming pre-expiry refresh");
            let tx = self.tick_tx.clone();
            self.pre_expiry = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Tick { kind: TimerKind::PreExpiry, generation });
            }));
        }

        let period = self.keep_alive;
        let tx = self.tick_tx.clone();
        self.keep_alive_timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(Tick { kind: TimerKind::KeepAlive, generation }).is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancel both timers. Safe to call with nothing armed.
    pub fn stop(&mut self) {
        self.cancel();
        self.generation += 1;
        debug!(generation = self.generation, "refresh timers stopped");
    }

    /// True if `tick` was produced by the currently armed timers.
    pub fn is_current(&self, tick: &Tick) -> bool {
        tick.generation == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn armed(&self) -> ArmedTimers {
        let live = |h: &Option<JoinHandle<()>>| h.as_ref().is_some_and(|h| !h.is_finished());
        ArmedTimers { pre_expiry: live(&self.pre_expiry), keep_alive: live(&self.keep_alive_timer) }
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.pre_expiry.take() {
            handle.abort();
        }
        if let Some(handle) = self.keep_alive_timer.take() {
            handle.abort();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
