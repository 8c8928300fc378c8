// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A monotonic heartbeat emitting one tick per base interval, pausable, with no backfill
//! of missed ticks on unpause.
//!
//! The cadence itself rides on [`tokio::time::interval`] with
//! [`MissedTickBehavior::Skip`], the same combination used to drive a repeating action
//! under cancellation elsewhere in this codebase's lineage. What's injected is the
//! *timestamp stamped on each tick*, via [`Clock`] — tests drive scenarios with
//! [`crate::clock::FakeClock`] while controlling cadence with `tokio::time::{pause,
//! advance}`, so a whole multi-tick scenario runs without a single real sleep.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

/// Emits tick timestamps at a fixed cadence. Pausing stops emission without stopping the
/// underlying interval; ticks that land while paused are simply dropped, so unpausing
/// resumes on the interval's next natural boundary rather than replaying what was missed.
pub struct Ticker {
    clock: Arc<dyn Clock>,
    base_interval: Duration,
    paused: Arc<AtomicBool>,
}

impl Ticker {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, base_interval: Duration) -> Self {
        Self {
            clock,
            base_interval,
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Idempotent: pausing an already-paused ticker is a no-op.
    pub fn pause(&self) { self.paused.store(true, Ordering::SeqCst); }

    /// Idempotent: unpausing a running ticker is a no-op.
    pub fn unpause(&self) { self.paused.store(false, Ordering::SeqCst); }

    #[must_use]
    pub fn is_paused(&self) -> bool { self.paused.load(Ordering::SeqCst) }

    /// Runs until `cancel` fires. Each unpaused interval tick sends the clock's current
    /// time on `tx`. Send is awaited (not `try_send`): a slow dispatcher applies
    /// backpressure to the ticker itself rather than having ticks silently pile up,
    /// matching the contract that the dispatcher is expected to consume ticks promptly.
    pub async fn run(&self, tx: mpsc::Sender<DateTime<Utc>>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.base_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                _ = interval.tick() => {
                    if self.paused.load(Ordering::SeqCst) {
                        continue;
                    }
                    let now = self.clock.now();
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        result = tx.send(now) => {
                            if result.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}
