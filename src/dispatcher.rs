// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The per-tick reconciliation and jittered fan-out loop.
//!
//! On each tick: refresh the definition list from the store, reconcile it against the
//! registry (spawn workers for new keys, stop workers for removed keys), compute which
//! keys are due this tick, and schedule their dispatch with bounded intra-tick jitter.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::evaluator::ConditionEvaluator;
use crate::model::{EvalContext, Key};
use crate::registry::WorkerRegistry;
use crate::store::AlertDefinitionStore;
use crate::worker::{self, EvalAppliedHook, WorkerContext};

/// Owns the worker registry and the task group of every currently-running worker. Built
/// once and driven by [`Self::run`] for the scheduler's lifetime.
pub struct Dispatcher {
    config: SchedulerConfig,
    store: Arc<dyn AlertDefinitionStore>,
    evaluator: Arc<dyn ConditionEvaluator>,
    registry: WorkerRegistry,
    eval_applied: Option<EvalAppliedHook>,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn AlertDefinitionStore>,
        evaluator: Arc<dyn ConditionEvaluator>,
        eval_applied: Option<EvalAppliedHook>,
    ) -> Self {
        Self {
            config,
            store,
            evaluator,
            registry: WorkerRegistry::new(),
            eval_applied,
            tasks: JoinSet::new(),
        }
    }

    /// Consumes tick timestamps from `tick_rx` until `cancel` fires, then waits for every
    /// worker task to unwind and returns the group's aggregate error. Since workers never
    /// surface a retried error (see [`crate::worker`]), the only aggregate possible today
    /// is [`SchedulerError::Cancelled`]; the explicit wait-and-collect still matters
    /// because it's what makes shutdown orderly rather than abrupt.
    pub async fn run(
        mut self,
        mut tick_rx: mpsc::Receiver<DateTime<Utc>>,
        cancel: CancellationToken,
    ) -> Result<(), SchedulerError> {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                maybe_tick = tick_rx.recv() => {
                    match maybe_tick {
                        Some(now) => self.handle_tick(now, &cancel).await,
                        None => break,
                    }
                }
            }
        }

        while self.tasks.join_next().await.is_some() {}
        Err(SchedulerError::Cancelled)
    }

    async fn handle_tick(&mut self, now: DateTime<Utc>, cancel: &CancellationToken) {
        let base_interval_seconds = self.config.base_interval_seconds();
        let tick_num = now.timestamp() / base_interval_seconds;

        // A transient listing failure is logged and the tick is skipped entirely, rather
        // than propagated: already-running workers keep serving their last-known
        // definitions until the next successful tick.
        let definitions = match self.store.list_definitions(now).await {
            Ok(defs) => defs,
            Err(error) => {
                tracing::error!(now = %now, %error, "failed to list alert definitions; skipping tick");
                return;
            }
        };

        let mut surviving: HashSet<Key> = self.registry.key_map();
        let mut ready_to_run: Vec<(Key, crate::registry::WorkerHandle)> = Vec::new();

        for def in &definitions {
            let key = def.key();
            let new_routine = !self.registry.exists(def.org_id, &def.uid);
            let (handle, rx) =
                self.registry
                    .get_or_create_info(def.org_id, &def.uid, def.version, cancel);

            let invalid_interval = def.interval_seconds <= 0
                || def.interval_seconds % base_interval_seconds != 0;

            if invalid_interval {
                let error = SchedulerError::IntervalInvalid {
                    key: key.clone(),
                    interval_seconds: def.interval_seconds,
                    base_interval_seconds,
                };
                tracing::warn!(%error, "skipping this tick");
                surviving.remove(&key);
                continue;
            }

            if new_routine {
                self.spawn_worker(key.clone(), def.org_id, def.uid.clone(), rx.unwrap(), &handle);
            }

            let freq = def.interval_seconds / base_interval_seconds;
            if freq > 0 && tick_num % freq == 0 {
                ready_to_run.push((key.clone(), handle));
            }
            surviving.remove(&key);
        }

        for key in surviving {
            if self.registry.del(&key).is_some() {
                tracing::info!(key = %key, "worker stopped: definition no longer present");
            }
        }

        self.dispatch_with_jitter(now, ready_to_run);
    }

    fn spawn_worker(
        &mut self,
        key: Key,
        org_id: i64,
        uid: String,
        rx: mpsc::Receiver<EvalContext>,
        handle: &crate::registry::WorkerHandle,
    ) {
        let ctx = WorkerContext {
            key,
            org_id,
            uid,
            max_attempts: self.config.max_attempts(),
            store: self.store.clone(),
            evaluator: self.evaluator.clone(),
            eval_applied: self.eval_applied.clone(),
        };
        let cancel = handle.cancel.clone();
        self.tasks.spawn(worker::run(ctx, rx, cancel));
    }

    /// Spreads `ready_to_run` evenly across the base interval: offsets `0, step, 2*step,
    /// ...` where `step = baseInterval / N`. Each dispatch runs on its own timer and is
    /// non-blocking from the worker's perspective (`try_dispatch` drops on a full
    /// channel), matching the worker's own overlap refusal.
    fn dispatch_with_jitter(
        &self,
        now: DateTime<Utc>,
        ready_to_run: Vec<(Key, crate::registry::WorkerHandle)>,
    ) {
        let n = ready_to_run.len();
        if n == 0 {
            return;
        }
        let step = self.config.base_interval() / u32::try_from(n).unwrap_or(u32::MAX);

        for (i, (key, handle)) in ready_to_run.into_iter().enumerate() {
            let offset = step * u32::try_from(i).unwrap_or(u32::MAX);
            let eval_ctx = EvalContext {
                now,
                version: handle.version,
            };
            tokio::spawn(async move {
                if !offset.is_zero() {
                    tokio::time::sleep(offset).await;
                }
                if !handle.try_dispatch(eval_ctx) {
                    tracing::debug!(key = %key, "dispatch dropped: worker busy or gone");
                }
            });
        }
    }
}
