// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The definition routine: a long-lived task owning evaluation for exactly one key.
//!
//! Unlike the specification's reference design, this worker has no explicit
//! `evalRunning` flag. Because its dispatch channel has capacity
//! [`crate::registry::DISPATCH_CHANNEL_CAPACITY`] (`1`) and the worker does not return to
//! its receive loop until the current evaluation sequence finishes, a dispatcher send
//! that arrives while the worker is busy finds the channel full and is silently dropped
//! at the sender — see [`crate::registry::WorkerHandle::try_dispatch`]. The in-flight
//! flag and the channel's fullness are the same fact observed from two sides, so only
//! one needs to be represented.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::evaluator::ConditionEvaluator;
use crate::model::{AlertDefinition, EvalContext, Key};
use crate::store::AlertDefinitionStore;

/// Invoked after every evaluation sequence completes (success or attempt exhaustion).
/// Never invoked for a silently dropped request, since the worker never observes those.
pub type EvalAppliedHook = Arc<dyn Fn(&Key, DateTime<Utc>) + Send + Sync>;

/// Parameters shared by every worker task, grouped so [`crate::dispatcher`] doesn't have
/// to thread a long argument list through `tokio::spawn`.
pub struct WorkerContext {
    pub key: Key,
    pub org_id: i64,
    pub uid: String,
    pub max_attempts: u32,
    pub store: Arc<dyn AlertDefinitionStore>,
    pub evaluator: Arc<dyn ConditionEvaluator>,
    pub eval_applied: Option<EvalAppliedHook>,
}

/// Runs the worker loop until its own cancellation token fires or the receiver observes
/// the channel closing (the registry entry was removed and every handle clone dropped).
/// Consumes the receiving half handed back by [`crate::registry::WorkerRegistry::get_or_create_info`]
/// on first creation of this key.
pub async fn run(
    ctx: WorkerContext,
    mut rx: mpsc::Receiver<EvalContext>,
    cancel: CancellationToken,
) {
    let mut cached: Option<AlertDefinition> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(org_id = ctx.org_id, uid = %ctx.uid, "worker stopping: cancelled");
                return;
            }
            maybe_eval_ctx = rx.recv() => {
                match maybe_eval_ctx {
                    Some(eval_ctx) => run_eval_sequence(&ctx, &mut cached, eval_ctx).await,
                    None => {
                        tracing::debug!(org_id = ctx.org_id, uid = %ctx.uid, "worker stopping: channel closed");
                        return;
                    }
                }
            }
        }
    }
}

/// One full evaluation sequence: re-fetch at most once, then evaluate with unconditional
/// retry up to `max_attempts`, logging every attempt's number, elapsed duration, and
/// error. Invokes the `eval_applied` test hook exactly once at the end, regardless of
/// outcome.
async fn run_eval_sequence(
    ctx: &WorkerContext,
    cached: &mut Option<AlertDefinition>,
    eval_ctx: EvalContext,
) {
    let mut refetched_this_sequence = false;
    let mut succeeded = false;

    for attempt in 0..ctx.max_attempts {
        let attempt_start = Instant::now();
        let need_fetch = !refetched_this_sequence
            && cached.as_ref().is_none_or(|def| def.version < eval_ctx.version);

        if need_fetch {
            match ctx.store.get_by_uid(ctx.org_id, &ctx.uid).await {
                Ok(def) => {
                    *cached = Some(def);
                    refetched_this_sequence = true;
                }
                Err(source) => {
                    let error = SchedulerError::StoreFailure {
                        key: ctx.key.clone(),
                        source,
                    };
                    tracing::warn!(
                        org_id = ctx.org_id,
                        uid = %ctx.uid,
                        attempt,
                        now = %eval_ctx.now,
                        duration_ms = attempt_start.elapsed().as_millis() as u64,
                        %error,
                        "store fetch failed"
                    );
                    continue;
                }
            }
        }

        let Some(def) = cached.as_ref() else {
            // Definition was never successfully fetched; nothing to evaluate this
            // attempt. The fetch failure above already logged and consumed the
            // attempt budget.
            continue;
        };

        match ctx.evaluator.evaluate(&def.condition, eval_ctx.now).await {
            Ok(results) => {
                tracing::info!(
                    org_id = ctx.org_id,
                    uid = %ctx.uid,
                    attempt,
                    now = %eval_ctx.now,
                    duration_ms = attempt_start.elapsed().as_millis() as u64,
                    instance_count = results.len(),
                    "evaluation succeeded"
                );
                succeeded = true;
                break;
            }
            Err(source) => {
                let error = SchedulerError::EvaluationFailure {
                    key: ctx.key.clone(),
                    source,
                };
                tracing::warn!(
                    org_id = ctx.org_id,
                    uid = %ctx.uid,
                    attempt,
                    now = %eval_ctx.now,
                    duration_ms = attempt_start.elapsed().as_millis() as u64,
                    %error,
                    "evaluation failed"
                );
            }
        }
    }

    if !succeeded {
        tracing::error!(
            org_id = ctx.org_id,
            uid = %ctx.uid,
            max_attempts = ctx.max_attempts,
            now = %eval_ctx.now,
            "evaluation exhausted retries"
        );
    }

    if let Some(hook) = &ctx.eval_applied {
        hook(&ctx.key, eval_ctx.now);
    }
}
