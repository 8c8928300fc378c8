// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use std::error::Error as StdError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alert_scheduler::{
    AlertDefinition, Clock, ConditionEvaluator, EvalAppliedHook, FakeClock, InstanceResult, Key,
    Scheduler, SchedulerConfig, SchedulerError,
};
use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use alert_scheduler::evaluator::ScriptedEvaluator;
use alert_scheduler::store::InMemoryStore;

fn def(org_id: i64, uid: &str, version: i64, interval_seconds: i64) -> AlertDefinition {
    def_with_condition(org_id, uid, version, interval_seconds, serde_json::json!({}))
}

fn def_with_condition(
    org_id: i64,
    uid: &str,
    version: i64,
    interval_seconds: i64,
    condition: Value,
) -> AlertDefinition {
    AlertDefinition {
        org_id,
        uid: uid.to_string(),
        version,
        interval_seconds,
        condition,
    }
}

fn counting_hook() -> (EvalAppliedHook, Arc<Mutex<Vec<(Key, chrono::DateTime<Utc>)>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_clone = calls.clone();
    let hook: EvalAppliedHook = Arc::new(move |key, now| {
        calls_clone.lock().unwrap().push((key.clone(), now));
    });
    (hook, calls)
}

/// Records every condition payload it was asked to evaluate, to let a test observe
/// which version of a definition a worker actually fetched and used.
struct RecordingEvaluator {
    seen: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl ConditionEvaluator for RecordingEvaluator {
    async fn evaluate(
        &self,
        condition: &Value,
        _as_of: chrono::DateTime<Utc>,
    ) -> Result<Vec<InstanceResult>, Box<dyn StdError + Send + Sync>> {
        self.seen.lock().unwrap().push(condition.clone());
        Ok(vec![])
    }
}

/// Scenario 1: single aligned definition spawns a worker and evaluates on the first tick
/// whose number it's due on.
#[tokio::test(start_paused = true)]
async fn single_definition_aligned() {
    let store = Arc::new(InMemoryStore::new());
    store.upsert(def(1, "a", 1, 10));
    let evaluator = Arc::new(ScriptedEvaluator::always_succeeds(vec![InstanceResult {
        instance: "i1".to_string(),
        state: "Alerting".to_string(),
    }]));
    let clock = Arc::new(FakeClock::new(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    ));
    let (hook, calls) = counting_hook();

    let config = SchedulerConfig::new(Duration::from_secs(10), 3).unwrap();
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let mut scheduler = Scheduler::new(config, clock_dyn, store, evaluator, Some(hook));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let run_handle = tokio::spawn(async move { scheduler.run(cancel_clone).await });

    clock.set(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:10Z")
            .unwrap()
            .with_timezone(&Utc),
    );
    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(calls.lock().unwrap().iter().any(|(k, _)| *k == Key::new(1, "a")));

    cancel.cancel();
    let result = run_handle.await.unwrap();
    assert!(matches!(result, Err(SchedulerError::Cancelled)));
}

/// Scenario 2: a misaligned interval never dispatches, regardless of how many ticks pass.
#[tokio::test(start_paused = true)]
async fn misaligned_interval_never_evaluates() {
    let store = Arc::new(InMemoryStore::new());
    store.upsert(def(1, "b", 1, 15));
    let evaluator = Arc::new(ScriptedEvaluator::always_succeeds(vec![]));
    let clock = Arc::new(FakeClock::new(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    ));
    let (hook, calls) = counting_hook();

    let config = SchedulerConfig::new(Duration::from_secs(10), 3).unwrap();
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let mut scheduler = Scheduler::new(config, clock_dyn, store, evaluator, Some(hook));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let run_handle = tokio::spawn(async move { scheduler.run(cancel_clone).await });

    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(calls.lock().unwrap().is_empty());

    cancel.cancel();
    let _ = run_handle.await.unwrap();
}

/// Scenario 5: the evaluator fails twice then succeeds; exactly one successful evaluation
/// is reported to the test hook.
#[tokio::test(start_paused = true)]
async fn transient_failure_reports_single_success() {
    let store = Arc::new(InMemoryStore::new());
    store.upsert(def(1, "a", 1, 10));
    let evaluator = Arc::new(ScriptedEvaluator::new(
        2,
        vec![InstanceResult {
            instance: "i1".to_string(),
            state: "Alerting".to_string(),
        }],
    ));
    let clock = Arc::new(FakeClock::new(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    ));
    let (hook, calls) = counting_hook();

    let config = SchedulerConfig::new(Duration::from_secs(10), 3).unwrap();
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let mut scheduler = Scheduler::new(config, clock_dyn, store, evaluator, Some(hook));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let run_handle = tokio::spawn(async move { scheduler.run(cancel_clone).await });

    clock.set(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:10Z")
            .unwrap()
            .with_timezone(&Utc),
    );
    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let recorded = calls.lock().unwrap();
    assert_eq!(recorded.iter().filter(|(k, _)| *k == Key::new(1, "a")).count(), 1);
    drop(recorded);

    cancel.cancel();
    let _ = run_handle.await.unwrap();
}

/// Boundary: `max_attempts == 1` means a single evaluator failure yields no retry. The
/// hook still fires once (attempt exhaustion is a completed sequence, not a drop).
#[tokio::test(start_paused = true)]
async fn max_attempts_one_does_not_retry() {
    let store = Arc::new(InMemoryStore::new());
    store.upsert(def(1, "a", 1, 10));
    let evaluator = Arc::new(ScriptedEvaluator::new(u32::MAX, vec![]));
    let clock = Arc::new(FakeClock::new(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    ));
    let (hook, calls) = counting_hook();

    let config = SchedulerConfig::new(Duration::from_secs(10), 1).unwrap();
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let mut scheduler = Scheduler::new(config, clock_dyn, store, evaluator, Some(hook));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let run_handle = tokio::spawn(async move { scheduler.run(cancel_clone).await });

    clock.set(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:10Z")
            .unwrap()
            .with_timezone(&Utc),
    );
    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.lock().unwrap().len(), 1);

    cancel.cancel();
    let _ = run_handle.await.unwrap();
}

/// Scenario 4 (deletion): a definition removed from the store stops receiving evaluations
/// on the next tick, without crashing the scheduler.
#[tokio::test(start_paused = true)]
async fn deleted_definition_stops_receiving_evaluations() {
    let store = Arc::new(InMemoryStore::new());
    store.upsert(def(1, "a", 1, 10));
    let evaluator = Arc::new(ScriptedEvaluator::always_succeeds(vec![]));
    let clock = Arc::new(FakeClock::new(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    ));
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let hook: EvalAppliedHook = Arc::new(move |_key, _now| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    });

    let config = SchedulerConfig::new(Duration::from_secs(10), 3).unwrap();
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let mut scheduler = Scheduler::new(config, clock_dyn, store.clone(), evaluator, Some(hook));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let run_handle = tokio::spawn(async move { scheduler.run(cancel_clone).await });

    clock.set(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:10Z")
            .unwrap()
            .with_timezone(&Utc),
    );
    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store.remove(1, "a");
    clock.set(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:20Z")
            .unwrap()
            .with_timezone(&Utc),
    );
    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // No additional evaluation past the one already recorded before deletion.
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cancel.cancel();
    let _ = run_handle.await.unwrap();
}

/// Scenario 3: a version bump mid-life is observed through the real `Scheduler` path —
/// the dispatcher refreshes `handle.version` on the tick that sees the new version, and
/// the worker re-fetches exactly once before evaluating with the new condition.
#[tokio::test(start_paused = true)]
async fn version_bump_mid_life_refetches_through_dispatcher() {
    let store = Arc::new(InMemoryStore::new());
    store.upsert(def_with_condition(1, "a", 1, 10, serde_json::json!({"v": 1})));
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let evaluator = Arc::new(RecordingEvaluator { seen: seen.clone() });
    let clock = Arc::new(FakeClock::new(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    ));

    let config = SchedulerConfig::new(Duration::from_secs(10), 3).unwrap();
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let mut scheduler = Scheduler::new(config, clock_dyn, store.clone(), evaluator, None);

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let run_handle = tokio::spawn(async move { scheduler.run(cancel_clone).await });

    clock.set(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:10Z")
            .unwrap()
            .with_timezone(&Utc),
    );
    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().unwrap().last(), Some(&serde_json::json!({"v": 1})));

    store.upsert(def_with_condition(1, "a", 2, 10, serde_json::json!({"v": 2})));
    clock.set(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:20Z")
            .unwrap()
            .with_timezone(&Utc),
    );
    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().unwrap().last(), Some(&serde_json::json!({"v": 2})));

    cancel.cancel();
    let _ = run_handle.await.unwrap();
}

/// Scenario 6: 5 definitions ready at the same tick with `base_interval = 10s` are
/// spread at offsets `0, 2s, 4s, 6s, 8s` (`step = base_interval / N`).
#[tokio::test(start_paused = true)]
async fn jitter_spreads_simultaneous_dispatches_across_base_interval() {
    let store = Arc::new(InMemoryStore::new());
    for uid in ["a", "b", "c", "d", "e"] {
        store.upsert(def(1, uid, 1, 10));
    }
    let evaluator = Arc::new(ScriptedEvaluator::always_succeeds(vec![]));
    let clock = Arc::new(FakeClock::new(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    ));

    let fired: Arc<Mutex<Vec<(Key, tokio::time::Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let fired_clone = fired.clone();
    let hook: EvalAppliedHook = Arc::new(move |key, _now| {
        fired_clone.lock().unwrap().push((key.clone(), tokio::time::Instant::now()));
    });

    let config = SchedulerConfig::new(Duration::from_secs(10), 3).unwrap();
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let mut scheduler = Scheduler::new(config, clock_dyn, store, evaluator, Some(hook));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let run_handle = tokio::spawn(async move { scheduler.run(cancel_clone).await });

    clock.set(
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:10Z")
            .unwrap()
            .with_timezone(&Utc),
    );
    tokio::time::advance(Duration::from_secs(10)).await;
    // Long enough to let every jittered dispatch (max offset 8s) fire, short enough to
    // stay before the next base-interval tick at T=20s.
    tokio::time::sleep(Duration::from_secs(9)).await;

    let mut recorded = fired.lock().unwrap().clone();
    assert_eq!(recorded.len(), 5);
    recorded.sort_by_key(|(_, t)| *t);
    let base = recorded[0].1;
    let gaps: Vec<Duration> = recorded.iter().map(|(_, t)| t.duration_since(base)).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::ZERO,
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(6),
            Duration::from_secs(8),
        ]
    );

    cancel.cancel();
    let _ = run_handle.await.unwrap();
}
