// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The condition evaluator collaborator: given a condition and an evaluation timestamp,
//! returns a set of per-instance results. The scheduler only invokes it and logs its
//! outcome — result semantics are entirely the evaluator's concern.

use std::error::Error as StdError;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// The outcome of evaluating one alert instance within a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceResult {
    pub instance: String,
    pub state: String,
}

/// Evaluates a condition as of a timestamp, returning per-instance results.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        condition: &Value,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<InstanceResult>, Box<dyn StdError + Send + Sync>>;
}

/// A scriptable evaluator test double: fails the next `fail_times` calls, then returns
/// `results` on success. Used to exercise the worker's retry-then-succeed path
/// (specification §8 scenario 5).
pub struct ScriptedEvaluator {
    state: Mutex<ScriptedEvaluatorState>,
}

struct ScriptedEvaluatorState {
    fail_times: u32,
    results: Vec<InstanceResult>,
}

impl ScriptedEvaluator {
    #[must_use]
    pub fn new(fail_times: u32, results: Vec<InstanceResult>) -> Self {
        Self {
            state: Mutex::new(ScriptedEvaluatorState {
                fail_times,
                results,
            }),
        }
    }

    #[must_use]
    pub fn always_succeeds(results: Vec<InstanceResult>) -> Self { Self::new(0, results) }
}

#[async_trait]
impl ConditionEvaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        _condition: &Value,
        _as_of: DateTime<Utc>,
    ) -> Result<Vec<InstanceResult>, Box<dyn StdError + Send + Sync>> {
        let mut guard = self.state.lock().unwrap();
        if guard.fail_times > 0 {
            guard.fail_times -= 1;
            return Err("simulated evaluation failure".into());
        }
        Ok(guard.results.clone())
    }
}
