// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The data model shared by every component: [`AlertDefinition`], [`Key`], and
//! [`EvalContext`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monotonic per-definition version number. Bumps signal a worker to re-fetch.
pub type Version = i64;

/// Canonical `"<orgID>:<uid>"` identifier for a worker. Construction is total: there is
/// no escaping because `orgID` is a decimal integer and `uid` does not need quoting for
/// uniqueness (two different `uid`s can never collide once paired with `orgID`, since
/// the separator is the only character never present in a decimal `orgID`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    #[must_use]
    pub fn new(org_id: i64, uid: &str) -> Self { Self(format!("{org_id}:{uid}")) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// A declarative object describing a condition to evaluate on a schedule. Read-only
/// input from the store; the scheduler never mutates one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDefinition {
    pub org_id: i64,
    pub uid: String,
    /// Monotonic per definition. A strictly increasing value signals the worker to
    /// re-fetch before its next evaluation.
    pub version: Version,
    /// Evaluation cadence. Must be a positive multiple of the scheduler's base interval
    /// in seconds; see [`SchedulerError::IntervalInvalid`].
    ///
    /// [`SchedulerError::IntervalInvalid`]: crate::error::SchedulerError::IntervalInvalid
    pub interval_seconds: i64,
    /// Opaque payload forwarded verbatim to the [`crate::evaluator::ConditionEvaluator`].
    pub condition: serde_json::Value,
}

impl AlertDefinition {
    #[must_use]
    pub fn key(&self) -> Key { Key::new(self.org_id, &self.uid) }
}

/// Dispatcher-to-worker message. `now` is the tick timestamp, used verbatim as the
/// evaluation "as-of" time. `version` is the latest version known to the dispatcher at
/// dispatch time, which may be newer than the worker's cached definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalContext {
    pub now: DateTime<Utc>,
    pub version: Version,
}
