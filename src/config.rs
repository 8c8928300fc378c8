// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Scheduler configuration. Construction validates; there is no silent no-op scheduler
//! lurking behind a zero interval or a zero attempt budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// The configuration values the specification enumerates: the ticker's base interval and
/// the per-evaluation attempt budget. Reading these from env, files, or CLI flags is a
/// collaborator's concern; this struct only holds and validates the resulting values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    base_interval: Duration,
    max_attempts: u32,
}

impl SchedulerConfig {
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] if `base_interval` is below one second
    /// (anything shorter truncates to `0` under [`Self::base_interval_seconds`], which
    /// would divide by zero on the first tick) or if `max_attempts` is zero.
    pub fn new(base_interval: Duration, max_attempts: u32) -> Result<Self, SchedulerError> {
        if base_interval < Duration::from_secs(1) {
            return Err(SchedulerError::InvalidConfig(
                "base_interval must be at least 1 second".to_string(),
            ));
        }
        if max_attempts == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            base_interval,
            max_attempts,
        })
    }

    #[must_use]
    pub fn base_interval(&self) -> Duration { self.base_interval }

    #[must_use]
    pub fn max_attempts(&self) -> u32 { self.max_attempts }

    #[must_use]
    pub fn base_interval_seconds(&self) -> i64 {
        i64::try_from(self.base_interval.as_secs()).unwrap_or(i64::MAX)
    }
}
