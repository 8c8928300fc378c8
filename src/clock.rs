// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! An injectable clock so the [`crate::ticker::Ticker`] and tests can control time
//! without sleeping. [`SystemClock`] is the production implementation; [`FakeClock`] is
//! manually advanced by tests.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// A source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Backed by [`chrono::Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A manually-advanced clock for deterministic tests. Cloning shares the same
/// underlying time: advancing one handle advances every clone.
#[derive(Debug, Clone)]
pub struct FakeClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap();
        *guard = to;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> { *self.now.lock().unwrap() }
}
