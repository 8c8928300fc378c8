// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The definition store collaborator: supplies the current list of alert definitions on
//! each tick, and a point lookup by `(org_id, uid)` returning the latest version. Out of
//! scope for this crate beyond the trait boundary; see §1 of the specification.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::AlertDefinition;

/// Supplies alert definitions to the dispatcher and workers.
///
/// Both methods may fail, but the two failures are handled differently by their callers.
/// A `list_definitions` failure is logged by the dispatcher and the tick is skipped
/// entirely; already-running workers keep serving their last-known definitions until the
/// next successful tick. A `get_by_uid` failure is wrapped by the worker as
/// [`crate::error::SchedulerError::StoreFailure`] and retried per its `max_attempts`
/// policy.
#[async_trait]
pub trait AlertDefinitionStore: Send + Sync {
    async fn list_definitions(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<AlertDefinition>, Box<dyn StdError + Send + Sync>>;

    async fn get_by_uid(
        &self,
        org_id: i64,
        uid: &str,
    ) -> Result<AlertDefinition, Box<dyn StdError + Send + Sync>>;
}

/// An in-memory store test double. Definitions are set directly by the test; a
/// `get_by_uid` failure can be scripted per-key to exercise the worker's retry path.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<InMemoryStoreState>,
}

#[derive(Debug, Default)]
struct InMemoryStoreState {
    definitions: HashMap<(i64, String), AlertDefinition>,
    fail_get_by_uid_times: HashMap<(i64, String), u32>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn upsert(&self, def: AlertDefinition) {
        let mut guard = self.inner.lock().unwrap();
        guard
            .definitions
            .insert((def.org_id, def.uid.clone()), def);
    }

    pub fn remove(&self, org_id: i64, uid: &str) {
        let mut guard = self.inner.lock().unwrap();
        guard.definitions.remove(&(org_id, uid.to_string()));
    }

    /// Makes the next `times` calls to `get_by_uid` for this key fail before succeeding.
    pub fn fail_get_by_uid_next(&self, org_id: i64, uid: &str, times: u32) {
        let mut guard = self.inner.lock().unwrap();
        guard
            .fail_get_by_uid_times
            .insert((org_id, uid.to_string()), times);
    }
}

#[async_trait]
impl AlertDefinitionStore for InMemoryStore {
    async fn list_definitions(
        &self,
        _as_of: DateTime<Utc>,
    ) -> Result<Vec<AlertDefinition>, Box<dyn StdError + Send + Sync>> {
        let guard = self.inner.lock().unwrap();
        let mut defs: Vec<_> = guard.definitions.values().cloned().collect();
        defs.sort_by(|a, b| a.key().as_str().cmp(b.key().as_str()));
        Ok(defs)
    }

    async fn get_by_uid(
        &self,
        org_id: i64,
        uid: &str,
    ) -> Result<AlertDefinition, Box<dyn StdError + Send + Sync>> {
        let mut guard = self.inner.lock().unwrap();
        let remaining = guard
            .fail_get_by_uid_times
            .get(&(org_id, uid.to_string()))
            .copied()
            .unwrap_or(0);
        if remaining > 0 {
            guard
                .fail_get_by_uid_times
                .insert((org_id, uid.to_string()), remaining - 1);
            return Err(format!("simulated store failure for {org_id}:{uid}").into());
        }
        guard
            .definitions
            .get(&(org_id, uid.to_string()))
            .cloned()
            .ok_or_else(|| format!("no such definition {org_id}:{uid}").into())
    }
}
