// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The worker registry: a thread-safe mapping from [`Key`] to [`WorkerHandle`].
//!
//! This implementation follows the reimplementation recommended by the specification's
//! design notes rather than the broadcast-stop-channel design it accepts as in-scope:
//! each [`WorkerHandle`] carries its own [`CancellationToken`] instead of every worker
//! listening on one shared stop channel and re-queuing messages meant for other keys.
//! [`WorkerRegistry::del`] cancels that token, so deleting an entry is both "remove from
//! the map" and "signal the worker to stop" in one call — no separate stop channel, and
//! nothing to drain or abandon on shutdown (see DESIGN.md).
//!
//! The dispatch channel is bounded to capacity 1 with a non-blocking, drop-on-full send
//! at the sender (also per the design notes), rather than an unbuffered channel paired
//! with a fire-and-forget timer.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::{EvalContext, Key, Version};

/// Capacity of a worker's dispatch channel. `1` matches the "at most one eval request
/// worth queuing" semantics: a second send while the first is unconsumed is dropped by
/// [`WorkerHandle::try_dispatch`], mirroring the worker's own overlap refusal.
pub const DISPATCH_CHANNEL_CAPACITY: usize = 1;

/// A registry entry: the channel used to send evaluation requests to the worker owning
/// this key, the latest version the dispatcher has observed, and a cancellation token
/// scoped to this one worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<EvalContext>,
    pub version: Version,
    pub cancel: CancellationToken,
}

impl WorkerHandle {
    /// Sends an evaluation request without blocking. Returns `false` if the channel is
    /// full (the worker hasn't consumed the previous request yet) or already closed
    /// (the worker has exited); both are silent-drop cases by design.
    pub fn try_dispatch(&self, ctx: EvalContext) -> bool { self.tx.try_send(ctx).is_ok() }
}

/// A thread-safe `Key -> WorkerHandle` map. All four operations take a single
/// registry-wide mutex; callers on the dispatcher's single task may rely on `exists`
/// followed by `get_or_create_info` being effectively atomic, since no other agent
/// mutates the registry.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    inner: Mutex<HashMap<Key, Entry>>,
}

#[derive(Debug)]
struct Entry {
    handle: WorkerHandle,
}

impl WorkerRegistry {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Returns whether a worker handle exists for `(org_id, uid)`.
    #[must_use]
    pub fn exists(&self, org_id: i64, uid: &str) -> bool {
        let key = Key::new(org_id, uid);
        self.inner.lock().unwrap().contains_key(&key)
    }

    /// Returns the existing handle after bumping its `version` to the supplied value,
    /// or creates a fresh handle (with a new channel and cancellation token) if none
    /// exists. The caller cannot tell from the return value which happened; call
    /// [`Self::exists`] first if that distinction matters (the dispatcher does).
    ///
    /// When a new handle is created, the receiving half of its channel is returned
    /// alongside it so the caller can hand it to a freshly spawned worker. On an
    /// existing handle, the second element is `None`.
    ///
    /// `parent` is the scheduler-wide cancellation token; the new handle's own token is
    /// a child of it, so the worker stops on *either* parent cancellation or a later
    /// [`Self::del`] of this specific key, without a shared stop channel.
    pub fn get_or_create_info(
        &self,
        org_id: i64,
        uid: &str,
        version: Version,
        parent: &CancellationToken,
    ) -> (WorkerHandle, Option<mpsc::Receiver<EvalContext>>) {
        let key = Key::new(org_id, uid);
        let mut guard = self.inner.lock().unwrap();
        if let Some(entry) = guard.get_mut(&key) {
            entry.handle.version = version;
            return (entry.handle.clone(), None);
        }
        let (tx, rx) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);
        let handle = WorkerHandle {
            tx,
            version,
            cancel: parent.child_token(),
        };
        guard.insert(
            key,
            Entry {
                handle: handle.clone(),
            },
        );
        (handle, Some(rx))
    }

    /// Removes the entry for `key`, cancelling its worker's token. Does not wait for the
    /// worker to observe cancellation and exit; the caller (the dispatcher) only needs
    /// the key to stop participating in subsequent dispatches, which holds as soon as
    /// this call returns.
    pub fn del(&self, key: &Key) -> Option<WorkerHandle> {
        let entry = self.inner.lock().unwrap().remove(key)?;
        entry.handle.cancel.cancel();
        Some(entry.handle)
    }

    /// A point-in-time snapshot of the registry's keys, copied under the lock rather
    /// than streamed, so iteration latency never couples to a consumer's pace.
    #[must_use]
    pub fn key_map(&self) -> HashSet<Key> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }
}
