// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A tick-driven scheduler that dispatches alert-definition evaluations to long-lived
//! per-definition workers.
//!
//! The core loop: a [`ticker::Ticker`] emits one tick per configured base interval; a
//! [`dispatcher::Dispatcher`] reconciles the current set of alert definitions (from a
//! caller-supplied [`store::AlertDefinitionStore`]) against a [`registry::WorkerRegistry`]
//! of long-lived [`worker`] tasks, spawning and stopping workers as definitions appear and
//! disappear, and fans dispatch out across the tick window with bounded jitter.
//!
//! Everything that decides *what* a condition means is external: the
//! [`evaluator::ConditionEvaluator`] and the store are collaborators this crate only
//! invokes and logs the outcome of.

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod model;
pub mod registry;
pub mod store;
pub mod ticker;
pub mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use evaluator::{ConditionEvaluator, InstanceResult};
pub use model::{AlertDefinition, EvalContext, Key, Version};
pub use store::AlertDefinitionStore;
pub use worker::EvalAppliedHook;

use dispatcher::Dispatcher;
use ticker::Ticker;

/// Size of the channel carrying tick timestamps from the ticker to the dispatcher. `1` is
/// enough: the ticker awaits the send, so a slow dispatcher applies backpressure to the
/// ticker rather than letting ticks queue up.
const TICK_CHANNEL_CAPACITY: usize = 1;

/// The public entry point: wires a [`Ticker`] and a [`Dispatcher`] together and exposes
/// the lifecycle surface (`run`, `pause`, `unpause`).
///
/// `pause`/`unpause` are valid only after [`Self::run`] has been called at least once;
/// calling them before that returns [`SchedulerError::NotInitialized`].
pub struct Scheduler {
    ticker: Arc<Ticker>,
    dispatcher: Option<Dispatcher>,
    initialized: AtomicBool,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn AlertDefinitionStore>,
        evaluator: Arc<dyn ConditionEvaluator>,
        eval_applied: Option<EvalAppliedHook>,
    ) -> Self {
        let ticker = Arc::new(Ticker::new(clock, config.base_interval()));
        let dispatcher = Dispatcher::new(config, store, evaluator, eval_applied);
        Self {
            ticker,
            dispatcher: Some(dispatcher),
            initialized: AtomicBool::new(false),
        }
    }

    /// Pauses tick emission. Idempotent; valid only after [`Self::run`] has started.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotInitialized`] if called before [`Self::run`].
    pub fn pause(&self) -> Result<(), SchedulerError> {
        self.require_initialized()?;
        self.ticker.pause();
        Ok(())
    }

    /// Resumes tick emission on the ticker's next natural boundary; no backfill of ticks
    /// missed while paused. Idempotent; valid only after [`Self::run`] has started.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotInitialized`] if called before [`Self::run`].
    pub fn unpause(&self) -> Result<(), SchedulerError> {
        self.require_initialized()?;
        self.ticker.unpause();
        Ok(())
    }

    fn require_initialized(&self) -> Result<(), SchedulerError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SchedulerError::NotInitialized)
        }
    }

    /// Runs the ticker and dispatcher until `parent_cancel` fires, then waits for the
    /// dispatcher's worker task group to drain and returns its aggregate error (in
    /// practice always [`SchedulerError::Cancelled`]; see [`dispatcher::Dispatcher::run`]).
    ///
    /// # Errors
    ///
    /// Returns the dispatcher's aggregate error on shutdown.
    ///
    /// # Panics
    ///
    /// Panics if called more than once on the same [`Scheduler`] (the dispatcher is moved
    /// out on the first call).
    pub async fn run(&mut self, parent_cancel: CancellationToken) -> Result<(), SchedulerError> {
        let dispatcher = self
            .dispatcher
            .take()
            .expect("Scheduler::run must not be called more than once");
        self.initialized.store(true, Ordering::SeqCst);

        let (tick_tx, tick_rx) = mpsc::channel::<DateTime<Utc>>(TICK_CHANNEL_CAPACITY);

        let ticker = self.ticker.clone();
        let ticker_cancel = parent_cancel.clone();
        let ticker_task = tokio::spawn(async move { ticker.run(tick_tx, ticker_cancel).await });

        let result = dispatcher.run(tick_rx, parent_cancel).await;
        let _ = ticker_task.await;
        result
    }
}
