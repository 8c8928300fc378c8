// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Error types for the scheduler. Retried errors ([`SchedulerError::StoreFailure`],
//! [`SchedulerError::EvaluationFailure`]) never escape the worker loop — see
//! [`crate::worker`] — they are logged and retried in place. Only [`SchedulerError::Cancelled`]
//! and setup-time errors cross the public API boundary.

use crate::model::Key;

/// Errors surfaced by the scheduler's public API and by collaborators it invokes.
///
/// | Variant               | Raised by                          | Retried? |
/// | :--------------------- | :---------------------------------- | :------- |
/// | [`NotInitialized`]     | `pause`/`unpause` before `run`      | No       |
/// | [`StoreFailure`]       | the definition store                | Yes      |
/// | [`EvaluationFailure`]  | the condition evaluator             | Yes      |
/// | [`IntervalInvalid`]    | the dispatcher, per-definition      | No (non-fatal) |
/// | [`Cancelled`]          | parent cancellation                 | No       |
/// | [`LoggingSetup`]       | [`crate::logging`] bootstrap        | No       |
/// | [`InvalidConfig`]      | `SchedulerConfig::new`              | No       |
///
/// [`NotInitialized`]: Self::NotInitialized
/// [`StoreFailure`]: Self::StoreFailure
/// [`EvaluationFailure`]: Self::EvaluationFailure
/// [`IntervalInvalid`]: Self::IntervalInvalid
/// [`Cancelled`]: Self::Cancelled
/// [`LoggingSetup`]: Self::LoggingSetup
/// [`InvalidConfig`]: Self::InvalidConfig
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum SchedulerError {
    /// `pause`/`unpause` invoked on a scheduler whose dispatch loop has not started.
    #[error("scheduler is not initialized; call run() before pause()/unpause()")]
    #[diagnostic(code(alert_scheduler::not_initialized))]
    NotInitialized,

    /// The definition store failed to answer `list_definitions` or `get_by_uid`.
    #[error("store failure for {key}: {source}")]
    #[diagnostic(code(alert_scheduler::store_failure))]
    StoreFailure {
        key: Key,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The condition evaluator returned an error for an evaluation attempt.
    #[error("evaluation failure for {key}: {source}")]
    #[diagnostic(code(alert_scheduler::evaluation_failure))]
    EvaluationFailure {
        key: Key,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// `intervalSeconds` is not a positive multiple of the scheduler's base interval.
    /// Non-fatal: the definition is skipped for the tick and remains eligible for later
    /// ticks where the interval is corrected.
    #[error("invalid interval for {key}: {interval_seconds}s is not a multiple of the {base_interval_seconds}s base interval")]
    #[diagnostic(code(alert_scheduler::interval_invalid))]
    IntervalInvalid {
        key: Key,
        interval_seconds: i64,
        base_interval_seconds: i64,
    },

    /// The parent cancellation token fired; the scheduler is unwinding.
    #[error("scheduler cancelled")]
    #[diagnostic(code(alert_scheduler::cancelled))]
    Cancelled,

    /// Bootstrapping the tracing subscriber failed (e.g. an unwritable log file path).
    #[error("failed to install logging: {0}")]
    #[diagnostic(code(alert_scheduler::logging_setup))]
    LoggingSetup(#[source] std::io::Error),

    /// [`crate::config::SchedulerConfig`] construction was rejected, e.g. `max_attempts == 0`.
    #[error("invalid scheduler configuration: {0}")]
    #[diagnostic(code(alert_scheduler::invalid_config))]
    InvalidConfig(String),
}
