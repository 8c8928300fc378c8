// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Ambient tracing bootstrap. Every component logs through structured `tracing` fields
//! (`org_id`, `uid`, `attempt`, `now`, `duration_ms`, `error`) rather than interpolating
//! them into the message string, so output stays machine-parseable regardless of which
//! layer this module installs.
//!
//! Mirrors the reference tracing bootstrap's `TracingConfig`/`install_global`/
//! `install_thread_local` split: global installation is for a running process (can only
//! happen once), thread-local installation is for tests that want isolated, per-thread
//! output.

use std::path::PathBuf;

use tracing_core::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::SchedulerError;

/// Where logs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterConfig {
    Stdout,
    Stderr,
    /// Rolling file with the given path-and-prefix, e.g. `/var/log/alert-scheduler`.
    File(PathBuf),
}

/// Configures the tracing subscriber to install. `level_filter` bounds every layer this
/// module creates.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub writer_config: WriterConfig,
    pub level_filter: LevelFilter,
}

impl LoggingConfig {
    #[must_use]
    pub fn new(writer_config: WriterConfig, level_filter: LevelFilter) -> Self {
        Self {
            writer_config,
            level_filter,
        }
    }
}

/// Installs a process-wide default subscriber. Can only be called once per process;
/// calling it twice is a setup bug the caller should avoid, not something this function
/// tries to paper over.
///
/// # Errors
///
/// Returns [`SchedulerError::LoggingSetup`] if `writer_config` names an unwritable file
/// path.
pub fn install_global(config: LoggingConfig) -> Result<(), SchedulerError> {
    let (layer, _guard) = build_layer(&config)?;
    tracing_subscriber::registry().with(layer).init();
    // The non-blocking file guard, if any, is intentionally leaked: a process-wide
    // subscriber lives for the process's lifetime, so there is no later point at which
    // dropping it would be meaningful.
    std::mem::forget(_guard);
    Ok(())
}

/// Installs a thread-local subscriber scoped to the calling thread, for tests that want
/// isolated output per test without contending for the single global subscriber slot.
/// Returns a guard; logging reverts to whatever was installed before once it's dropped.
///
/// # Errors
///
/// Returns [`SchedulerError::LoggingSetup`] if `writer_config` names an unwritable file
/// path.
pub fn install_thread_local(
    config: LoggingConfig,
) -> Result<tracing::subscriber::DefaultGuard, SchedulerError> {
    let (layer, guard) = build_layer(&config)?;
    let subscriber = tracing_subscriber::registry().with(layer);
    // Leaking the non-blocking writer guard here is the test-scoped equivalent of the
    // global case: the thread-local subscriber guard already bounds the installation's
    // lifetime, so the writer only needs to outlive it, not be explicitly dropped first.
    std::mem::forget(guard);
    Ok(tracing::subscriber::set_default(subscriber))
}

type BoxedLayer = Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync>;

fn build_layer(
    config: &LoggingConfig,
) -> Result<(BoxedLayer, Option<tracing_appender::non_blocking::WorkerGuard>), SchedulerError> {
    use tracing_subscriber::Layer;

    let fmt_layer = tracing_subscriber::fmt::layer();

    match &config.writer_config {
        WriterConfig::Stdout => Ok((
            Box::new(
                fmt_layer
                    .with_writer(std::io::stdout)
                    .with_filter(config.level_filter),
            ),
            None,
        )),
        WriterConfig::Stderr => Ok((
            Box::new(
                fmt_layer
                    .with_writer(std::io::stderr)
                    .with_filter(config.level_filter),
            ),
            None,
        )),
        WriterConfig::File(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            if let Some(dir) = dir {
                std::fs::create_dir_all(dir).map_err(SchedulerError::LoggingSetup)?;
            }
            let prefix = path
                .file_name()
                .map_or_else(|| "alert-scheduler.log".to_string(), |n| n.to_string_lossy().into_owned());
            let file_appender = tracing_appender::rolling::daily(
                dir.unwrap_or_else(|| std::path::Path::new(".")),
                prefix,
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            Ok((
                Box::new(fmt_layer.with_writer(non_blocking).with_filter(config.level_filter)),
                Some(guard),
            ))
        }
    }
}
