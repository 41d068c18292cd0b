//! How failures are surfaced to callers.
//!
//! Every failure that leaves a cache goes through the [`ExceptionHandlingStrategy`] of the manager
//! that created it, so all caches of one manager fail the same way.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// A policy for surfacing failures of memoized computations.
///
/// The strategy sees every failure that reaches a caller: fresh ones, replays of cached ones and
/// diagnostics raised by the storage layer itself. Cancellations never reach it.
///
/// A strategy can transform or record the failure but cannot turn it into a value; whatever it
/// returns is handed to the caller as `Err`.
pub trait ExceptionHandlingStrategy: Send + Sync + fmt::Debug {
    fn handle_exception(&self, error: StorageError) -> StorageError;
}

/// Rethrows failures with the storage layer's own frames stripped from their traces.
#[derive(Debug, Default, Clone, Copy)]
pub struct Throw;

impl ExceptionHandlingStrategy for Throw {
    fn handle_exception(&self, error: StorageError) -> StorageError {
        error.sanitized()
    }
}

/// Logs and counts every failure before rethrowing it like [`Throw`].
#[derive(Debug, Clone)]
pub struct LogAndThrow {
    manager: String,
}

impl LogAndThrow {
    pub fn new(manager: impl Into<String>) -> Self {
        Self {
            manager: manager.into(),
        }
    }
}

impl ExceptionHandlingStrategy for LogAndThrow {
    fn handle_exception(&self, error: StorageError) -> StorageError {
        let error = Throw.handle_exception(error);
        tracing::error!(
            error = &error as &dyn std::error::Error,
            manager = %self.manager,
            "memoized computation failed",
        );
        metric!(
            counter("storage.failure") += 1,
            "manager" => &self.manager,
            "kind" => error.metrics_tag(),
        );
        error
    }
}

/// The strategies that can be selected in the configuration file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Rethrow failures unchanged, see [`Throw`].
    #[default]
    Throw,
    /// Log every failure before rethrowing it, see [`LogAndThrow`].
    Log,
}
