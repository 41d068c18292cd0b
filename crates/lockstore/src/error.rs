use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::trace::SanitizedTrace;

/// A failure surfaced by a lazy value, memoized function or cache.
///
/// Computation failures and panics are stored in their slot and replayed on every later access.
/// The [`Cancelled`](Self::Cancelled) variant is the only one that is never stored.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The user computation returned an error.
    ///
    /// The source is shared, so every replay hands out the very same captured error.
    #[error(transparent)]
    Computation(Arc<dyn StdError + Send + Sync + 'static>),
    /// The user computation panicked.
    ///
    /// The attached string is the panic message, if it had one.
    #[error("computation panicked: {0}")]
    Panicked(String),
    /// The computation was cancelled, either by itself or while waiting for the manager lock.
    ///
    /// A cancelled slot is reset and the next access computes again.
    #[error("computation cancelled")]
    Cancelled,
    /// A computation queried its own, not yet finished, result.
    #[error("recursion detected {kind}{} under {manager}", render_input(.input))]
    RecursionDetected {
        /// What kind of cache the recursion happened in.
        kind: &'static str,
        /// The key of the recursive call, for memoized functions.
        input: Option<String>,
        /// The manager owning the cache.
        manager: String,
        /// Where the recursive call came from.
        trace: SanitizedTrace,
    },
    /// A slot changed state outside of the manager's locking discipline.
    ///
    /// This always indicates a bug, either in this crate or in code that swallowed a cancellation.
    #[error("race condition detected{}. Old value is {found} under {manager}", render_input(.input))]
    RaceCondition {
        /// The key of the affected slot, for memoized functions.
        input: Option<String>,
        /// The state the slot was found in.
        found: &'static str,
        /// The manager owning the cache.
        manager: String,
        /// Where the computation was committed from.
        trace: SanitizedTrace,
    },
}

fn render_input(input: &Option<String>) -> String {
    match input {
        Some(input) => format!(" on input: {input}"),
        None => String::new(),
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::computation(err)
    }
}

impl From<anyhow::Error> for StorageError {
    fn from(err: anyhow::Error) -> Self {
        let boxed: Box<dyn StdError + Send + Sync + 'static> = err.into();
        Self::Computation(Arc::from(boxed))
    }
}

impl StorageError {
    /// Wraps any error (or error message) as a computation failure.
    pub fn computation<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::Computation(Arc::from(err.into()))
    }

    /// Turns the payload of a caught panic into a storable failure.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "Box<dyn Any>".to_owned()
        };
        Self::Panicked(message)
    }

    pub(crate) fn recursion(
        kind: &'static str,
        input: Option<&dyn fmt::Debug>,
        manager: &dyn fmt::Display,
    ) -> Self {
        Self::RecursionDetected {
            kind,
            input: input.map(|input| format!("{input:?}")),
            manager: manager.to_string(),
            trace: SanitizedTrace::capture(),
        }
    }

    pub(crate) fn race(
        input: Option<&dyn fmt::Debug>,
        found: &'static str,
        manager: &dyn fmt::Display,
    ) -> Self {
        Self::RaceCondition {
            input: input.map(|input| format!("{input:?}")),
            found,
            manager: manager.to_string(),
            trace: SanitizedTrace::capture(),
        }
    }

    /// Whether this is the cancellation marker.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The trace captured for diagnostics created by the storage layer itself.
    pub fn trace(&self) -> Option<&SanitizedTrace> {
        match self {
            Self::RecursionDetected { trace, .. } | Self::RaceCondition { trace, .. } => {
                Some(trace)
            }
            _ => None,
        }
    }

    /// Strips storage-layer frames from the captured trace, if there is one.
    pub fn sanitized(self) -> Self {
        match self {
            Self::RecursionDetected {
                kind,
                input,
                manager,
                trace,
            } => Self::RecursionDetected {
                kind,
                input,
                manager,
                trace: trace.sanitized(),
            },
            Self::RaceCondition {
                input,
                found,
                manager,
                trace,
            } => Self::RaceCondition {
                input,
                found,
                manager,
                trace: trace.sanitized(),
            },
            other => other,
        }
    }

    /// Whether `other` replays the very same captured failure.
    pub fn is_same_failure(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Computation(a), Self::Computation(b)) => Arc::ptr_eq(a, b),
            (Self::Panicked(a), Self::Panicked(b)) => a == b,
            (Self::Cancelled, Self::Cancelled) => true,
            _ => false,
        }
    }

    /// A short, stable name of the variant for tagging metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::Computation(_) => "computation",
            Self::Panicked(_) => "panicked",
            Self::Cancelled => "cancelled",
            Self::RecursionDetected { .. } => "recursion",
            Self::RaceCondition { .. } => "race",
        }
    }
}

/// The outcome of a memoized computation: either the value or the reason it is unavailable.
pub type StorageEntry<T = ()> = Result<T, StorageError>;
