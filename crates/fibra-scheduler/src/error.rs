//! Error types for the scheduler.

use std::error::Error as StdError;
use std::fmt;

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, TaskError>;

type BoxError = Box<dyn StdError + 'static>;

/// Failure reported by a task callback or microtask.
///
/// The scheduler does not interpret task errors: it removes the failing task
/// and hands the error back to whoever drives the host loop.
#[derive(thiserror::Error)]
pub enum TaskError {
    /// A callback failed with its own error type.
    #[error("task failed: {0}")]
    Failed(#[source] BoxError),

    /// The task queue is at capacity.
    #[error("task queue full ({capacity} tasks)")]
    QueueFull { capacity: usize },
}

impl TaskError {
    /// Wrap any error as a task failure.
    pub fn new<E: StdError + 'static>(error: E) -> Self {
        Self::Failed(Box::new(error))
    }

    /// Borrow the wrapped error as a concrete type, if it is one.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Failed(inner) => inner.downcast_ref::<E>(),
            Self::QueueFull { .. } => None,
        }
    }

    /// Take the wrapped error back as a concrete type.
    pub fn downcast<E: StdError + 'static>(self) -> std::result::Result<E, Self> {
        match self {
            Self::Failed(inner) => inner.downcast::<E>().map(|e| *e).map_err(Self::Failed),
            other => Err(other),
        }
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(inner) => f.debug_tuple("Failed").field(inner).finish(),
            Self::QueueFull { capacity } => f
                .debug_struct("QueueFull")
                .field("capacity", capacity)
                .finish(),
        }
    }
}
