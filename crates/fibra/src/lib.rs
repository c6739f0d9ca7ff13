#![forbid(unsafe_code)]

//! fibra public facade crate.
//!
//! Re-exports the stable surface of the scheduler and reconciler crates,
//! adds [`RuntimeConfig`] loading, and offers a prelude for component code.
//!
//! # Example
//!
//! ```
//! use fibra::prelude::*;
//! use fibra::scheduler::ManualClock;
//!
//! fn counter() -> Component {
//!     Component::new("Counter", |cx, props| {
//!         let (count, _set) = cx.use_state(|| props.get_int("start").unwrap_or(0))?;
//!         Ok(Element::host("span").text(count.to_string()).build())
//!     })
//! }
//!
//! use fibra::reconciler::testing::MemoryHost;
//!
//! let mut host = MemoryHost::new();
//! let container = host.create_container();
//! let config = RuntimeConfig::default();
//! let scheduler = config.build_scheduler_with_clock(ManualClock::new());
//! let root = config.create_root(host, container, scheduler.clone());
//!
//! root.render(counter().element().prop("start", 3)).unwrap();
//! scheduler.run_until_idle().unwrap();
//! assert_eq!(root.with_host(|host| host.to_markup(container)), "<span>3</span>");
//! ```

pub mod config;

use fibra_reconciler::ReconcileError;
use fibra_scheduler::TaskError;

// --- Scheduler re-exports --------------------------------------------------

pub use fibra_scheduler::{
    Clock, ManualClock, MonotonicClock, PriorityLevel, Scheduler, SchedulerConfig, SchedulerStats,
    TaskHandle, TaskStatus,
};

// --- Reconciler re-exports -------------------------------------------------

pub use fibra_reconciler::{
    Component, Dispatch, Element, ElementBuilder, ElementType, EventPriority, HookCx, HookError,
    HostConfig, HostError, HostRef, IntoTeardown, Key, Node, PropValue, Props, ReconcilerConfig,
    RefObject, RenderError, Root, RootMode, RootStats, SetStateAction, StateSetter, Teardown,
};

#[cfg(feature = "test-helpers")]
pub use fibra_reconciler::testing;

// --- Config re-exports -----------------------------------------------------

pub use config::{ConfigError, RuntimeConfig};

// --- Errors ----------------------------------------------------------------

/// Top-level error type for fibra applications.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rendering or committing failed.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    /// A scheduled task failed. Render failures of concurrent roots arrive
    /// here wrapping a [`ReconcileError`].
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// The reconciler failure behind this error, looking through task
    /// wrapping.
    #[must_use]
    pub fn as_reconcile_error(&self) -> Option<&ReconcileError> {
        match self {
            Self::Reconcile(err) => Some(err),
            Self::Task(err) => err.downcast_ref::<ReconcileError>(),
            Self::Config(_) => None,
        }
    }
}

/// Standard result type for fibra APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude ---------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Component, Element, Error, HookCx, HostConfig, HostRef, Node, PriorityLevel, Props,
        RenderError, Result, Root, RuntimeConfig, Scheduler, StateSetter, Teardown,
    };

    pub use crate::{reconciler, scheduler};
}

pub use fibra_reconciler as reconciler;
pub use fibra_scheduler as scheduler;
