//! Public root handle.
//!
//! A [`Root`] binds one host container to a fiber tree and a scheduler.
//! Rendering into it only queues an update; the work happens when the
//! scheduler runs (or immediately inside [`Root::flush_sync`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use fibra_reconciler::testing::MemoryHost;
//! use fibra_reconciler::{Element, ReconcilerConfig, Root};
//! use fibra_scheduler::{Scheduler, SchedulerConfig};
//!
//! let mut host = MemoryHost::new();
//! let container = host.create_container();
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! let root = Root::with_config(host, container, scheduler, ReconcilerConfig::sync());
//!
//! root.flush_sync(|| root.render(Element::host("p").text("hello").build()))
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(root.with_host(|host| host.to_markup(container)), "<p>hello</p>");
//! ```

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use fibra_scheduler::Scheduler;
use tracing::{info, warn};

use crate::config::ReconcilerConfig;
use crate::element::Node;
use crate::error::Result;
use crate::event_priority::EventPriority;
use crate::fiber::{FiberId, FiberTree};
use crate::hooks::UpdateSink;
use crate::host::HostConfig;
use crate::lane::{Lane, Lanes, describe_lanes};
use crate::update_queue::{HostRootState, StatePayload, Update};
use crate::work_loop::RootInner;

/// Counters of one root since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootStats {
    /// Render passes that reached the end of the tree.
    pub renders: u64,
    pub commits: u64,
    /// Passes thrown away for a different lane set.
    pub restarts: u64,
    /// Render slices that stopped because the scheduler asked to yield.
    pub yields: u64,
    /// State updates dropped because they did not change anything.
    pub eager_bailouts: u64,
    pub passive_flushes: u64,
    /// Fiber slots released by deletions and discarded passes.
    pub fibers_freed: u64,
}

/// Handle to a root container. Clones share the same root.
pub struct Root<H: HostConfig> {
    inner: Rc<RootInner<H>>,
}

impl<H: HostConfig> Clone for Root<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<H: HostConfig> Root<H> {
    /// Create a concurrent root rendering into `container`.
    pub fn create(host: H, container: H::Instance, scheduler: Scheduler) -> Self {
        Self::with_config(host, container, scheduler, ReconcilerConfig::default())
    }

    pub fn with_config(
        host: H,
        container: H::Instance,
        scheduler: Scheduler,
        config: ReconcilerConfig,
    ) -> Self {
        for problem in config.validate() {
            warn!(target: "fibra.reconciler", problem, "invalid reconciler config");
        }
        info!(
            target: "fibra.reconciler",
            mode = config.mode.as_str(),
            ?container,
            "root created"
        );
        Self {
            inner: RootInner::new(host, container, scheduler, config),
        }
    }

    /// Replace the rendered tree with `node` at the current update lane.
    pub fn render(&self, node: impl Into<Node>) -> Result<()> {
        let inner = &self.inner;
        let lane = inner.request_update_lane();
        let event_time = inner.request_event_time();
        let update = Update::new(
            lane,
            StatePayload::Replace(HostRootState {
                element: node.into(),
            }),
        );
        let queue = Rc::clone(&inner.root_queue);
        inner.enqueue_update(
            inner.host_root,
            lane,
            Box::new(move || queue.borrow_mut().push(update)),
        );
        inner.schedule_update_on_fiber(inner.host_root, lane, event_time)
    }

    /// Schedule `fiber` to re-render on `lane`.
    ///
    /// Entry point for event layers that track fibers themselves. A
    /// component whose props and state are unchanged still bails out.
    pub fn schedule_update(&self, fiber: FiberId, lane: Lane, event_time: Duration) -> Result<()> {
        self.inner.enqueue_update(fiber, lane, Box::new(|| {}));
        self.inner.schedule_update_on_fiber(fiber, lane, event_time)
    }

    /// Lane an update dispatched right now would get.
    #[must_use]
    pub fn request_update_lane(&self) -> Lane {
        self.inner.request_update_lane()
    }

    #[must_use]
    pub fn request_event_time(&self) -> Duration {
        self.inner.request_event_time()
    }

    /// Run `f` at discrete priority, then render and commit any synchronous
    /// work it produced before returning.
    pub fn flush_sync<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let value = self.inner.run_with_priority(EventPriority::Discrete, f);
        self.inner.flush_sync_callbacks()?;
        Ok(value)
    }

    /// Run `f` with `priority` as the ambient update priority.
    pub fn with_update_priority<R>(&self, priority: EventPriority, f: impl FnOnce() -> R) -> R {
        self.inner.run_with_priority(priority, f)
    }

    /// Run `f` so that the updates it dispatches share one transition lane.
    pub fn start_transition<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.run_in_transition(f)
    }

    /// Remove everything rendered, running every teardown.
    pub fn unmount(&self) -> Result<()> {
        self.flush_sync(|| self.render(Node::Empty))??;
        self.inner.flush_passive_effects()?;
        info!(target: "fibra.reconciler", "root unmounted");
        Ok(())
    }

    /// Run pending passive effects now. Returns whether any ran.
    pub fn flush_passive_effects(&self) -> Result<bool> {
        self.inner.flush_passive_effects()
    }

    /// Drain queued synchronous work.
    pub fn flush_sync_work(&self) -> Result<()> {
        self.inner.flush_sync_callbacks()
    }

    /// # Panics
    ///
    /// Panics if called from a component body or a layout effect, while the
    /// root is rendering or committing.
    pub fn with_host<R>(&self, f: impl FnOnce(&H) -> R) -> R {
        f(&self.inner.state.borrow().host)
    }

    /// # Panics
    ///
    /// Same as [`with_host`](Self::with_host).
    pub fn with_host_mut<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.inner.state.borrow_mut().host)
    }

    /// Inspect the fiber arena and the id of the committed root fiber.
    ///
    /// # Panics
    ///
    /// Same as [`with_host`](Self::with_host).
    pub fn with_tree<R>(&self, f: impl FnOnce(&FiberTree<H>, FiberId) -> R) -> R {
        let state = self.inner.state.borrow();
        f(&state.tree, state.current)
    }

    /// # Panics
    ///
    /// Same as [`with_host`](Self::with_host).
    #[must_use]
    pub fn container(&self) -> H::Instance {
        self.inner.state.borrow().container.clone()
    }

    #[must_use]
    pub fn stats(&self) -> RootStats {
        self.inner.stats()
    }

    /// Lanes with work not yet committed.
    #[must_use]
    pub fn pending_lanes(&self) -> Lanes {
        self.inner.lanes.borrow().pending
    }

    /// A pass has started (and possibly yielded) but not committed.
    #[must_use]
    pub fn is_render_in_progress(&self) -> bool {
        self.inner.has_work_in_progress()
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.inner.config
    }
}

impl<H: HostConfig> fmt::Debug for Root<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("mode", &self.inner.config.mode)
            .field("pending", &describe_lanes(self.pending_lanes()))
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
