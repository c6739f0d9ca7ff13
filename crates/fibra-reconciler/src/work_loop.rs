//! Root scheduling and the render loop.
//!
//! [`RootInner`] is the shared state behind a [`Root`](crate::Root). It
//! owns the fiber arena and the host behind one `RefCell` ([`RootState`]),
//! which is mutably borrowed for the whole of a render slice or a commit.
//! While that borrow is held the root is *busy*: updates dispatched from
//! component bodies or layout effects are staged and only spliced into
//! their queues once the borrow is released.
//!
//! Scheduling follows one rule: after anything changes the pending lanes,
//! [`RootInner::ensure_root_is_scheduled`] looks at the most urgent lanes
//! and makes sure exactly one callback exists for them. Sync lanes go on
//! the root's sync queue, drained from a scheduler microtask; every other
//! lane becomes a scheduler task at the matching priority. A task that
//! finds the root's callback replaced by a newer one exits without work.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use fibra_scheduler::{Scheduler, TaskCallback, TaskError, TaskHandle, TaskResult, TaskStatus};
use tracing::{debug, debug_span, error, trace, warn};

use crate::commit_work::PendingPassive;
use crate::concurrent_updates::{ConcurrentUpdate, mark_update_lane_from_fiber_to_root};
use crate::config::{ReconcilerConfig, RootMode};
use crate::error::{ReconcileError, Result};
use crate::event_priority::{EventPriority, lanes_to_event_priority};
use crate::fiber::{FiberId, FiberProps, FiberTree};
use crate::hooks::UpdateSink;
use crate::host::HostConfig;
use crate::lane::{
    Lane, LaneTimeouts, Lanes, NO_LANE, NO_LANES, RootLanes, SYNC_LANE, describe_lanes,
    get_highest_priority_lane, includes_blocking_lane, includes_sync_lane,
};
use crate::root::RootStats;
use crate::sync_queue::SyncQueue;
use crate::update_queue::{HostRootState, SharedRing, StatePayload};

/// How a render slice ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RootExit {
    Completed,
    Yielded,
}

// ============================================================================
// RootState
// ============================================================================

/// Everything a render or commit mutates.
pub(crate) struct RootState<H: HostConfig> {
    pub(crate) host: H,
    pub(crate) tree: FiberTree<H>,
    pub(crate) container: H::Instance,
    /// Root fiber of the committed tree.
    pub(crate) current: FiberId,
    /// Root fiber of the tree being built, kept until it commits.
    pub(crate) wip_root: Option<FiberId>,
    /// Next unit of work; `None` once the pass has completed.
    pub(crate) wip: Option<FiberId>,
    pub(crate) wip_lanes: Lanes,
    /// Fibers that went through `begin_work` this pass.
    pub(crate) rendered: Vec<FiberId>,
}

impl<H: HostConfig> RootState<H> {
    fn perform_unit_of_work(
        &mut self,
        unit: FiberId,
        lanes: Lanes,
        sink: &Weak<dyn UpdateSink>,
    ) -> Result<()> {
        let next = self.begin_work(unit, lanes, sink)?;
        self.rendered.push(unit);
        let fiber = &mut self.tree[unit];
        fiber.memoized_props = fiber.pending_props.clone();
        match next {
            Some(child) => self.wip = Some(child),
            None => self.complete_unit_of_work(unit)?,
        }
        Ok(())
    }

    /// Complete `unit` and every ancestor whose children are all done, then
    /// point `wip` at the next sibling to begin (or `None` at the root).
    fn complete_unit_of_work(&mut self, unit: FiberId) -> Result<()> {
        let mut completed = unit;
        loop {
            self.complete_work(completed)?;
            if Some(completed) == self.wip_root {
                self.wip = None;
                return Ok(());
            }
            if let Some(sibling) = self.tree[completed].sibling {
                self.wip = Some(sibling);
                return Ok(());
            }
            match self.tree[completed].return_ {
                Some(parent) => completed = parent,
                None => {
                    self.wip = None;
                    return Ok(());
                }
            }
        }
    }

    fn trace_finished_work(&self, fiber: FiberId, depth: usize) {
        let node = &self.tree[fiber];
        if !node.flags.is_empty() {
            trace!(
                target: "fibra.reconciler",
                depth,
                tag = node.tag.as_str(),
                ty = node.ty.name(),
                flags = ?node.flags,
                "finished work"
            );
        }
        if node.subtree_flags.is_empty() {
            return;
        }
        for child in self.tree.children(fiber) {
            self.trace_finished_work(child, depth + 1);
        }
    }
}

// ============================================================================
// RootInner
// ============================================================================

/// Shared state of one root container.
pub(crate) struct RootInner<H: HostConfig> {
    this: Weak<Self>,
    pub(crate) scheduler: Scheduler,
    pub(crate) config: ReconcilerConfig,
    timeouts: LaneTimeouts,
    pub(crate) state: RefCell<RootState<H>>,
    pub(crate) lanes: RefCell<RootLanes>,
    staged: RefCell<Vec<ConcurrentUpdate>>,
    /// Lanes updated while a pass was in flight.
    pub(crate) interleaved: Cell<Lanes>,
    /// Lanes of the pass in flight, readable while `state` is borrowed.
    render_lanes: Cell<Lanes>,
    callback_node: Cell<Option<TaskHandle>>,
    callback_lane: Cell<Lane>,
    /// Bumped whenever the scheduled callback is replaced or dropped.
    callback_epoch: Cell<u64>,
    pub(crate) update_priority: Cell<Option<EventPriority>>,
    pub(crate) in_transition: Cell<bool>,
    pub(crate) transition_lane: Cell<Lane>,
    sync_queue: SyncQueue,
    pub(crate) passive: RefCell<Option<PendingPassive>>,
    pub(crate) nested_updates: Cell<u32>,
    stats: Cell<RootStats>,
    pub(crate) root_queue: SharedRing<StatePayload<HostRootState>>,
    pub(crate) host_root: FiberId,
}

impl<H: HostConfig> RootInner<H> {
    pub(crate) fn new(
        host: H,
        container: H::Instance,
        scheduler: Scheduler,
        config: ReconcilerConfig,
    ) -> Rc<Self> {
        let mut tree = FiberTree::new();
        let host_root = tree.create_host_root();
        let root_queue = tree[host_root]
            .root_queue_mut()
            .map(|queue| Rc::clone(&queue.shared))
            .unwrap_or_default();
        let timeouts = config.lane_timeouts();
        Rc::new_cyclic(|this| Self {
            this: Weak::clone(this),
            scheduler,
            config,
            timeouts,
            state: RefCell::new(RootState {
                host,
                tree,
                container,
                current: host_root,
                wip_root: None,
                wip: None,
                wip_lanes: NO_LANES,
                rendered: Vec::new(),
            }),
            lanes: RefCell::new(RootLanes::default()),
            staged: RefCell::new(Vec::new()),
            interleaved: Cell::new(NO_LANES),
            render_lanes: Cell::new(NO_LANES),
            callback_node: Cell::new(None),
            callback_lane: Cell::new(NO_LANE),
            callback_epoch: Cell::new(0),
            update_priority: Cell::new(None),
            in_transition: Cell::new(false),
            transition_lane: Cell::new(NO_LANE),
            sync_queue: SyncQueue::new(),
            passive: RefCell::new(None),
            nested_updates: Cell::new(0),
            stats: Cell::new(RootStats::default()),
            root_queue,
            host_root,
        })
    }

    pub(crate) fn weak(&self) -> Weak<Self> {
        Weak::clone(&self.this)
    }

    /// A render slice or commit holds the state borrow.
    pub(crate) fn is_busy(&self) -> bool {
        self.state.try_borrow_mut().is_err()
    }

    /// A pass has started and not yet committed.
    pub(crate) fn has_work_in_progress(&self) -> bool {
        self.render_lanes.get() != NO_LANES
    }

    pub(crate) fn stats(&self) -> RootStats {
        self.stats.get()
    }

    pub(crate) fn record(&self, f: impl FnOnce(&mut RootStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    // --- Queueing ---

    /// Splice every staged update into its queue and mark its lane up to
    /// the root.
    pub(crate) fn finish_queueing(&self, state: &mut RootState<H>) {
        let staged = std::mem::take(&mut *self.staged.borrow_mut());
        for ConcurrentUpdate { fiber, lane, apply } in staged {
            apply();
            if mark_update_lane_from_fiber_to_root(&mut state.tree, fiber, lane).is_none() {
                warn!(target: "fibra.reconciler", ?fiber, lane, "update on an unmounted component");
            }
        }
    }

    // --- Scheduling ---

    /// Make sure exactly one callback exists for the most urgent pending
    /// lanes, replacing a callback of a different priority.
    pub(crate) fn ensure_root_is_scheduled(&self) -> Result<()> {
        let next = {
            let mut lanes = self.lanes.borrow_mut();
            lanes.mark_starved_lanes_as_expired(self.scheduler.now(), &self.timeouts);
            lanes.next_lanes(self.render_lanes.get())
        };
        if next == NO_LANES {
            self.clear_callback();
            return Ok(());
        }

        let priority = get_highest_priority_lane(next);
        if priority == self.callback_lane.get() {
            return Ok(());
        }
        self.clear_callback();
        let epoch = self.callback_epoch.get();

        if includes_sync_lane(priority) {
            let root = self.weak();
            self.sync_queue.push(move || match root.upgrade() {
                Some(root) => root.perform_sync_work_on_root(),
                None => Ok(()),
            });
            let root = self.weak();
            self.scheduler.queue_microtask(move || match root.upgrade() {
                Some(root) => root.flush_sync_callbacks().map_err(TaskError::new),
                None => Ok(()),
            });
        } else {
            let level = lanes_to_event_priority(next).scheduler_priority();
            let handle = self
                .scheduler
                .schedule_callback(level, concurrent_task(self.weak(), epoch))?;
            self.callback_node.set(Some(handle));
        }
        self.callback_lane.set(priority);
        debug!(
            target: "fibra.reconciler",
            lanes = %describe_lanes(next),
            epoch,
            "root scheduled"
        );
        Ok(())
    }

    /// Drop the scheduled callback, cancelling its task if it has one.
    pub(crate) fn clear_callback(&self) {
        if let Some(handle) = self.callback_node.take()
            && self.scheduler.cancel_callback(&handle)
        {
            debug!(target: "fibra.reconciler", task = handle.id(), "render callback cancelled");
        }
        self.callback_lane.set(NO_LANE);
        self.callback_epoch.set(self.callback_epoch.get() + 1);
    }

    /// Drain the sync queue at discrete priority. Skipped while busy; the
    /// commit in flight drains it when it finishes.
    pub(crate) fn flush_sync_callbacks(&self) -> Result<()> {
        if self.is_busy() {
            return Ok(());
        }
        let previous = self.update_priority.replace(Some(EventPriority::Discrete));
        let outcome = self.sync_queue.flush();
        self.update_priority.set(previous);
        outcome.map(drop)
    }

    // --- Entry points ---

    fn perform_concurrent_work(&self, epoch: u64, did_timeout: bool) -> TaskResult {
        if epoch != self.callback_epoch.get() {
            return Ok(TaskStatus::Complete);
        }
        if self.is_busy() {
            self.clear_callback();
            return Ok(TaskStatus::Complete);
        }
        self.flush_passive_effects().map_err(TaskError::new)?;
        if epoch != self.callback_epoch.get() {
            return Ok(TaskStatus::Complete);
        }

        let (lanes, expired) = {
            let root_lanes = self.lanes.borrow();
            let lanes = root_lanes.next_lanes(self.render_lanes.get());
            (lanes, root_lanes.includes_expired_lane(lanes))
        };
        if lanes == NO_LANES {
            self.clear_callback();
            return Ok(TaskStatus::Complete);
        }
        let time_slice = self.config.mode == RootMode::Concurrent
            && !includes_sync_lane(lanes)
            && !did_timeout
            && !expired
            && (self.config.time_slice_default_lanes || !includes_blocking_lane(lanes));

        self.perform_work(lanes, time_slice).map_err(TaskError::new)?;
        self.ensure_root_is_scheduled().map_err(TaskError::new)?;
        if epoch == self.callback_epoch.get() {
            Ok(TaskStatus::Continue(concurrent_task(self.weak(), epoch)))
        } else {
            Ok(TaskStatus::Complete)
        }
    }

    fn perform_sync_work_on_root(&self) -> Result<()> {
        let limit = self.config.nested_update_limit;
        if self.nested_updates.get() > limit {
            self.nested_updates.set(0);
            self.clear_callback();
            error!(target: "fibra.reconciler", limit, "maximum update depth exceeded");
            return Err(ReconcileError::NestedUpdateLimit { limit });
        }
        self.flush_passive_effects()?;
        let lanes = self.lanes.borrow().next_lanes(NO_LANES);
        if !includes_sync_lane(lanes) {
            return self.ensure_root_is_scheduled();
        }
        self.perform_work(lanes, false)?;
        self.ensure_root_is_scheduled()
    }

    /// Render `lanes` and commit if the pass completes.
    fn perform_work(&self, lanes: Lanes, time_slice: bool) -> Result<()> {
        {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                return Ok(());
            };
            let exit = match self.render_root(&mut state, lanes, time_slice) {
                Ok(exit) => exit,
                Err(err) => {
                    self.discard_work(&mut state);
                    self.clear_callback();
                    error!(target: "fibra.reconciler", error = %err, "render failed");
                    return Err(err);
                }
            };
            if exit == RootExit::Yielded {
                return Ok(());
            }
            self.finish_queueing(&mut state);
            if let Err(err) = self.commit_root(&mut state, lanes) {
                self.discard_work(&mut state);
                self.clear_callback();
                error!(target: "fibra.commit", error = %err, "commit failed");
                return Err(err);
            }
        }
        self.after_commit(lanes)
    }

    fn after_commit(&self, lanes: Lanes) -> Result<()> {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            self.finish_queueing(&mut state);
        }
        self.ensure_root_is_scheduled()?;
        if includes_sync_lane(lanes) && self.config.mode == RootMode::Concurrent {
            self.flush_passive_effects()?;
        }
        self.flush_sync_callbacks()
    }

    // --- Render ---

    fn render_root(&self, state: &mut RootState<H>, lanes: Lanes, time_slice: bool) -> Result<RootExit> {
        if state.wip_root.is_none() || state.wip_lanes != lanes {
            self.prepare_fresh_stack(state, lanes);
        }

        let span = debug_span!(
            target: "fibra.reconciler",
            "fibra.render",
            lanes = %describe_lanes(lanes),
            mode = self.config.mode.as_str(),
            units = tracing::field::Empty,
        );
        let _guard = span.enter();

        let sink: Weak<dyn UpdateSink> = self.weak();
        let units_before = state.rendered.len();
        let exit = loop {
            let Some(unit) = state.wip else {
                break RootExit::Completed;
            };
            if time_slice && self.scheduler.should_yield() {
                break RootExit::Yielded;
            }
            state.perform_unit_of_work(unit, lanes, &sink)?;
        };
        span.record("units", state.rendered.len() - units_before);

        match exit {
            RootExit::Yielded => {
                self.record(|s| s.yields += 1);
                debug!(target: "fibra.reconciler", "render yielded");
            }
            RootExit::Completed => {
                self.render_lanes.set(NO_LANES);
                self.record(|s| s.renders += 1);
                debug!(target: "fibra.reconciler", "render complete");
                if self.config.trace_finished_work
                    && let Some(root) = state.wip_root
                {
                    state.trace_finished_work(root, 0);
                }
            }
        }
        Ok(exit)
    }

    fn prepare_fresh_stack(&self, state: &mut RootState<H>, lanes: Lanes) {
        if state.wip_root.is_some() {
            self.record(|s| s.restarts += 1);
            debug!(
                target: "fibra.reconciler",
                from = %describe_lanes(state.wip_lanes),
                to = %describe_lanes(lanes),
                "discarding interrupted render"
            );
            self.discard_work(state);
        }
        self.interleaved.set(NO_LANES);
        let root = state.tree.create_work_in_progress(state.current, FiberProps::None);
        state.wip_root = Some(root);
        state.wip = Some(root);
        state.wip_lanes = lanes;
        self.render_lanes.set(lanes);
        self.finish_queueing(state);
    }

    /// Throw away the pass in flight and release the fibers only it used.
    fn discard_work(&self, state: &mut RootState<H>) {
        state.wip = None;
        state.wip_root = None;
        state.wip_lanes = NO_LANES;
        state.rendered.clear();
        self.render_lanes.set(NO_LANES);
        let freed = state.tree.collect_garbage(state.current);
        self.record(|s| s.fibers_freed += freed as u64);
    }

    // --- Transitions ---

    pub(crate) fn run_in_transition<R>(&self, f: impl FnOnce() -> R) -> R {
        let was_in_transition = self.in_transition.replace(true);
        let previous_lane = self.transition_lane.replace(NO_LANE);
        let value = f();
        self.in_transition.set(was_in_transition);
        self.transition_lane.set(previous_lane);
        value
    }

    pub(crate) fn run_with_priority<R>(&self, priority: EventPriority, f: impl FnOnce() -> R) -> R {
        let previous = self.update_priority.replace(Some(priority));
        let value = f();
        self.update_priority.set(previous);
        value
    }
}

impl<H: HostConfig> UpdateSink for RootInner<H> {
    fn request_update_lane(&self) -> Lane {
        if self.config.mode == RootMode::Sync {
            return SYNC_LANE;
        }
        if self.in_transition.get() {
            if self.transition_lane.get() == NO_LANE {
                let lane = self.lanes.borrow_mut().claim_next_transition_lane();
                self.transition_lane.set(lane);
            }
            return self.transition_lane.get();
        }
        let priority = self.update_priority.get().unwrap_or_else(|| {
            self.state
                .try_borrow()
                .map_or(EventPriority::Default, |state| state.host.current_event_priority())
        });
        priority.lane()
    }

    fn request_event_time(&self) -> Duration {
        self.scheduler.now()
    }

    fn fiber_is_idle(&self, fiber: FiberId) -> bool {
        let Ok(state) = self.state.try_borrow() else {
            return false;
        };
        if self.has_work_in_progress() {
            return false;
        }
        let Some(node) = state.tree.get(fiber) else {
            return false;
        };
        node.lanes == NO_LANES
            && state
                .tree
                .alternate_of(fiber)
                .is_none_or(|alt| state.tree[alt].lanes == NO_LANES)
    }

    fn enqueue_update(&self, fiber: FiberId, lane: Lane, apply: Box<dyn FnOnce()>) {
        self.staged
            .borrow_mut()
            .push(ConcurrentUpdate { fiber, lane, apply });
    }

    fn schedule_update_on_fiber(&self, fiber: FiberId, lane: Lane, event_time: Duration) -> Result<()> {
        self.lanes.borrow_mut().mark_updated(lane);
        match self.state.try_borrow_mut() {
            Ok(mut state) if state.wip_root.is_none() => self.finish_queueing(&mut state),
            _ => self.interleaved.set(self.interleaved.get() | lane),
        }
        trace!(
            target: "fibra.reconciler",
            ?fiber,
            lane = %describe_lanes(lane),
            event_time_ms = event_time.as_millis() as u64,
            "update scheduled"
        );
        self.ensure_root_is_scheduled()
    }

    fn record_eager_bailout(&self) {
        self.record(|s| s.eager_bailouts += 1);
    }
}

/// Scheduler task for a concurrent pass, bound to the callback epoch it was
/// scheduled under.
fn concurrent_task<H: HostConfig>(root: Weak<RootInner<H>>, epoch: u64) -> TaskCallback {
    Box::new(move |did_timeout| match root.upgrade() {
        Some(root) => root.perform_concurrent_work(epoch, did_timeout),
        None => Ok(TaskStatus::Complete),
    })
}
