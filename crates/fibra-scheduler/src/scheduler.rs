#![forbid(unsafe_code)]

//! Time-sliced cooperative task runner.
//!
//! Tasks are callbacks tagged with a [`PriorityLevel`]. Each one gets an
//! expiration time (`start + timeout(priority)`) and waits in a min-heap keyed
//! by `(expiration, id)`. The host loop calls
//! [`Scheduler::perform_work_until_deadline`] once per frame; it drains the
//! microtask queue, then runs tasks in heap order until the slice budget is
//! spent.
//!
//! # Key Invariants
//!
//! 1. **Expiration ordering**: among live tasks, the one with the smallest
//!    expiration runs first. Submission order only breaks ties.
//! 2. **Starvation escalation**: a task whose expiration has passed runs even
//!    when the slice is exhausted, and its callback sees `did_timeout = true`.
//! 3. **Continuations keep their slot**: a callback returning
//!    [`TaskStatus::Continue`] stays in the heap under the same id and
//!    expiration, and the slice ends so the host can paint.
//! 4. **Cancellation is lazy**: cancelling drops the callback; the heap entry
//!    is discarded when it reaches the top.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Callback returns `Err` | Task removed, error returned from the slice |
//! | Queue at `max_queue_size` | `schedule_callback` returns `QueueFull` |
//! | Cancel after completion | No-op, returns `false` |
//! | Task that always continues | `run_until_idle` never returns |

use std::cell::{Ref, RefCell, RefMut};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use ahash::AHashMap;
use tracing::{debug, debug_span, trace};

use crate::clock::{Clock, MonotonicClock};
use crate::config::SchedulerConfig;
use crate::error::{Result, TaskError};
use crate::priority::PriorityLevel;

/// A task body. Receives `did_timeout`: true when the task's expiration time
/// had already passed when it was invoked.
pub type TaskCallback = Box<dyn FnOnce(bool) -> TaskResult>;

/// What a task callback reports back.
pub type TaskResult = Result<TaskStatus>;

type Microtask = Box<dyn FnOnce() -> Result<()>>;

/// Outcome of one task invocation.
pub enum TaskStatus {
    /// The task is done and leaves the queue.
    Complete,
    /// The task yielded; the continuation replaces its callback.
    Continue(TaskCallback),
}

impl TaskStatus {
    /// Convenience constructor for [`TaskStatus::Continue`].
    pub fn continue_with(callback: impl FnOnce(bool) -> TaskResult + 'static) -> Self {
        Self::Continue(Box::new(callback))
    }
}

impl fmt::Debug for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("Complete"),
            Self::Continue(_) => f.write_str("Continue(..)"),
        }
    }
}

/// Handle returned by [`Scheduler::schedule_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: u64,
    priority: PriorityLevel,
}

impl TaskHandle {
    /// Unique task id (monotonic per scheduler).
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Priority the task was scheduled with.
    #[must_use]
    pub const fn priority(&self) -> PriorityLevel {
        self.priority
    }
}

/// Heap entry (max-heap, so ordering is reversed).
#[derive(Debug, Clone, Copy)]
struct QueuedTask {
    id: u64,
    priority: PriorityLevel,
    expiration: Duration,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest expiration first, then earliest submission.
        other
            .expiration
            .cmp(&self.expiration)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks accepted.
    pub total_scheduled: u64,

    /// Tasks whose callback returned `Complete`.
    pub total_completed: u64,

    /// Tasks cancelled before they finished.
    pub total_cancelled: u64,

    /// Tasks whose callback returned `Err`.
    pub total_failed: u64,

    /// Continuations returned by callbacks.
    pub total_continuations: u64,

    /// Tasks that ran past their expiration time.
    pub total_timed_out: u64,

    /// Calls to `perform_work_until_deadline`.
    pub total_slices: u64,

    /// Slices that ended because the budget ran out.
    pub total_yields: u64,

    /// Microtasks executed.
    pub total_microtasks: u64,
}

struct SchedulerState {
    heap: BinaryHeap<QueuedTask>,
    callbacks: AHashMap<u64, TaskCallback>,
    microtasks: VecDeque<Microtask>,
    next_id: u64,
    slice_start: Duration,
    current_priority: PriorityLevel,
    performing_work: bool,
    stats: SchedulerStats,
}

struct SchedulerInner {
    config: SchedulerConfig,
    clock: Box<dyn Clock>,
    state: RefCell<SchedulerState>,
}

/// Cooperative priority scheduler.
///
/// Cheap to clone; clones share one queue. Callbacks run with no internal
/// borrow held, so they may schedule, cancel, or query freely.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler driven by the wall clock.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, MonotonicClock::new())
    }

    /// Create a scheduler driven by a custom clock.
    pub fn with_clock(config: SchedulerConfig, clock: impl Clock + 'static) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                config,
                clock: Box::new(clock),
                state: RefCell::new(SchedulerState {
                    heap: BinaryHeap::new(),
                    callbacks: AHashMap::new(),
                    microtasks: VecDeque::new(),
                    next_id: 1,
                    slice_start: Duration::ZERO,
                    current_priority: PriorityLevel::Normal,
                    performing_work: false,
                    stats: SchedulerStats::default(),
                }),
            }),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Current clock reading.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Queue `callback` at `priority`.
    pub fn schedule_callback(
        &self,
        priority: PriorityLevel,
        callback: impl FnOnce(bool) -> TaskResult + 'static,
    ) -> Result<TaskHandle> {
        let now = self.now();
        let mut state = self.state_mut();
        if state.callbacks.len() >= self.inner.config.max_queue_size {
            return Err(TaskError::QueueFull {
                capacity: self.inner.config.max_queue_size,
            });
        }
        let expiration = match priority.timeout(&self.inner.config) {
            Some(timeout) => now + timeout,
            // Already expired: strictly before `now`.
            None => now.saturating_sub(Duration::from_millis(1)),
        };
        let id = state.next_id;
        state.next_id += 1;
        state.heap.push(QueuedTask {
            id,
            priority,
            expiration,
        });
        state.callbacks.insert(id, Box::new(callback));
        state.stats.total_scheduled += 1;
        trace!(
            target: "fibra.scheduler",
            task = id,
            priority = priority.as_str(),
            expiration_ms = expiration.as_millis() as u64,
            "task scheduled"
        );
        Ok(TaskHandle { id, priority })
    }

    /// Cancel a pending task. Returns `false` if it already finished.
    pub fn cancel_callback(&self, handle: &TaskHandle) -> bool {
        let mut state = self.state_mut();
        let removed = state.callbacks.remove(&handle.id).is_some();
        if removed {
            state.stats.total_cancelled += 1;
            trace!(target: "fibra.scheduler", task = handle.id, "task cancelled");
        }
        removed
    }

    /// Whether the task is still waiting to run (or to continue).
    #[must_use]
    pub fn is_pending(&self, handle: &TaskHandle) -> bool {
        self.state().callbacks.contains_key(&handle.id)
    }

    /// Number of live tasks.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.state().callbacks.len()
    }

    /// True once the current slice has used up its budget.
    #[must_use]
    pub fn should_yield(&self) -> bool {
        let start = self.state().slice_start;
        self.now().saturating_sub(start) >= self.inner.config.frame_interval
    }

    /// Priority of the task currently running (Normal outside a task).
    #[must_use]
    pub fn current_priority(&self) -> PriorityLevel {
        self.state().current_priority
    }

    /// Whether a slice is currently running.
    #[must_use]
    pub fn is_performing_work(&self) -> bool {
        self.state().performing_work
    }

    /// Queue a closure to run before the next task (or at the end of the
    /// current slice).
    pub fn queue_microtask(&self, microtask: impl FnOnce() -> Result<()> + 'static) {
        self.state_mut().microtasks.push_back(Box::new(microtask));
    }

    /// Run every queued microtask, including ones queued while draining.
    pub fn flush_microtasks(&self) -> Result<()> {
        loop {
            let next = self.state_mut().microtasks.pop_front();
            let Some(microtask) = next else {
                return Ok(());
            };
            self.state_mut().stats.total_microtasks += 1;
            microtask()?;
        }
    }

    /// Run one host slice. Returns `true` if tasks remain.
    pub fn perform_work_until_deadline(&self) -> Result<bool> {
        self.flush_microtasks()?;

        let start = self.now();
        {
            let mut state = self.state_mut();
            state.slice_start = start;
            state.performing_work = true;
            state.stats.total_slices += 1;
        }

        let span = debug_span!(
            target: "fibra.scheduler",
            "scheduler.slice",
            tasks_run = tracing::field::Empty,
        );
        let outcome = {
            let _guard = span.enter();
            self.work_loop(&span)
        };

        {
            let mut state = self.state_mut();
            state.performing_work = false;
            state.current_priority = PriorityLevel::Normal;
        }
        let has_more = outcome?;
        self.flush_microtasks()?;
        Ok(has_more || self.pending_tasks() > 0)
    }

    /// Run slices until no task or microtask remains.
    pub fn run_until_idle(&self) -> Result<()> {
        while self.perform_work_until_deadline()? {}
        Ok(())
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.state().stats.clone()
    }

    // --- Internal Methods ---

    fn state(&self) -> Ref<'_, SchedulerState> {
        self.inner.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, SchedulerState> {
        self.inner.state.borrow_mut()
    }

    /// Drop heap entries whose callback is gone and return the live top.
    fn peek_live(&self) -> Option<QueuedTask> {
        let mut state = self.state_mut();
        while let Some(top) = state.heap.peek().copied() {
            if state.callbacks.contains_key(&top.id) {
                return Some(top);
            }
            state.heap.pop();
        }
        None
    }

    fn pop_if_top(&self, id: u64) {
        let mut state = self.state_mut();
        if state.heap.peek().is_some_and(|top| top.id == id) {
            state.heap.pop();
        }
    }

    fn work_loop(&self, span: &tracing::Span) -> Result<bool> {
        let mut tasks_run = 0u64;
        let result = loop {
            let Some(task) = self.peek_live() else {
                break Ok(false);
            };
            let now = self.now();
            if task.expiration > now && self.should_yield() {
                self.state_mut().stats.total_yields += 1;
                debug!(target: "fibra.scheduler", task = task.id, "slice exhausted, yielding");
                break Ok(true);
            }

            let callback = {
                let mut state = self.state_mut();
                state.current_priority = task.priority;
                state.callbacks.remove(&task.id)
            };
            let Some(callback) = callback else {
                continue;
            };
            let did_timeout = task.expiration <= now;
            if did_timeout && task.priority != PriorityLevel::Immediate {
                self.state_mut().stats.total_timed_out += 1;
            }

            tasks_run += 1;
            match callback(did_timeout) {
                Ok(TaskStatus::Complete) => {
                    self.pop_if_top(task.id);
                    self.state_mut().stats.total_completed += 1;
                }
                Ok(TaskStatus::Continue(next)) => {
                    let mut state = self.state_mut();
                    state.callbacks.insert(task.id, next);
                    state.stats.total_continuations += 1;
                    break Ok(true);
                }
                Err(err) => {
                    self.pop_if_top(task.id);
                    self.state_mut().stats.total_failed += 1;
                    tracing::error!(target: "fibra.scheduler", task = task.id, error = %err, "task failed");
                    break Err(err);
                }
            }
        };
        span.record("tasks_run", tasks_run);
        result
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("pending", &state.callbacks.len())
            .field("microtasks", &state.microtasks.len())
            .field("stats", &state.stats)
            .finish()
    }
}
