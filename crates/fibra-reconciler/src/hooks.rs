//! Hooks: per-component state that survives re-renders.
//!
//! A component receives a [`HookCx`] each time it renders. Hooks are
//! identified by call order alone, so a component must call the same hooks
//! in the same order on every pass. The context is built in one of two
//! modes, chosen once per render: *mount* allocates fresh records, *update*
//! walks the records of the committed fiber and rejects any call whose kind
//! does not match the record at that position.
//!
//! State updates go through [`Dispatch`] handles. A handle never touches the
//! fiber tree directly; it hands the update to the owning root through the
//! [`UpdateSink`] seam, which decides when it is safe to splice it into the
//! hook's queue.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{error, trace, warn};

use crate::error::{HookError, HookKind, ReconcileError};
use crate::fiber::FiberId;
use crate::flags::{Flags, HookFlags};
use crate::lane::{Lane, Lanes, NO_LANES, merge_lanes};
use crate::update_queue::{Update, UpdateRing, rebase_updates};

/// Hook records of one fiber, shared by both buffers until one of them
/// renders again.
pub(crate) type HookList = Rc<RefCell<Vec<Hook>>>;

// ============================================================================
// Root seam
// ============================================================================

/// What a dispatcher needs from the root that owns its fiber.
pub(crate) trait UpdateSink {
    fn request_update_lane(&self) -> Lane;

    fn request_event_time(&self) -> Duration;

    /// No render is in flight and neither buffer of `fiber` has pending
    /// lanes, so an update can be evaluated eagerly.
    fn fiber_is_idle(&self, fiber: FiberId) -> bool;

    /// Stage `apply`, which splices an update into its queue, until the
    /// root reaches a point where queues may change.
    fn enqueue_update(&self, fiber: FiberId, lane: Lane, apply: Box<dyn FnOnce()>);

    fn schedule_update_on_fiber(
        &self,
        fiber: FiberId,
        lane: Lane,
        event_time: Duration,
    ) -> Result<(), ReconcileError>;

    fn record_eager_bailout(&self);
}

// ============================================================================
// Records
// ============================================================================

pub(crate) struct Hook {
    kind: HookKind,
    state: Box<dyn Any>,
}

impl Hook {
    fn new<T: 'static>(kind: HookKind, state: T) -> Self {
        Self {
            kind,
            state: Box::new(state),
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook({})", self.kind)
    }
}

type Reducer<S, A> = Rc<dyn Fn(&S, &A) -> S>;

/// Pending updates of one state hook plus what the dispatcher needs for an
/// eager comparison.
pub(crate) struct HookQueue<S, A> {
    pending: UpdateRing<Update<A>>,
    last_rendered_state: S,
    reducer: Reducer<S, A>,
}

struct ReducerHook<S, A> {
    memoized: S,
    base_state: S,
    base_queue: UpdateRing<Update<A>>,
    queue: Rc<RefCell<HookQueue<S, A>>>,
}

struct EffectHook {
    effect: Effect,
}

struct RefHook<T> {
    object: RefObject<T>,
}

struct MemoHook<T> {
    value: T,
    deps: Rc<dyn Deps>,
}

// ============================================================================
// Effects
// ============================================================================

/// Cleanup returned by an effect.
pub struct Teardown(Box<dyn FnOnce()>);

impl Teardown {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    pub(crate) fn run(self) {
        (self.0)();
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Teardown(..)")
    }
}

/// Return types accepted from an effect body.
pub trait IntoTeardown {
    fn into_teardown(self) -> Option<Teardown>;
}

impl IntoTeardown for () {
    fn into_teardown(self) -> Option<Teardown> {
        None
    }
}

impl IntoTeardown for Teardown {
    fn into_teardown(self) -> Option<Teardown> {
        Some(self)
    }
}

impl IntoTeardown for Option<Teardown> {
    fn into_teardown(self) -> Option<Teardown> {
        self
    }
}

/// Dependency list compared between renders.
pub(crate) trait Deps {
    fn as_any(&self) -> &dyn Any;
    fn same(&self, other: &dyn Deps) -> bool;
}

impl<T: PartialEq + 'static> Deps for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same(&self, other: &dyn Deps) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|other| other == self)
    }
}

type EffectCreate = Box<dyn FnOnce() -> Option<Teardown>>;

/// One effect registration of one render.
///
/// `inst` holds the teardown of the last setup and is shared by every
/// record of the same hook, so an unchanged record still finds it.
#[derive(Clone)]
pub(crate) struct Effect {
    pub(crate) tag: HookFlags,
    create: Rc<RefCell<Option<EffectCreate>>>,
    inst: Rc<RefCell<Option<Teardown>>>,
    deps: Option<Rc<dyn Deps>>,
}

impl Effect {
    pub(crate) fn matches(&self, flags: HookFlags) -> bool {
        self.tag.contains(flags)
    }

    pub(crate) fn run_teardown(&self) {
        let teardown = self.inst.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown.run();
        }
    }

    pub(crate) fn run_setup(&self) {
        let create = self.create.borrow_mut().take();
        if let Some(create) = create {
            let teardown = create();
            *self.inst.borrow_mut() = teardown;
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("tag", &self.tag)
            .field("has_deps", &self.deps.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Public handles
// ============================================================================

/// Argument of a [`StateSetter`]: a new value or a function of the old one.
pub enum SetStateAction<S> {
    Value(S),
    Fn(Rc<dyn Fn(&S) -> S>),
}

impl<S: Clone> Clone for SetStateAction<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Fn(f) => Self::Fn(Rc::clone(f)),
        }
    }
}

fn basic_state_reducer<S: Clone>(state: &S, action: &SetStateAction<S>) -> S {
    match action {
        SetStateAction::Value(value) => value.clone(),
        SetStateAction::Fn(f) => f(state),
    }
}

/// Sends actions to a state hook. Cheap to clone; clones feed the same
/// queue.
pub struct Dispatch<S, A> {
    fiber: FiberId,
    queue: Rc<RefCell<HookQueue<S, A>>>,
    sink: Weak<dyn UpdateSink>,
    eager: bool,
}

/// Setter returned by [`HookCx::use_state`].
pub type StateSetter<S> = Dispatch<S, SetStateAction<S>>;

impl<S, A> Clone for Dispatch<S, A> {
    fn clone(&self) -> Self {
        Self {
            fiber: self.fiber,
            queue: Rc::clone(&self.queue),
            sink: Weak::clone(&self.sink),
            eager: self.eager,
        }
    }
}

impl<S, A> PartialEq for Dispatch<S, A> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.queue, &other.queue)
    }
}

impl<S, A> fmt::Debug for Dispatch<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch").field("fiber", &self.fiber).finish()
    }
}

impl<S, A> Dispatch<S, A>
where
    S: Clone + PartialEq + 'static,
    A: Clone + 'static,
{
    /// Queue `action` at the current update lane.
    ///
    /// A state setter whose fiber is idle computes the next state right away;
    /// if it equals the last rendered state the update is queued without
    /// scheduling a render.
    pub fn dispatch(&self, action: A) {
        let Some(sink) = self.sink.upgrade() else {
            warn!(target: "fibra.hooks", fiber = ?self.fiber, "update dispatched after its root was dropped");
            return;
        };
        let lane = sink.request_update_lane();

        if self.eager
            && sink.fiber_is_idle(self.fiber)
            && let Ok(mut queue) = self.queue.try_borrow_mut()
        {
            let eager_state = (queue.reducer)(&queue.last_rendered_state, &action);
            if eager_state == queue.last_rendered_state {
                queue.pending.push(Update::new(lane, action));
                drop(queue);
                sink.record_eager_bailout();
                trace!(target: "fibra.hooks", fiber = ?self.fiber, lane, "eager bail-out");
                return;
            }
        }

        let queue = Rc::clone(&self.queue);
        let update = Update::new(lane, action);
        sink.enqueue_update(
            self.fiber,
            lane,
            Box::new(move || queue.borrow_mut().pending.push(update)),
        );
        let event_time = sink.request_event_time();
        if let Err(err) = sink.schedule_update_on_fiber(self.fiber, lane, event_time) {
            error!(target: "fibra.hooks", fiber = ?self.fiber, error = %err, "failed to schedule update");
        }
    }
}

impl<S> Dispatch<S, SetStateAction<S>>
where
    S: Clone + PartialEq + 'static,
{
    pub fn set(&self, value: S) {
        self.dispatch(SetStateAction::Value(value));
    }

    pub fn update(&self, f: impl Fn(&S) -> S + 'static) {
        self.dispatch(SetStateAction::Fn(Rc::new(f)));
    }
}

/// Mutable cell that persists across renders without triggering them.
pub struct RefObject<T>(Rc<RefCell<T>>);

impl<T> Clone for RefObject<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> RefObject<T> {
    pub fn set(&self, value: T) {
        *self.0.borrow_mut() = value;
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.borrow())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

impl<T: Clone> RefObject<T> {
    #[must_use]
    pub fn get(&self) -> T {
        self.0.borrow().clone()
    }
}

impl<T> PartialEq for RefObject<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: fmt::Debug> fmt::Debug for RefObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefObject").field(&self.0.borrow()).finish()
    }
}

// ============================================================================
// HookCx
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatcher {
    Mount,
    Update,
}

/// Everything a component render produced besides its children.
pub(crate) struct RenderedHooks {
    pub(crate) hooks: Vec<Hook>,
    pub(crate) effects: Vec<Effect>,
    pub(crate) flags: Flags,
    pub(crate) skipped_lanes: Lanes,
    pub(crate) did_receive_update: bool,
}

/// Render context handed to a component body.
pub struct HookCx {
    fiber: FiberId,
    dispatcher: Dispatcher,
    prev: Vec<Hook>,
    next: Vec<Hook>,
    index: usize,
    effects: Vec<Effect>,
    flags: Flags,
    sink: Weak<dyn UpdateSink>,
    render_lanes: Lanes,
    skipped_lanes: Lanes,
    did_receive_update: bool,
    error: Option<HookError>,
}

impl HookCx {
    /// `committed` says whether the fiber has rendered and committed
    /// before; `prev` holds the records of that render, possibly none.
    pub(crate) fn new(
        fiber: FiberId,
        committed: bool,
        prev: Vec<Hook>,
        sink: Weak<dyn UpdateSink>,
        render_lanes: Lanes,
        did_receive_update: bool,
    ) -> Self {
        let dispatcher = if committed {
            Dispatcher::Update
        } else {
            Dispatcher::Mount
        };
        Self {
            fiber,
            dispatcher,
            next: Vec::with_capacity(prev.len()),
            prev,
            index: 0,
            effects: Vec::new(),
            flags: Flags::empty(),
            sink,
            render_lanes,
            skipped_lanes: NO_LANES,
            did_receive_update,
            error: None,
        }
    }

    /// Lanes of the pass this render belongs to.
    #[must_use]
    pub fn render_lanes(&self) -> Lanes {
        self.render_lanes
    }

    /// Whether this is the component's first render.
    #[must_use]
    pub fn is_mount(&self) -> bool {
        self.dispatcher == Dispatcher::Mount
    }

    /// Local state with an eager-comparing setter.
    pub fn use_state<S>(
        &mut self,
        init: impl FnOnce() -> S,
    ) -> Result<(S, StateSetter<S>), HookError>
    where
        S: Clone + PartialEq + 'static,
    {
        self.reducer_hook(HookKind::State, Rc::new(basic_state_reducer), init, true)
    }

    /// Local state driven by `reducer`.
    pub fn use_reducer<S, A>(
        &mut self,
        reducer: impl Fn(&S, &A) -> S + 'static,
        init: impl FnOnce() -> S,
    ) -> Result<(S, Dispatch<S, A>), HookError>
    where
        S: Clone + PartialEq + 'static,
        A: Clone + 'static,
    {
        self.reducer_hook(HookKind::Reducer, Rc::new(reducer), init, false)
    }

    /// Passive effect that re-runs after every commit.
    pub fn use_effect<R: IntoTeardown>(
        &mut self,
        create: impl FnOnce() -> R + 'static,
    ) -> Result<(), HookError> {
        self.effect_hook(HookKind::Effect, None, boxed_create(create))
    }

    /// Passive effect that re-runs when `deps` changes.
    pub fn use_effect_with<D, R>(
        &mut self,
        deps: D,
        create: impl FnOnce() -> R + 'static,
    ) -> Result<(), HookError>
    where
        D: PartialEq + 'static,
        R: IntoTeardown,
    {
        self.effect_hook(HookKind::Effect, Some(Rc::new(deps)), boxed_create(create))
    }

    /// Layout effect that re-runs after every commit.
    pub fn use_layout_effect<R: IntoTeardown>(
        &mut self,
        create: impl FnOnce() -> R + 'static,
    ) -> Result<(), HookError> {
        self.effect_hook(HookKind::LayoutEffect, None, boxed_create(create))
    }

    /// Layout effect that re-runs when `deps` changes.
    pub fn use_layout_effect_with<D, R>(
        &mut self,
        deps: D,
        create: impl FnOnce() -> R + 'static,
    ) -> Result<(), HookError>
    where
        D: PartialEq + 'static,
        R: IntoTeardown,
    {
        self.effect_hook(
            HookKind::LayoutEffect,
            Some(Rc::new(deps)),
            boxed_create(create),
        )
    }

    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Result<RefObject<T>, HookError> {
        let object = match self.prev_slot(HookKind::Ref)? {
            None => RefObject(Rc::new(RefCell::new(init()))),
            Some(index) => self.prev_state::<RefHook<T>>(index)?.object.clone(),
        };
        self.next.push(Hook::new(
            HookKind::Ref,
            RefHook {
                object: object.clone(),
            },
        ));
        Ok(object)
    }

    /// Cached `compute(&deps)`, recomputed when `deps` changes.
    pub fn use_memo<T, D>(&mut self, deps: D, compute: impl FnOnce(&D) -> T) -> Result<T, HookError>
    where
        T: Clone + 'static,
        D: PartialEq + 'static,
    {
        let cached = match self.prev_slot(HookKind::Memo)? {
            None => None,
            Some(index) => {
                let prev = self.prev_state::<MemoHook<T>>(index)?;
                prev.deps
                    .same(&deps)
                    .then(|| (prev.value.clone(), Rc::clone(&prev.deps)))
            }
        };
        let (value, deps) = match cached {
            Some(hit) => hit,
            None => {
                let value = compute(&deps);
                (value, Rc::new(deps) as Rc<dyn Deps>)
            }
        };
        self.next.push(Hook::new(
            HookKind::Memo,
            MemoHook {
                value: value.clone(),
                deps,
            },
        ));
        Ok(value)
    }

    // --- Internal Methods ---

    fn fail(&mut self, err: HookError) -> HookError {
        if self.error.is_none() {
            self.error = Some(err.clone());
        }
        err
    }

    /// Advance the cursor. `Some(index)` points at the committed record to
    /// update from; `None` means mount.
    fn prev_slot(&mut self, kind: HookKind) -> Result<Option<usize>, HookError> {
        let index = self.index;
        self.index += 1;
        if self.dispatcher == Dispatcher::Mount {
            return Ok(None);
        }
        match self.prev.get(index).map(|hook| hook.kind) {
            None => Err(self.fail(HookError::TooMany { index })),
            Some(expected) if expected != kind => Err(self.fail(HookError::KindMismatch {
                index,
                expected,
                found: kind,
            })),
            Some(_) => Ok(Some(index)),
        }
    }

    fn prev_state<T: 'static>(&mut self, index: usize) -> Result<&mut T, HookError> {
        if !self.prev[index].state.is::<T>() {
            return Err(self.fail(HookError::StateTypeMismatch { index }));
        }
        self.prev[index]
            .state
            .downcast_mut::<T>()
            .ok_or(HookError::StateTypeMismatch { index })
    }

    fn reducer_hook<S, A>(
        &mut self,
        kind: HookKind,
        reducer: Reducer<S, A>,
        init: impl FnOnce() -> S,
        eager: bool,
    ) -> Result<(S, Dispatch<S, A>), HookError>
    where
        S: Clone + PartialEq + 'static,
        A: Clone + 'static,
    {
        let hook = match self.prev_slot(kind)? {
            None => {
                let initial = init();
                ReducerHook {
                    memoized: initial.clone(),
                    base_state: initial.clone(),
                    base_queue: UpdateRing::new(),
                    queue: Rc::new(RefCell::new(HookQueue {
                        pending: UpdateRing::new(),
                        last_rendered_state: initial,
                        reducer,
                    })),
                }
            }
            Some(index) => {
                let render_lanes = self.render_lanes;
                let prev = self.prev_state::<ReducerHook<S, A>>(index)?;
                let queue = Rc::clone(&prev.queue);

                // Pending updates join the committed record's base queue too,
                // so they survive if this pass is thrown away.
                let pending = queue.borrow_mut().pending.take();
                prev.base_queue.append(&pending);

                let processed = rebase_updates(
                    prev.base_state.clone(),
                    &prev.base_queue,
                    render_lanes,
                    |state, action| reducer(state, action),
                );
                let changed = processed.new_state != prev.memoized;
                {
                    let mut queue = queue.borrow_mut();
                    queue.last_rendered_state = processed.new_state.clone();
                    queue.reducer = reducer;
                }
                if changed {
                    self.did_receive_update = true;
                }
                self.skipped_lanes = merge_lanes(self.skipped_lanes, processed.skipped_lanes);
                ReducerHook {
                    memoized: processed.new_state,
                    base_state: processed.base_state,
                    base_queue: processed.base_queue,
                    queue,
                }
            }
        };

        let state = hook.memoized.clone();
        let dispatch = Dispatch {
            fiber: self.fiber,
            queue: Rc::clone(&hook.queue),
            sink: Weak::clone(&self.sink),
            eager,
        };
        self.next.push(Hook::new(kind, hook));
        Ok((state, dispatch))
    }

    fn effect_hook(
        &mut self,
        kind: HookKind,
        deps: Option<Rc<dyn Deps>>,
        create: EffectCreate,
    ) -> Result<(), HookError> {
        let (fiber_flag, hook_flag) = match kind {
            HookKind::LayoutEffect => (Flags::UPDATE, HookFlags::LAYOUT),
            _ => (Flags::PASSIVE, HookFlags::PASSIVE),
        };
        let (inst, tag) = match self.prev_slot(kind)? {
            None => (Rc::new(RefCell::new(None)), HookFlags::HAS_EFFECT | hook_flag),
            Some(index) => {
                let prev = &self.prev_state::<EffectHook>(index)?.effect;
                let unchanged = match (&deps, &prev.deps) {
                    (Some(next), Some(prev)) => next.same(prev.as_ref()),
                    _ => false,
                };
                let tag = if unchanged {
                    hook_flag
                } else {
                    HookFlags::HAS_EFFECT | hook_flag
                };
                (Rc::clone(&prev.inst), tag)
            }
        };
        if tag.contains(HookFlags::HAS_EFFECT) {
            self.flags |= fiber_flag;
        }
        let effect = Effect {
            tag,
            create: Rc::new(RefCell::new(Some(create))),
            inst,
            deps,
        };
        self.effects.push(effect.clone());
        self.next.push(Hook::new(kind, EffectHook { effect }));
        Ok(())
    }

    /// Close the render. Returns the outcome and the committed records so
    /// the caller can put them back on the current fiber.
    pub(crate) fn finish(self) -> (Result<RenderedHooks, HookError>, Vec<Hook>) {
        let outcome = if let Some(err) = self.error {
            Err(err)
        } else if self.dispatcher == Dispatcher::Update && self.index < self.prev.len() {
            Err(HookError::TooFew {
                expected: self.prev.len(),
                found: self.index,
            })
        } else {
            Ok(RenderedHooks {
                hooks: self.next,
                effects: self.effects,
                flags: self.flags,
                skipped_lanes: self.skipped_lanes,
                did_receive_update: self.did_receive_update,
            })
        };
        (outcome, self.prev)
    }
}

impl fmt::Debug for HookCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookCx")
            .field("fiber", &self.fiber)
            .field("dispatcher", &self.dispatcher)
            .field("index", &self.index)
            .field("render_lanes", &self.render_lanes)
            .finish_non_exhaustive()
    }
}

fn boxed_create<R: IntoTeardown>(create: impl FnOnce() -> R + 'static) -> EffectCreate {
    Box::new(move || create().into_teardown())
}
