//! The double-buffered fiber arena.
//!
//! Every fiber lives in a [`SlotMap`] and is addressed by a [`FiberId`].
//! A logical node has at most two fibers, the committed one and the one
//! being built, linked through `alternate`. Starting a new pass on a node
//! reuses its alternate slot instead of allocating, so steady-state renders
//! do not grow the arena.
//!
//! `child` owns the first child; `sibling` and `return_` are traversal links
//! only. Ids are generational, so a handle to a freed fiber (for example a
//! state setter of an unmounted component) simply stops resolving.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use ahash::AHashSet;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::element::{Component, Element, ElementType, HostRef, Key, Props};
use crate::flags::Flags;
use crate::hooks::{Effect, HookList};
use crate::host::HostConfig;
use crate::lane::{Lanes, NO_LANES};
use crate::update_queue::{HostRootState, UpdateQueue};

slotmap::new_key_type! {
    /// Stable handle to a fiber slot.
    pub struct FiberId;
}

// ============================================================================
// Fiber kinds
// ============================================================================

/// What kind of node a fiber is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkTag {
    HostRoot,
    HostComponent,
    HostText,
    FunctionComponent,
    /// A component that has never rendered; becomes
    /// [`WorkTag::FunctionComponent`] after its first pass.
    IndeterminateComponent,
}

impl WorkTag {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HostRoot => "host_root",
            Self::HostComponent => "host_component",
            Self::HostText => "host_text",
            Self::FunctionComponent => "function_component",
            Self::IndeterminateComponent => "indeterminate_component",
        }
    }

    /// Fibers that own a host instance.
    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, Self::HostComponent | Self::HostText)
    }
}

/// External type reference of a fiber.
#[derive(Clone, PartialEq)]
pub enum FiberType {
    Root,
    Host(Rc<str>),
    Text,
    Component(Component),
}

impl FiberType {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Root => "#root",
            Self::Host(tag) => tag,
            Self::Text => "#text",
            Self::Component(component) => component.name(),
        }
    }

    /// Whether an element of type `ty` can reuse a fiber of this type.
    #[must_use]
    pub fn matches(&self, ty: &ElementType) -> bool {
        match (self, ty) {
            (Self::Host(a), ElementType::Host(b)) => a == b,
            (Self::Component(a), ElementType::Component(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for FiberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Props as the fiber sees them.
#[derive(Clone, Default)]
pub enum FiberProps {
    #[default]
    None,
    Props(Rc<Props>),
    Text(Rc<str>),
}

impl FiberProps {
    /// Identity comparison: the same props allocation, or equal text.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Props(a), Self::Props(b)) => Rc::ptr_eq(a, b),
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }

    #[must_use]
    pub fn props(&self) -> Option<&Rc<Props>> {
        match self {
            Self::Props(props) => Some(props),
            _ => None,
        }
    }

    #[must_use]
    pub fn text(&self) -> Option<&Rc<str>> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Debug for FiberProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Props(props) => props.fmt(f),
            Self::Text(text) => write!(f, "{text:?}"),
        }
    }
}

/// Queue slot of a fiber.
#[derive(Clone, Default)]
pub(crate) enum FiberQueue {
    #[default]
    None,
    Root(UpdateQueue<HostRootState>),
    /// Effect records of a function component, in call order.
    Effects(Rc<[Effect]>),
}

impl FiberQueue {
    pub(crate) fn effects(&self) -> &[Effect] {
        match self {
            Self::Effects(effects) => effects,
            _ => &[],
        }
    }
}

/// Memoized state slot of a fiber.
#[derive(Clone, Default)]
pub(crate) enum FiberState {
    #[default]
    None,
    Root(HostRootState),
    Hooks(HookList),
}

// ============================================================================
// Fiber
// ============================================================================

/// One node of the work tree.
pub struct Fiber<H: HostConfig> {
    pub tag: WorkTag,
    pub key: Option<Key>,
    pub ty: FiberType,
    pub pending_props: FiberProps,
    pub memoized_props: FiberProps,
    pub(crate) state_node: Option<H::Instance>,
    pub(crate) update_payload: Option<H::UpdatePayload>,
    pub(crate) update_queue: FiberQueue,
    pub(crate) memoized_state: FiberState,
    pub host_ref: Option<HostRef>,

    /// Work this fiber needs at commit.
    pub flags: Flags,
    /// Union of `flags | subtree_flags` over all children, so the whole
    /// subtree's effects are `flags | subtree_flags`.
    pub subtree_flags: Flags,
    pub(crate) deletions: SmallVec<[FiberId; 2]>,

    pub lanes: Lanes,
    pub child_lanes: Lanes,

    pub return_: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    pub index: usize,
    pub alternate: Option<FiberId>,
}

impl<H: HostConfig> Fiber<H> {
    fn new(tag: WorkTag, key: Option<Key>, ty: FiberType, pending_props: FiberProps) -> Self {
        Self {
            tag,
            key,
            ty,
            pending_props,
            memoized_props: FiberProps::None,
            state_node: None,
            update_payload: None,
            update_queue: FiberQueue::None,
            memoized_state: FiberState::None,
            host_ref: None,
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: SmallVec::new(),
            lanes: NO_LANES,
            child_lanes: NO_LANES,
            return_: None,
            child: None,
            sibling: None,
            index: 0,
            alternate: None,
        }
    }

    /// Every effect in this fiber's subtree, itself included.
    #[must_use]
    pub fn subtree_effects(&self) -> Flags {
        self.flags | self.subtree_flags
    }

    /// Host instance, for host fibers that have completed at least once.
    #[must_use]
    pub fn instance(&self) -> Option<&H::Instance> {
        self.state_node.as_ref()
    }

    pub(crate) fn props(&self) -> Option<&Rc<Props>> {
        self.pending_props.props()
    }

    pub(crate) fn memoized_element(&self) -> Option<&HostRootState> {
        match &self.memoized_state {
            FiberState::Root(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn root_queue_mut(&mut self) -> Option<&mut UpdateQueue<HostRootState>> {
        match &mut self.update_queue {
            FiberQueue::Root(queue) => Some(queue),
            _ => None,
        }
    }

    pub(crate) fn hooks(&self) -> Option<&HookList> {
        match &self.memoized_state {
            FiberState::Hooks(list) => Some(list),
            _ => None,
        }
    }
}

impl<H: HostConfig> fmt::Debug for Fiber<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("tag", &self.tag)
            .field("ty", &self.ty)
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("subtree_flags", &self.subtree_flags)
            .field("lanes", &self.lanes)
            .field("child_lanes", &self.child_lanes)
            .field("index", &self.index)
            .field("instance", &self.state_node)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// FiberTree
// ============================================================================

/// Arena owning every fiber of one root.
pub struct FiberTree<H: HostConfig> {
    fibers: SlotMap<FiberId, Fiber<H>>,
}

impl<H: HostConfig> Default for FiberTree<H> {
    fn default() -> Self {
        Self {
            fibers: SlotMap::with_key(),
        }
    }
}

impl<H: HostConfig> Index<FiberId> for FiberTree<H> {
    type Output = Fiber<H>;

    fn index(&self, id: FiberId) -> &Self::Output {
        &self.fibers[id]
    }
}

impl<H: HostConfig> IndexMut<FiberId> for FiberTree<H> {
    fn index_mut(&mut self, id: FiberId) -> &mut Self::Output {
        &mut self.fibers[id]
    }
}

impl<H: HostConfig> FiberTree<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: FiberId) -> Option<&Fiber<H>> {
        self.fibers.get(id)
    }

    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber<H>> {
        self.fibers.get_mut(id)
    }

    #[must_use]
    pub fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains_key(id)
    }

    /// Number of live fibers (both buffers).
    #[must_use]
    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// Children of `id` in sibling order.
    pub fn children(&self, id: FiberId) -> impl Iterator<Item = FiberId> + '_ {
        std::iter::successors(self.fibers[id].child, move |&child| {
            self.fibers[child].sibling
        })
    }

    /// Parent of `id`, falling back to the alternate's parent when this
    /// buffer's link points at a released fiber.
    pub(crate) fn parent_of(&self, id: FiberId) -> Option<FiberId> {
        let fiber = self.fibers.get(id)?;
        fiber
            .return_
            .filter(|parent| self.fibers.contains_key(*parent))
            .or_else(|| {
                let alt = self.fibers.get(fiber.alternate?)?;
                alt.return_.filter(|parent| self.fibers.contains_key(*parent))
            })
    }

    /// Live alternate of `id`.
    pub(crate) fn alternate_of(&self, id: FiberId) -> Option<FiberId> {
        self.fibers[id]
            .alternate
            .filter(|alt| self.fibers.contains_key(*alt))
    }

    pub(crate) fn create_host_root(&mut self) -> FiberId {
        let mut fiber = Fiber::new(WorkTag::HostRoot, None, FiberType::Root, FiberProps::None);
        fiber.update_queue = FiberQueue::Root(UpdateQueue::new(HostRootState::default()));
        fiber.memoized_state = FiberState::Root(HostRootState::default());
        self.fibers.insert(fiber)
    }

    /// Fiber for the next pass of `current`, reusing the alternate slot if
    /// there is one. Effects of the previous use of that slot are cleared.
    pub(crate) fn create_work_in_progress(
        &mut self,
        current: FiberId,
        pending_props: FiberProps,
    ) -> FiberId {
        let wip = match self.alternate_of(current) {
            Some(wip) => {
                let fiber = &mut self.fibers[wip];
                fiber.pending_props = pending_props;
                fiber.flags = Flags::empty();
                fiber.subtree_flags = Flags::empty();
                fiber.deletions.clear();
                fiber.update_payload = None;
                wip
            }
            None => {
                let src = &self.fibers[current];
                let mut fiber = Fiber::new(src.tag, src.key.clone(), src.ty.clone(), pending_props);
                fiber.alternate = Some(current);
                let wip = self.fibers.insert(fiber);
                self.fibers[current].alternate = Some(wip);
                wip
            }
        };

        let src = &self.fibers[current];
        let tag = src.tag;
        let state_node = src.state_node.clone();
        let memoized_props = src.memoized_props.clone();
        let memoized_state = src.memoized_state.clone();
        let update_queue = src.update_queue.clone();
        let host_ref = src.host_ref.clone();
        let (lanes, child_lanes) = (src.lanes, src.child_lanes);
        let (child, sibling, index, return_) = (src.child, src.sibling, src.index, src.return_);

        let fiber = &mut self.fibers[wip];
        fiber.tag = tag;
        fiber.state_node = state_node;
        fiber.memoized_props = memoized_props;
        fiber.memoized_state = memoized_state;
        fiber.update_queue = update_queue;
        fiber.host_ref = host_ref;
        fiber.lanes = lanes;
        fiber.child_lanes = child_lanes;
        fiber.child = child;
        fiber.sibling = sibling;
        fiber.index = index;
        fiber.return_ = return_;
        wip
    }

    pub(crate) fn create_fiber_from_element(&mut self, element: &Element, lanes: Lanes) -> FiberId {
        let (tag, ty) = match &element.ty {
            ElementType::Host(tag) => (WorkTag::HostComponent, FiberType::Host(Rc::clone(tag))),
            ElementType::Component(component) => (
                WorkTag::IndeterminateComponent,
                FiberType::Component(component.clone()),
            ),
        };
        let mut fiber = Fiber::new(
            tag,
            element.key.clone(),
            ty,
            FiberProps::Props(Rc::clone(&element.props)),
        );
        fiber.host_ref = element.host_ref.clone();
        fiber.lanes = lanes;
        self.fibers.insert(fiber)
    }

    pub(crate) fn create_fiber_from_text(&mut self, text: Rc<str>, lanes: Lanes) -> FiberId {
        let mut fiber = Fiber::new(WorkTag::HostText, None, FiberType::Text, FiberProps::Text(text));
        fiber.lanes = lanes;
        self.fibers.insert(fiber)
    }

    /// Drop `child` from the child chain of `parent`. Returns whether it was
    /// linked there.
    pub(crate) fn unlink_child(&mut self, parent: FiberId, child: FiberId) -> bool {
        let next = self.fibers[child].sibling;
        if self.fibers[parent].child == Some(child) {
            self.fibers[parent].child = next;
        } else {
            let Some(prev) = self
                .children(parent)
                .find(|&id| self.fibers[id].sibling == Some(child))
            else {
                return false;
            };
            self.fibers[prev].sibling = next;
        }
        let fiber = &mut self.fibers[child];
        fiber.sibling = None;
        fiber.return_ = None;
        true
    }

    /// Release `root`, its descendants, and the alternates of all of them.
    /// Siblings of `root` are left alone.
    pub(crate) fn free_subtree(&mut self, root: FiberId) -> usize {
        let mut freed = 0;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.fibers.remove(id) else {
                continue;
            };
            freed += 1;
            if let Some(alt) = fiber.alternate.and_then(|alt| self.fibers.remove(alt)) {
                freed += 1;
                stack.extend(alt.child);
            }
            stack.extend(fiber.child);
            if id != root {
                stack.extend(fiber.sibling);
            }
        }
        freed
    }

    /// Release every fiber not reachable from `current_root` (or the
    /// alternate of a reachable fiber). Used after a pass is thrown away.
    pub(crate) fn collect_garbage(&mut self, current_root: FiberId) -> usize {
        let mut live = AHashSet::with_capacity(self.fibers.len());
        let mut stack = vec![current_root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.fibers.get(id) else {
                continue;
            };
            if !live.insert(id) {
                continue;
            }
            if let Some(alt) = fiber.alternate {
                live.insert(alt);
            }
            stack.extend(fiber.child);
            if id != current_root {
                stack.extend(fiber.sibling);
            }
        }
        let before = self.fibers.len();
        self.fibers.retain(|id, _| live.contains(&id));
        for fiber in self.fibers.values_mut() {
            if fiber.alternate.is_some_and(|alt| !live.contains(&alt)) {
                fiber.alternate = None;
            }
        }
        before - self.fibers.len()
    }
}

impl<H: HostConfig> fmt::Debug for FiberTree<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberTree")
            .field("fibers", &self.fibers.len())
            .finish()
    }
}
