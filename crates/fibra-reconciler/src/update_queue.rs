//! Update queues: circular pending lists and lane-aware replay.
//!
//! Pending updates live in an [`UpdateRing`], a singly linked circular list
//! that only stores its tail; the head is `tail.next`. Nodes are arena
//! indices into a `Vec`, so append is O(1) without pointers.
//!
//! [`rebase_updates`] replays a queue against a set of render lanes. Updates
//! outside the render lanes are kept in a new base queue together with every
//! update that follows them, so a later pass replays them in their original
//! order on top of the state that preceded the first skipped update.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::element::{Node, Props};
use crate::lane::{Lane, Lanes, NO_LANE, NO_LANES, is_subset_of_lanes, merge_lanes};

// ============================================================================
// Update
// ============================================================================

/// One queued state change.
#[derive(Clone)]
pub struct Update<P> {
    /// [`NO_LANE`] once the update has been rebased behind a skipped one;
    /// such updates apply in every later pass.
    pub lane: Lane,
    pub payload: P,
}

impl<P> Update<P> {
    pub fn new(lane: Lane, payload: P) -> Self {
        Self { lane, payload }
    }
}

impl<P> fmt::Debug for Update<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update").field("lane", &self.lane).finish_non_exhaustive()
    }
}

/// Payload of a class-style state update: wholesale replacement, or a pure
/// function of the previous state and the owner's props.
pub enum StatePayload<S> {
    Replace(S),
    Merge(Rc<dyn Fn(&S, &Props) -> S>),
}

impl<S: Clone> Clone for StatePayload<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Replace(state) => Self::Replace(state.clone()),
            Self::Merge(f) => Self::Merge(Rc::clone(f)),
        }
    }
}

impl<S: Clone> StatePayload<S> {
    /// Apply this payload to `prev`.
    pub fn apply(&self, prev: &S, props: &Props) -> S {
        match self {
            Self::Replace(next) => next.clone(),
            Self::Merge(f) => f(prev, props),
        }
    }
}

// ============================================================================
// UpdateRing
// ============================================================================

#[derive(Clone)]
struct RingNode<T> {
    value: T,
    next: usize,
}

/// Circular singly linked list addressed by its tail.
#[derive(Clone)]
pub struct UpdateRing<T> {
    nodes: Vec<RingNode<T>>,
    last: Option<usize>,
}

impl<T> Default for UpdateRing<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            last: None,
        }
    }
}

impl<T> UpdateRing<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Insert `value` as the new tail.
    pub fn push(&mut self, value: T) {
        let idx = self.nodes.len();
        let next = match self.last {
            Some(last) => {
                let first = self.nodes[last].next;
                self.nodes[last].next = idx;
                first
            }
            None => idx,
        };
        self.nodes.push(RingNode { value, next });
        self.last = Some(idx);
    }

    /// Detach the whole ring, leaving this one empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Iterate from head to tail.
    pub fn iter(&self) -> RingIter<'_, T> {
        RingIter {
            ring: self,
            cursor: self.last.map(|last| self.nodes[last].next),
            remaining: self.nodes.len(),
        }
    }

    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.last.map(|last| &self.nodes[last].value)
    }
}

impl<T: Clone> UpdateRing<T> {
    /// Append clones of every element of `other`, preserving order.
    pub fn append(&mut self, other: &Self) {
        for value in other.iter() {
            self.push(value.clone());
        }
    }
}

impl<T> fmt::Debug for UpdateRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRing").field("len", &self.len()).finish()
    }
}

pub struct RingIter<'a, T> {
    ring: &'a UpdateRing<T>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a, T> Iterator for RingIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let idx = self.cursor?;
        self.remaining -= 1;
        let node = &self.ring.nodes[idx];
        self.cursor = Some(node.next);
        Some(&node.value)
    }
}

impl<'a, T> IntoIterator for &'a UpdateRing<T> {
    type Item = &'a T;
    type IntoIter = RingIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Pending ring shared by both buffers of a fiber and by the dispatchers
/// that feed it.
pub type SharedRing<P> = Rc<RefCell<UpdateRing<Update<P>>>>;

// ============================================================================
// Replay
// ============================================================================

/// Result of replaying a queue.
pub struct Processed<S, P> {
    /// State after every update that belongs to the render lanes.
    pub new_state: S,
    /// State preceding the first skipped update (or `new_state` if none).
    pub base_state: S,
    /// Skipped updates and everything after the first of them.
    pub base_queue: UpdateRing<Update<P>>,
    /// Lanes of the skipped updates.
    pub skipped_lanes: Lanes,
}

impl<S: fmt::Debug, P> fmt::Debug for Processed<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processed")
            .field("new_state", &self.new_state)
            .field("base_state", &self.base_state)
            .field("base_queue", &self.base_queue.len())
            .field("skipped_lanes", &self.skipped_lanes)
            .finish()
    }
}

/// Replay `queue` on top of `base_state`, applying only updates whose lane
/// is in `render_lanes`.
pub fn rebase_updates<S, P>(
    base_state: S,
    queue: &UpdateRing<Update<P>>,
    render_lanes: Lanes,
    mut apply: impl FnMut(&S, &P) -> S,
) -> Processed<S, P>
where
    S: Clone,
    P: Clone,
{
    let mut new_state = base_state;
    let mut new_base_state: Option<S> = None;
    let mut base_queue = UpdateRing::new();
    let mut skipped_lanes = NO_LANES;

    for update in queue {
        if !is_subset_of_lanes(render_lanes, update.lane) {
            if base_queue.is_empty() {
                new_base_state = Some(new_state.clone());
            }
            base_queue.push(update.clone());
            skipped_lanes = merge_lanes(skipped_lanes, update.lane);
        } else {
            if !base_queue.is_empty() {
                base_queue.push(Update::new(NO_LANE, update.payload.clone()));
            }
            new_state = apply(&new_state, &update.payload);
        }
    }

    let base_state = new_base_state.unwrap_or_else(|| new_state.clone());
    Processed {
        new_state,
        base_state,
        base_queue,
        skipped_lanes,
    }
}

// ============================================================================
// Root queue
// ============================================================================

/// Memoized state of the root fiber: the element tree last rendered.
#[derive(Debug, Clone, Default)]
pub struct HostRootState {
    pub element: Node,
}

/// Update queue of a class-style state owner (the host root).
///
/// Both buffers of the owner hold their own base state and base queue but
/// share one pending ring.
#[derive(Clone)]
pub struct UpdateQueue<S> {
    pub base_state: S,
    pub base_queue: UpdateRing<Update<StatePayload<S>>>,
    pub shared: SharedRing<StatePayload<S>>,
}

impl<S: Clone> UpdateQueue<S> {
    pub fn new(base_state: S) -> Self {
        Self {
            base_state,
            base_queue: UpdateRing::new(),
            shared: Rc::new(RefCell::new(UpdateRing::new())),
        }
    }

    /// Move pending updates into this queue's base queue and into
    /// `current`'s, so a discarded pass does not lose them.
    pub fn absorb_pending(&mut self, current: Option<&mut Self>) {
        let pending = self.shared.borrow_mut().take();
        if pending.is_empty() {
            return;
        }
        if let Some(current) = current {
            current.base_queue.append(&pending);
        }
        self.base_queue.append(&pending);
    }

    /// Replay the base queue. Returns the new state and the skipped lanes;
    /// the queue keeps the deferred part.
    pub fn process(&mut self, props: &Props, render_lanes: Lanes) -> (S, Lanes) {
        let processed = rebase_updates(
            self.base_state.clone(),
            &self.base_queue,
            render_lanes,
            |prev, payload: &StatePayload<S>| payload.apply(prev, props),
        );
        self.base_state = processed.base_state;
        self.base_queue = processed.base_queue;
        (processed.new_state, processed.skipped_lanes)
    }
}

impl<S> fmt::Debug for UpdateQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("base_queue", &self.base_queue.len())
            .field("pending", &self.shared.borrow().len())
            .finish()
    }
}
