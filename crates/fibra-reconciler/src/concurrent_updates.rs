//! Staging of updates that arrive while queues must not change.
//!
//! A dispatch never writes into a hook or root queue directly. It stages a
//! [`ConcurrentUpdate`] whose `apply` closure performs the splice, and the
//! root drains the stage at points where no render is reading the queues:
//! when a fresh stack is prepared, when a render completes, and after a
//! commit. Draining also marks the update's lane on the fiber and every
//! ancestor so the next pass knows where to look.

use std::fmt;

use crate::fiber::{FiberId, FiberTree, WorkTag};
use crate::host::HostConfig;
use crate::lane::{Lane, merge_lanes};

/// An update waiting to be spliced into its queue.
pub(crate) struct ConcurrentUpdate {
    pub(crate) fiber: FiberId,
    pub(crate) lane: Lane,
    pub(crate) apply: Box<dyn FnOnce()>,
}

impl fmt::Debug for ConcurrentUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentUpdate")
            .field("fiber", &self.fiber)
            .field("lane", &self.lane)
            .finish_non_exhaustive()
    }
}

/// Add `lane` to `fiber` and to the child lanes of every ancestor, in both
/// buffers. Returns the host root reached, or `None` when the fiber was
/// released or is detached from any root.
pub(crate) fn mark_update_lane_from_fiber_to_root<H: HostConfig>(
    tree: &mut FiberTree<H>,
    fiber: FiberId,
    lane: Lane,
) -> Option<FiberId> {
    let source = tree.get_mut(fiber)?;
    source.lanes = merge_lanes(source.lanes, lane);
    if let Some(alt) = tree.alternate_of(fiber) {
        tree[alt].lanes = merge_lanes(tree[alt].lanes, lane);
    }

    let mut node = fiber;
    while let Some(parent) = tree.parent_of(node) {
        tree[parent].child_lanes = merge_lanes(tree[parent].child_lanes, lane);
        if let Some(alt) = tree.alternate_of(parent) {
            tree[alt].child_lanes = merge_lanes(tree[alt].child_lanes, lane);
        }
        node = parent;
    }
    (tree[node].tag == WorkTag::HostRoot).then_some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::fiber::FiberProps;
    use crate::lane::{DEFAULT_LANE, NO_LANES, SYNC_LANE};
    use crate::testing::MemoryHost;

    fn chain(tree: &mut FiberTree<MemoryHost>) -> (FiberId, FiberId, FiberId) {
        let root = tree.create_host_root();
        let div = tree.create_fiber_from_element(&Element::host("div").into_element(), NO_LANES);
        let span = tree.create_fiber_from_element(&Element::host("span").into_element(), NO_LANES);
        tree[root].child = Some(div);
        tree[div].return_ = Some(root);
        tree[div].child = Some(span);
        tree[span].return_ = Some(div);
        (root, div, span)
    }

    #[test]
    fn lanes_bubble_to_root_in_both_buffers() {
        let mut tree = FiberTree::<MemoryHost>::new();
        let (root, div, span) = chain(&mut tree);
        let div_alt = tree.create_work_in_progress(div, FiberProps::None);

        assert_eq!(mark_update_lane_from_fiber_to_root(&mut tree, span, DEFAULT_LANE), Some(root));
        assert_eq!(tree[span].lanes, DEFAULT_LANE);
        assert_eq!(tree[div].child_lanes, DEFAULT_LANE);
        assert_eq!(tree[div_alt].child_lanes, DEFAULT_LANE);
        assert_eq!(tree[root].child_lanes, DEFAULT_LANE);
        assert_eq!(tree[root].lanes, NO_LANES);

        mark_update_lane_from_fiber_to_root(&mut tree, span, SYNC_LANE);
        assert_eq!(tree[root].child_lanes, DEFAULT_LANE | SYNC_LANE);
    }

    #[test]
    fn released_fiber_reports_no_root() {
        let mut tree = FiberTree::<MemoryHost>::new();
        let (_, div, span) = chain(&mut tree);
        tree.free_subtree(div);
        assert_eq!(mark_update_lane_from_fiber_to_root(&mut tree, span, DEFAULT_LANE), None);
    }

    #[test]
    fn detached_fiber_reports_no_root() {
        let mut tree = FiberTree::<MemoryHost>::new();
        let orphan = tree.create_fiber_from_text("x".into(), NO_LANES);
        assert_eq!(mark_update_lane_from_fiber_to_root(&mut tree, orphan, DEFAULT_LANE), None);
        assert_eq!(tree[orphan].lanes, DEFAULT_LANE);
    }
}
