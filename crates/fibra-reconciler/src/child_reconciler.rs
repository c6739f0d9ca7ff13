//! Keyed child diffing.
//!
//! Given a parent's committed child chain and the children it rendered this
//! pass, build the new chain, reusing fibers whose key and type match and
//! recording the host work the commit needs:
//!
//! - `PLACEMENT` on new fibers and on reused fibers that moved,
//! - the parent's `deletions` (plus `CHILD_DELETION`) for old fibers that
//!   found no match.
//!
//! On first mount nothing is tracked: the whole subtree is inserted at once
//! by its nearest placed ancestor.
//!
//! # Move detection
//!
//! Lists are walked in lockstep while keys match. Once they diverge, the
//! remaining old children are indexed by key (or position, when unkeyed) and
//! matched against the remaining new children. Among the reused fibers in
//! that tail, the longest run that kept its relative order stays put and
//! every other reused fiber is flagged for placement, so `[A, B, C]` to
//! `[C, A, B]` moves one node instead of two.
//!
//! Duplicate keys are not an error. The first old child with a key wins the
//! lookup and later duplicates are deleted.

use std::rc::Rc;

use ahash::AHashMap;

use crate::element::{Element, Key, Node};
use crate::fiber::{FiberId, FiberProps, FiberTree, WorkTag};
use crate::flags::Flags;
use crate::host::HostConfig;
use crate::lane::Lanes;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MapKey {
    Key(Key),
    Index(usize),
}

/// One diff of one parent.
pub(crate) struct ChildReconciler<'a, H: HostConfig> {
    tree: &'a mut FiberTree<H>,
    track_side_effects: bool,
    lanes: Lanes,
}

/// Reconcile the children of `wip` against `next` and store the new first
/// child. `current` is the committed counterpart of `wip`, if any.
pub(crate) fn reconcile_children<H: HostConfig>(
    tree: &mut FiberTree<H>,
    current: Option<FiberId>,
    wip: FiberId,
    next: &Node,
    lanes: Lanes,
) {
    let current_first_child = current.and_then(|current| tree[current].child);
    let child = ChildReconciler {
        tree: &mut *tree,
        track_side_effects: current.is_some(),
        lanes,
    }
    .reconcile_child_fibers(wip, current_first_child, next);
    tree[wip].child = child;
}

impl<H: HostConfig> ChildReconciler<'_, H> {
    fn reconcile_child_fibers(
        &mut self,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        next: &Node,
    ) -> Option<FiberId> {
        match next {
            Node::Element(element) => {
                let child = self.reconcile_single_element(return_fiber, current_first_child, element);
                Some(self.place_single_child(child))
            }
            Node::Text(text) => {
                let child = self.reconcile_single_text(return_fiber, current_first_child, text);
                Some(self.place_single_child(child))
            }
            Node::List(items) => {
                let mut flat = Vec::with_capacity(items.len());
                flatten(items, &mut flat);
                self.reconcile_children_array(return_fiber, current_first_child, &flat)
            }
            Node::Empty => {
                self.delete_remaining_children(return_fiber, current_first_child);
                None
            }
        }
    }

    // --- Bookkeeping ---

    fn delete_child(&mut self, return_fiber: FiberId, child: FiberId) {
        if !self.track_side_effects {
            return;
        }
        let parent = &mut self.tree[return_fiber];
        parent.deletions.push(child);
        parent.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining_children(&mut self, return_fiber: FiberId, first: Option<FiberId>) {
        if !self.track_side_effects {
            return;
        }
        let mut child = first;
        while let Some(id) = child {
            self.delete_child(return_fiber, id);
            child = self.tree[id].sibling;
        }
    }

    /// Work-in-progress clone of `fiber` positioned as an only child.
    fn use_fiber(&mut self, fiber: FiberId, props: FiberProps) -> FiberId {
        let clone = self.tree.create_work_in_progress(fiber, props);
        let wip = &mut self.tree[clone];
        wip.index = 0;
        wip.sibling = None;
        clone
    }

    fn place_single_child(&mut self, fiber: FiberId) -> FiberId {
        if self.track_side_effects && self.tree[fiber].alternate.is_none() {
            self.tree[fiber].flags |= Flags::PLACEMENT;
        }
        fiber
    }

    /// Position `fiber` at `new_index` during the lockstep and append
    /// phases. Returns the new high-water mark of settled old indices.
    fn place_child(&mut self, fiber: FiberId, last_placed_index: usize, new_index: usize) -> usize {
        self.tree[fiber].index = new_index;
        if !self.track_side_effects {
            return last_placed_index;
        }
        match self.tree[fiber].alternate.map(|current| self.tree[current].index) {
            Some(old_index) if old_index >= last_placed_index => old_index,
            _ => {
                self.tree[fiber].flags |= Flags::PLACEMENT;
                last_placed_index
            }
        }
    }

    // --- Fiber construction ---

    fn create_child(&mut self, return_fiber: FiberId, node: &Node) -> Option<FiberId> {
        let created = match node {
            Node::Element(element) => self.tree.create_fiber_from_element(element, self.lanes),
            Node::Text(text) => self.tree.create_fiber_from_text(Rc::clone(text), self.lanes),
            Node::Empty | Node::List(_) => return None,
        };
        self.tree[created].return_ = Some(return_fiber);
        Some(created)
    }

    fn update_text(&mut self, return_fiber: FiberId, current: Option<FiberId>, text: &Rc<str>) -> FiberId {
        let fiber = match current {
            Some(current) if self.tree[current].tag == WorkTag::HostText => {
                self.use_fiber(current, FiberProps::Text(Rc::clone(text)))
            }
            _ => self.tree.create_fiber_from_text(Rc::clone(text), self.lanes),
        };
        self.tree[fiber].return_ = Some(return_fiber);
        fiber
    }

    fn update_element(&mut self, return_fiber: FiberId, current: Option<FiberId>, element: &Element) -> FiberId {
        let fiber = match current {
            Some(current) if self.tree[current].ty.matches(&element.ty) => {
                let existing = self.use_fiber(current, FiberProps::Props(Rc::clone(&element.props)));
                self.tree[existing].host_ref = element.host_ref.clone();
                existing
            }
            _ => self.tree.create_fiber_from_element(element, self.lanes),
        };
        self.tree[fiber].return_ = Some(return_fiber);
        fiber
    }

    // --- Single child ---

    fn reconcile_single_element(
        &mut self,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        let mut child = current_first_child;
        while let Some(id) = child {
            if self.tree[id].key == element.key {
                if self.tree[id].ty.matches(&element.ty) {
                    self.delete_remaining_children(return_fiber, self.tree[id].sibling);
                    return self.update_element(return_fiber, Some(id), element);
                }
                // Same key, different type: nothing after it can match.
                self.delete_remaining_children(return_fiber, Some(id));
                break;
            }
            self.delete_child(return_fiber, id);
            child = self.tree[id].sibling;
        }
        self.update_element(return_fiber, None, element)
    }

    fn reconcile_single_text(
        &mut self,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        text: &Rc<str>,
    ) -> FiberId {
        if let Some(first) = current_first_child
            && self.tree[first].tag == WorkTag::HostText
        {
            self.delete_remaining_children(return_fiber, self.tree[first].sibling);
            return self.update_text(return_fiber, Some(first), text);
        }
        self.delete_remaining_children(return_fiber, current_first_child);
        self.update_text(return_fiber, None, text)
    }

    // --- Lists ---

    /// Lockstep match of `old` against `node`. `None` means the keys
    /// diverged and the list phase must fall back to the lookup map.
    fn update_slot(&mut self, return_fiber: FiberId, old: Option<FiberId>, node: &Node) -> Option<FiberId> {
        let old_key = old.and_then(|old| self.tree[old].key.clone());
        match node {
            // Text has no key, so it can only take an unkeyed slot.
            Node::Text(text) if old_key.is_none() => Some(self.update_text(return_fiber, old, text)),
            Node::Element(element) if element.key == old_key => {
                Some(self.update_element(return_fiber, old, element))
            }
            _ => None,
        }
    }

    fn update_from_map(
        &mut self,
        existing: &AHashMap<MapKey, FiberId>,
        return_fiber: FiberId,
        new_index: usize,
        node: &Node,
    ) -> Option<FiberId> {
        match node {
            Node::Text(text) => {
                let matched = existing.get(&MapKey::Index(new_index)).copied();
                Some(self.update_text(return_fiber, matched, text))
            }
            Node::Element(element) => {
                let matched = existing.get(&map_key(element.key.as_ref(), new_index)).copied();
                Some(self.update_element(return_fiber, matched, element))
            }
            Node::Empty | Node::List(_) => None,
        }
    }

    fn map_remaining_children(&mut self, return_fiber: FiberId, first: Option<FiberId>) -> AHashMap<MapKey, FiberId> {
        let mut existing = AHashMap::new();
        let mut child = first;
        while let Some(id) = child {
            let fiber = &self.tree[id];
            let key = map_key(fiber.key.as_ref(), fiber.index);
            child = fiber.sibling;
            if existing.contains_key(&key) {
                self.delete_child(return_fiber, id);
            } else {
                existing.insert(key, id);
            }
        }
        existing
    }

    fn reconcile_children_array(
        &mut self,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_children: &[&Node],
    ) -> Option<FiberId> {
        let mut first: Option<FiberId> = None;
        let mut previous: Option<FiberId> = None;
        let mut link = |tree: &mut FiberTree<H>, fiber: FiberId| {
            match previous {
                Some(prev) => tree[prev].sibling = Some(fiber),
                None => first = Some(fiber),
            }
            previous = Some(fiber);
        };

        let mut old_fiber = current_first_child;
        let mut last_placed_index = 0;
        let mut new_index = 0;

        // Phase 1: lockstep while keys keep matching.
        while let Some(old) = old_fiber {
            if new_index >= new_children.len() {
                break;
            }
            // A gap in the old indices (an empty slot last time) means this
            // old fiber belongs further right.
            let (slot, next_old) = if self.tree[old].index > new_index {
                (None, Some(old))
            } else {
                (Some(old), self.tree[old].sibling)
            };
            let Some(fiber) = self.update_slot(return_fiber, slot, new_children[new_index]) else {
                break;
            };
            if self.track_side_effects
                && let Some(slot) = slot
                && self.tree[fiber].alternate.is_none()
            {
                // Matched the slot but could not reuse it.
                self.delete_child(return_fiber, slot);
            }
            last_placed_index = self.place_child(fiber, last_placed_index, new_index);
            link(self.tree, fiber);
            old_fiber = next_old;
            new_index += 1;
        }

        // Phase 2: new list exhausted.
        if new_index == new_children.len() {
            self.delete_remaining_children(return_fiber, old_fiber);
            return first;
        }

        // Phase 3: old list exhausted, append the rest.
        if old_fiber.is_none() {
            for (index, node) in new_children.iter().enumerate().skip(new_index) {
                if let Some(fiber) = self.create_child(return_fiber, node) {
                    last_placed_index = self.place_child(fiber, last_placed_index, index);
                    link(self.tree, fiber);
                }
            }
            return first;
        }

        // Phase 4: match the tails through a lookup map.
        let mut existing = self.map_remaining_children(return_fiber, old_fiber);
        let mut placed: Vec<(FiberId, Option<usize>)> = Vec::new();
        for (index, node) in new_children.iter().enumerate().skip(new_index) {
            let Some(fiber) = self.update_from_map(&existing, return_fiber, index, node) else {
                continue;
            };
            let old_index = self.tree[fiber].alternate.map(|current| {
                let current = &self.tree[current];
                existing.remove(&map_key(current.key.as_ref(), current.index));
                current.index
            });
            self.tree[fiber].index = index;
            link(self.tree, fiber);
            placed.push((fiber, old_index));
        }

        if self.track_side_effects {
            self.mark_moves(&placed, last_placed_index);
            for (_, leftover) in existing {
                self.delete_child(return_fiber, leftover);
            }
        }
        first
    }

    /// Flag every tail fiber that is new or out of order. Reused fibers
    /// whose old indices form the longest increasing run stay in place.
    fn mark_moves(&mut self, placed: &[(FiberId, Option<usize>)], last_placed_index: usize) {
        let candidates: Vec<(usize, usize)> = placed
            .iter()
            .enumerate()
            .filter_map(|(pos, &(_, old))| old.filter(|&old| old >= last_placed_index).map(|old| (pos, old)))
            .collect();
        let indices: Vec<usize> = candidates.iter().map(|&(_, old)| old).collect();
        let mut stable = vec![false; placed.len()];
        for run_pos in longest_increasing_subsequence(&indices) {
            stable[candidates[run_pos].0] = true;
        }
        for (pos, &(fiber, _)) in placed.iter().enumerate() {
            if !stable[pos] {
                self.tree[fiber].flags |= Flags::PLACEMENT;
            }
        }
    }
}

fn map_key(key: Option<&Key>, index: usize) -> MapKey {
    match key {
        Some(key) => MapKey::Key(key.clone()),
        None => MapKey::Index(index),
    }
}

fn flatten<'n>(items: &'n [Node], out: &mut Vec<&'n Node>) {
    for item in items {
        match item {
            Node::List(nested) => flatten(nested, out),
            other => out.push(other),
        }
    }
}

/// Positions (into `seq`) of one longest strictly increasing subsequence.
fn longest_increasing_subsequence(seq: &[usize]) -> Vec<usize> {
    // tails[k]: position of the smallest tail of an increasing run of length k+1.
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];
    for (pos, &value) in seq.iter().enumerate() {
        let len = tails.partition_point(|&tail| seq[tail] < value);
        if len > 0 {
            prev[pos] = Some(tails[len - 1]);
        }
        if len == tails.len() {
            tails.push(pos);
        } else {
            tails[len] = pos;
        }
    }
    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(pos) = cursor {
        run.push(pos);
        cursor = prev[pos];
    }
    run.reverse();
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::DEFAULT_LANE;
    use crate::testing::MemoryHost;
    use proptest::prelude::*;

    type Tree = FiberTree<MemoryHost>;

    fn li(key: &str) -> Node {
        Element::host("li").key(key).build()
    }

    fn p(key: &str) -> Node {
        Element::host("p").key(key).build()
    }

    fn keys(list: &[&str]) -> Node {
        Node::list(list.iter().map(|k| li(k)))
    }

    /// Mount `initial` under a parent and pretend it was committed.
    fn committed(tree: &mut Tree, initial: &Node) -> FiberId {
        let parent = tree.create_fiber_from_element(&Element::host("ul").into_element(), DEFAULT_LANE);
        reconcile_children(tree, None, parent, initial, DEFAULT_LANE);
        let children: Vec<_> = tree.children(parent).collect();
        for child in children {
            tree[child].flags = Flags::empty();
        }
        parent
    }

    /// Diff the committed children of `parent` against `next`.
    fn diff(tree: &mut Tree, parent: FiberId, next: &Node) -> FiberId {
        let wip = tree.create_work_in_progress(parent, FiberProps::None);
        reconcile_children(tree, Some(parent), wip, next, DEFAULT_LANE);
        wip
    }

    fn key_of(tree: &Tree, id: FiberId) -> String {
        tree[id].key.as_ref().map(|k| k.as_str().to_owned()).unwrap_or_default()
    }

    fn placed(tree: &Tree, parent: FiberId) -> Vec<String> {
        tree.children(parent)
            .filter(|&id| tree[id].flags.contains(Flags::PLACEMENT))
            .map(|id| key_of(tree, id))
            .collect()
    }

    fn deleted(tree: &Tree, parent: FiberId) -> Vec<String> {
        tree[parent].deletions.iter().map(|&id| key_of(tree, id)).collect()
    }

    fn order(tree: &Tree, parent: FiberId) -> Vec<String> {
        tree.children(parent).map(|id| key_of(tree, id)).collect()
    }

    // =========================================================================
    // Keyed lists
    // =========================================================================

    #[test]
    fn rotation_moves_a_single_fiber() {
        let mut tree = Tree::new();
        let parent = committed(&mut tree, &keys(&["a", "b", "c"]));
        let old: Vec<_> = tree.children(parent).collect();

        let wip = diff(&mut tree, parent, &keys(&["c", "a", "b"]));
        assert_eq!(order(&tree, wip), ["c", "a", "b"]);
        assert_eq!(placed(&tree, wip), ["c"]);
        assert!(deleted(&tree, wip).is_empty());
        for id in tree.children(wip) {
            assert!(old.contains(&tree[id].alternate.unwrap()), "every fiber reused");
        }
    }

    #[test]
    fn shrinking_deletes_without_moving() {
        let mut tree = Tree::new();
        let parent = committed(&mut tree, &keys(&["a", "b", "c"]));
        let wip = diff(&mut tree, parent, &keys(&["b"]));
        assert_eq!(order(&tree, wip), ["b"]);
        assert!(placed(&tree, wip).is_empty());
        let mut gone = deleted(&tree, wip);
        gone.sort();
        assert_eq!(gone, ["a", "c"]);
        assert!(tree[wip].flags.contains(Flags::CHILD_DELETION));
    }

    #[test]
    fn type_change_at_same_key_recreates() {
        let mut tree = Tree::new();
        let parent = committed(&mut tree, &Node::list([li("x")]));
        let wip = diff(&mut tree, parent, &Node::list([p("x")]));
        let child = tree[wip].child.unwrap();
        assert!(tree[child].alternate.is_none());
        assert!(tree[child].flags.contains(Flags::PLACEMENT));
        assert_eq!(deleted(&tree, wip), ["x"]);
    }

    #[test]
    fn append_and_prepend() {
        let mut tree = Tree::new();
        let parent = committed(&mut tree, &keys(&["a", "b"]));
        let wip = diff(&mut tree, parent, &keys(&["a", "b", "c"]));
        assert_eq!(placed(&tree, wip), ["c"]);

        let mut tree = Tree::new();
        let parent = committed(&mut tree, &keys(&["a", "b"]));
        let wip = diff(&mut tree, parent, &keys(&["z", "a", "b"]));
        assert_eq!(placed(&tree, wip), ["z"]);
    }

    #[test]
    fn reverse_reuses_everything() {
        let mut tree = Tree::new();
        let parent = committed(&mut tree, &keys(&["a", "b", "c", "d"]));
        let wip = diff(&mut tree, parent, &keys(&["d", "c", "b", "a"]));
        assert_eq!(order(&tree, wip), ["d", "c", "b", "a"]);
        assert!(tree.children(wip).all(|id| tree[id].alternate.is_some()));
        assert_eq!(placed(&tree, wip).len(), 3);
    }

    #[test]
    fn duplicate_old_keys_first_wins() {
        let mut tree = Tree::new();
        let parent = committed(&mut tree, &keys(&["a", "x", "x"]));
        let old: Vec<_> = tree.children(parent).collect();
        let wip = diff(&mut tree, parent, &keys(&["x", "a"]));
        let first = tree[wip].child.unwrap();
        assert_eq!(tree[first].alternate, Some(old[1]));
        assert!(tree[wip].deletions.contains(&old[2]));
    }

    // =========================================================================
    // Single children and text
    // =========================================================================

    #[test]
    fn first_mount_tracks_nothing() {
        let mut tree = Tree::new();
        let parent = tree.create_fiber_from_element(&Element::host("ul").into_element(), DEFAULT_LANE);
        reconcile_children(&mut tree, None, parent, &keys(&["a", "b"]), DEFAULT_LANE);
        assert!(tree.children(parent).all(|id| tree[id].flags.is_empty()));
        assert!(tree.children(parent).all(|id| tree[id].return_ == Some(parent)));
    }

    #[test]
    fn single_element_reuses_keyed_match_and_drops_rest() {
        let mut tree = Tree::new();
        let parent = committed(&mut tree, &keys(&["a", "b", "c"]));
        let wip = diff(&mut tree, parent, &li("b"));
        let child = tree[wip].child.unwrap();
        assert!(tree[child].alternate.is_some());
        assert!(tree[child].flags.is_empty());
        assert_eq!(tree[child].sibling, None);
        let mut gone = deleted(&tree, wip);
        gone.sort();
        assert_eq!(gone, ["a", "c"]);
    }

    #[test]
    fn text_child_reuses_text_fiber() {
        let mut tree = Tree::new();
        let parent = committed(&mut tree, &Node::text("hi"));
        let old = tree[parent].child.unwrap();
        let wip = diff(&mut tree, parent, &Node::text("bye"));
        let child = tree[wip].child.unwrap();
        assert_eq!(tree[child].alternate, Some(old));
        assert_eq!(tree[child].pending_props.text().map(|t| &**t), Some("bye"));
    }

    #[test]
    fn empty_entries_hold_their_index() {
        let mut tree = Tree::new();
        let list = Node::list([Node::text("x"), Node::Empty, Node::text("y")]);
        let parent = committed(&mut tree, &list);
        let indices: Vec<_> = tree.children(parent).map(|id| tree[id].index).collect();
        assert_eq!(indices, [0, 2]);

        let wip = diff(&mut tree, parent, &list);
        assert!(tree.children(wip).all(|id| tree[id].alternate.is_some()));
        assert!(placed(&tree, wip).is_empty());
        assert!(tree[wip].deletions.is_empty());
    }

    #[test]
    fn nested_lists_are_flattened() {
        let mut tree = Tree::new();
        let nested = Node::list([li("a"), Node::list([li("b"), li("c")])]);
        let parent = committed(&mut tree, &nested);
        assert_eq!(order(&tree, parent), ["a", "b", "c"]);
    }

    // =========================================================================
    // LIS
    // =========================================================================

    #[test]
    fn lis_picks_longest_run() {
        assert_eq!(longest_increasing_subsequence(&[]), Vec::<usize>::new());
        assert_eq!(longest_increasing_subsequence(&[2, 0, 1]), [1, 2]);
        assert_eq!(longest_increasing_subsequence(&[3, 1, 2, 0, 4]), [1, 2, 4]);
    }

    proptest! {
        #[test]
        fn lis_is_increasing_and_maximal(perm in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle()) {
            let run = longest_increasing_subsequence(&perm);
            for pair in run.windows(2) {
                prop_assert!(pair[0] < pair[1]);
                prop_assert!(perm[pair[0]] < perm[pair[1]]);
            }
            // O(n^2) reference length.
            let mut best = vec![1usize; perm.len()];
            for i in 0..perm.len() {
                for j in 0..i {
                    if perm[j] < perm[i] {
                        best[i] = best[i].max(best[j] + 1);
                    }
                }
            }
            prop_assert_eq!(run.len(), best.into_iter().max().unwrap_or(0));
        }

        #[test]
        fn keyed_diff_preserves_new_order(perm in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle(), keep in 1usize..=8) {
            let old: Vec<String> = (0..8).map(|i| format!("k{i}")).collect();
            let new: Vec<String> = perm.iter().take(keep).map(|i| format!("k{i}")).collect();
            let old_refs: Vec<&str> = old.iter().map(String::as_str).collect();
            let new_refs: Vec<&str> = new.iter().map(String::as_str).collect();

            let mut tree = Tree::new();
            let parent = committed(&mut tree, &keys(&old_refs));
            let wip = diff(&mut tree, parent, &keys(&new_refs));
            prop_assert_eq!(order(&tree, wip), new.clone());
            prop_assert_eq!(tree[wip].deletions.len(), 8 - keep);
            prop_assert!(tree.children(wip).all(|id| tree[id].alternate.is_some()));
        }
    }
}
