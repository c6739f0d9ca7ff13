//! Commit phase.
//!
//! A commit applies a finished tree in three steps:
//!
//! 1. **Mutation**: deletions, placements, property and text updates, ref
//!    swaps and layout-effect teardowns, walked children first.
//! 2. **Swap**: the finished tree becomes the current tree.
//! 3. **Layout**: layout-effect setups, children first.
//!
//! Passive effects are collected afterwards and run from a separate
//! scheduler task (or earlier, when the next render or a sync commit needs
//! them flushed first). Host calls can fail; a failure aborts the commit
//! and leaves the native tree as far as the mutation pass got.

use smallvec::SmallVec;
use tracing::{debug, debug_span, warn};

use fibra_scheduler::{PriorityLevel, TaskHandle, TaskStatus};

use crate::error::Result;
use crate::event_priority::{EventPriority, lanes_to_event_priority};
use crate::fiber::{FiberId, FiberType, WorkTag};
use crate::flags::{Flags, HookFlags};
use crate::hooks::Effect;
use crate::host::HostConfig;
use crate::lane::{Lanes, NO_LANES, describe_lanes, includes_sync_lane, merge_lanes};
use crate::work_loop::{RootInner, RootState};

/// Passive effects of committed trees that have not run yet.
#[derive(Debug, Default)]
pub(crate) struct PendingPassive {
    pub(crate) lanes: Lanes,
    /// Effects of unmounted components; only their teardowns run.
    pub(crate) deleted: Vec<Effect>,
    pub(crate) effects: Vec<Effect>,
    pub(crate) task: Option<TaskHandle>,
}

impl PendingPassive {
    fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.effects.is_empty()
    }
}

/// What one commit produced besides host mutations.
#[derive(Default)]
struct CommitOutput {
    deleted_fibers: Vec<FiberId>,
    deleted_effects: Vec<Effect>,
}

// ============================================================================
// Passes over the finished tree
// ============================================================================

impl<H: HostConfig> RootState<H> {
    fn commit_mutation_effects(&mut self, fiber: FiberId, out: &mut CommitOutput) -> Result<()> {
        if self.tree[fiber].flags.contains(Flags::CHILD_DELETION) {
            let deletions = std::mem::take(&mut self.tree[fiber].deletions);
            let parent = self.host_parent_inclusive(fiber);
            let current_parent = self.tree.alternate_of(fiber);
            for child in deletions {
                self.commit_deletion_effects(parent.as_ref(), child, &mut out.deleted_effects)?;
                // A removed subtree leaves the committed tree right away, so a
                // commit that fails later is retried without it.
                if let Some(current) = current_parent {
                    self.tree.unlink_child(current, child);
                }
                out.deleted_fibers.push(child);
            }
        }

        if self.tree[fiber].subtree_flags.intersects(Flags::MUTATION_MASK) {
            let children: SmallVec<[FiberId; 8]> = self.tree.children(fiber).collect();
            for child in children {
                self.commit_mutation_effects(child, out)?;
            }
        }

        if self.tree[fiber].flags.contains(Flags::PLACEMENT) {
            self.commit_placement(fiber)?;
            self.tree[fiber].flags.remove(Flags::PLACEMENT);
        }

        let flags = self.tree[fiber].flags;
        match self.tree[fiber].tag {
            WorkTag::HostComponent => {
                if flags.contains(Flags::REF)
                    && let Some(old) = self.tree.alternate_of(fiber).and_then(|c| self.tree[c].host_ref.clone())
                {
                    old.detach();
                }
                let Some(instance) = self.tree[fiber].state_node.clone() else {
                    return Ok(());
                };
                if flags.contains(Flags::CONTENT_RESET) {
                    self.host.reset_text_content(&instance)?;
                }
                if flags.contains(Flags::UPDATE) {
                    self.commit_update(fiber, &instance)?;
                }
                if flags.contains(Flags::REF)
                    && let Some(host_ref) = &self.tree[fiber].host_ref
                {
                    host_ref.attach(Box::new(instance));
                }
            }
            WorkTag::HostText if flags.contains(Flags::UPDATE) => {
                let Some(instance) = self.tree[fiber].state_node.clone() else {
                    return Ok(());
                };
                let new = self.tree[fiber].memoized_props.text().cloned().unwrap_or_default();
                let old = self
                    .tree
                    .alternate_of(fiber)
                    .and_then(|c| self.tree[c].memoized_props.text().cloned())
                    .unwrap_or_default();
                self.host.commit_text_update(&instance, &old, &new)?;
            }
            WorkTag::FunctionComponent if flags.contains(Flags::UPDATE) => {
                for effect in self.tree[fiber].update_queue.effects() {
                    if effect.matches(HookFlags::LAYOUT | HookFlags::HAS_EFFECT) {
                        effect.run_teardown();
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn commit_update(&mut self, fiber: FiberId, instance: &H::Instance) -> Result<()> {
        let Some(payload) = self.tree[fiber].update_payload.take() else {
            return Ok(());
        };
        let FiberType::Host(ty) = &self.tree[fiber].ty else {
            return Ok(());
        };
        let ty = ty.clone();
        let new = self.tree[fiber].memoized_props.props().cloned().unwrap_or_default();
        let old = self
            .tree
            .alternate_of(fiber)
            .and_then(|c| self.tree[c].memoized_props.props().cloned())
            .unwrap_or_else(|| new.clone());
        self.host.apply_update_payload(instance, payload, &ty, &old, &new)?;
        Ok(())
    }

    /// Unmount `fiber` and everything below it. Only the topmost host nodes
    /// are removed from `parent`; nested ones go with them.
    fn commit_deletion_effects(
        &mut self,
        parent: Option<&H::Instance>,
        fiber: FiberId,
        passive: &mut Vec<Effect>,
    ) -> Result<()> {
        let children: SmallVec<[FiberId; 8]> = self.tree.children(fiber).collect();
        match self.tree[fiber].tag {
            WorkTag::HostComponent | WorkTag::HostText => {
                if let Some(host_ref) = &self.tree[fiber].host_ref {
                    host_ref.detach();
                }
                for child in children {
                    self.commit_deletion_effects(None, child, passive)?;
                }
                if let (Some(parent), Some(instance)) = (parent, self.tree[fiber].state_node.clone()) {
                    self.host.remove_child(parent, &instance)?;
                }
            }
            WorkTag::FunctionComponent | WorkTag::IndeterminateComponent => {
                for effect in self.tree[fiber].update_queue.effects() {
                    if effect.matches(HookFlags::LAYOUT) {
                        effect.run_teardown();
                    } else if effect.matches(HookFlags::PASSIVE) {
                        passive.push(effect.clone());
                    }
                }
                for child in children {
                    self.commit_deletion_effects(parent, child, passive)?;
                }
            }
            WorkTag::HostRoot => {
                for child in children {
                    self.commit_deletion_effects(parent, child, passive)?;
                }
            }
        }
        Ok(())
    }

    // --- Placement ---

    fn commit_placement(&mut self, fiber: FiberId) -> Result<()> {
        let Some((parent_fiber, parent)) = self.host_parent(fiber) else {
            warn!(target: "fibra.commit", ?fiber, "placed fiber has no host parent");
            return Ok(());
        };
        if self.tree[parent_fiber].flags.contains(Flags::CONTENT_RESET) {
            self.host.reset_text_content(&parent)?;
            self.tree[parent_fiber].flags.remove(Flags::CONTENT_RESET);
        }
        let before = self.host_sibling(fiber);
        self.insert_or_append_placement_node(fiber, before.as_ref(), &parent)
    }

    fn insert_or_append_placement_node(
        &mut self,
        fiber: FiberId,
        before: Option<&H::Instance>,
        parent: &H::Instance,
    ) -> Result<()> {
        if self.tree[fiber].tag.is_host() {
            if let Some(instance) = self.tree[fiber].state_node.clone() {
                match before {
                    Some(before) => self.host.insert_before(parent, &instance, before)?,
                    None => self.host.append_child(parent, &instance)?,
                }
            }
            return Ok(());
        }
        let children: SmallVec<[FiberId; 8]> = self.tree.children(fiber).collect();
        for child in children {
            self.insert_or_append_placement_node(child, before, parent)?;
        }
        Ok(())
    }

    /// The host node that `fiber`'s nodes must be inserted before: the first
    /// host node after it in tree order that is already in place.
    fn host_sibling(&self, fiber: FiberId) -> Option<H::Instance> {
        let mut node = fiber;
        'siblings: loop {
            while self.tree[node].sibling.is_none() {
                let parent = self.tree[node].return_?;
                if matches!(self.tree[parent].tag, WorkTag::HostComponent | WorkTag::HostRoot) {
                    return None;
                }
                node = parent;
            }
            node = self.tree[node].sibling?;
            while !self.tree[node].tag.is_host() {
                if self.tree[node].flags.contains(Flags::PLACEMENT) {
                    continue 'siblings;
                }
                match self.tree[node].child {
                    Some(child) => node = child,
                    None => continue 'siblings,
                }
            }
            if !self.tree[node].flags.contains(Flags::PLACEMENT) {
                return self.tree[node].state_node.clone();
            }
        }
    }

    /// Nearest host ancestor of `fiber` (itself excluded) and its instance.
    fn host_parent(&self, fiber: FiberId) -> Option<(FiberId, H::Instance)> {
        let mut node = self.tree[fiber].return_;
        while let Some(id) = node {
            match self.tree[id].tag {
                WorkTag::HostComponent => {
                    return self.tree[id].state_node.clone().map(|inst| (id, inst));
                }
                WorkTag::HostRoot => return Some((id, self.container.clone())),
                _ => node = self.tree[id].return_,
            }
        }
        None
    }

    fn host_parent_inclusive(&self, fiber: FiberId) -> Option<H::Instance> {
        match self.tree[fiber].tag {
            WorkTag::HostComponent => self.tree[fiber].state_node.clone(),
            WorkTag::HostRoot => Some(self.container.clone()),
            _ => self.host_parent(fiber).map(|(_, instance)| instance),
        }
    }

    // --- Layout ---

    fn commit_layout_effects(&mut self, fiber: FiberId) {
        if self.tree[fiber].subtree_flags.intersects(Flags::LAYOUT_MASK) {
            let children: SmallVec<[FiberId; 8]> = self.tree.children(fiber).collect();
            for child in children {
                self.commit_layout_effects(child);
            }
        }
        let node = &self.tree[fiber];
        if node.tag == WorkTag::FunctionComponent && node.flags.contains(Flags::UPDATE) {
            for effect in node.update_queue.effects() {
                if effect.matches(HookFlags::LAYOUT | HookFlags::HAS_EFFECT) {
                    effect.run_setup();
                }
            }
        }
    }

    /// Passive effects of the committed tree whose dependencies changed,
    /// children before parents.
    fn collect_passive_effects(&self, fiber: FiberId, effects: &mut Vec<Effect>) {
        let node = &self.tree[fiber];
        if node.subtree_flags.contains(Flags::PASSIVE) {
            for child in self.tree.children(fiber) {
                self.collect_passive_effects(child, effects);
            }
        }
        if node.tag == WorkTag::FunctionComponent && node.flags.contains(Flags::PASSIVE) {
            effects.extend(
                node.update_queue
                    .effects()
                    .iter()
                    .filter(|effect| effect.matches(HookFlags::PASSIVE | HookFlags::HAS_EFFECT))
                    .cloned(),
            );
        }
    }
}

// ============================================================================
// Commit and passive flush
// ============================================================================

impl<H: HostConfig> RootInner<H> {
    /// Apply the finished tree rooted at `state.wip_root`.
    pub(crate) fn commit_root(&self, state: &mut RootState<H>, lanes: Lanes) -> Result<()> {
        let Some(finished) = state.wip_root else {
            return Ok(());
        };
        let span = debug_span!(
            target: "fibra.commit",
            "fibra.commit",
            lanes = %describe_lanes(lanes),
            remaining_lanes = tracing::field::Empty,
        );
        let _guard = span.enter();

        self.clear_callback();
        let previous = self.update_priority.replace(Some(EventPriority::Discrete));
        let mut out = CommitOutput::default();
        let mutated = state.commit_mutation_effects(finished, &mut out);
        if mutated.is_ok() {
            state.current = finished;
            state.commit_layout_effects(finished);
        }
        self.update_priority.set(previous);
        mutated?;

        let mut effects = Vec::new();
        state.collect_passive_effects(finished, &mut effects);

        let freed: usize = out
            .deleted_fibers
            .iter()
            .map(|&fiber| state.tree.free_subtree(fiber))
            .sum();

        let root = &state.tree[finished];
        let remaining = merge_lanes(
            merge_lanes(root.lanes, root.child_lanes),
            self.interleaved.replace(NO_LANES),
        );
        self.lanes.borrow_mut().mark_finished(remaining);
        span.record("remaining_lanes", tracing::field::display(describe_lanes(remaining)));

        // The buffers just swapped; keep the now-alternate fibers in step so
        // idle checks see the committed lanes.
        for fiber in std::mem::take(&mut state.rendered) {
            let Some(lanes) = state.tree.get(fiber).map(|f| f.lanes) else {
                continue;
            };
            if let Some(alt) = state.tree.alternate_of(fiber) {
                state.tree[alt].lanes = lanes;
            }
        }
        state.wip_root = None;
        state.wip = None;
        state.wip_lanes = NO_LANES;

        if includes_sync_lane(remaining) {
            self.nested_updates.set(self.nested_updates.get() + 1);
        } else {
            self.nested_updates.set(0);
        }
        self.record(|s| {
            s.commits += 1;
            s.fibers_freed += freed as u64;
        });
        debug!(
            target: "fibra.commit",
            deleted = out.deleted_fibers.len(),
            passive = effects.len(),
            freed,
            "commit complete"
        );

        self.enqueue_passive(lanes, out.deleted_effects, effects);
        Ok(())
    }

    fn enqueue_passive(&self, lanes: Lanes, deleted: Vec<Effect>, effects: Vec<Effect>) {
        if deleted.is_empty() && effects.is_empty() {
            return;
        }
        let mut passive = self.passive.borrow_mut();
        let pending = passive.get_or_insert_with(PendingPassive::default);
        pending.lanes = merge_lanes(pending.lanes, lanes);
        pending.deleted.extend(deleted);
        pending.effects.extend(effects);
        if pending.task.is_some() {
            return;
        }
        let root = self.weak();
        let scheduled = self.scheduler.schedule_callback(PriorityLevel::Normal, move |_| {
            if let Some(root) = root.upgrade() {
                root.flush_passive_effects().map_err(fibra_scheduler::TaskError::new)?;
            }
            Ok(TaskStatus::Complete)
        });
        match scheduled {
            Ok(handle) => pending.task = Some(handle),
            Err(err) => {
                warn!(target: "fibra.commit", error = %err, "passive effects will run with the next render");
            }
        }
    }

    /// Run pending passive effects: teardowns of unmounted components, then
    /// every teardown, then every setup. Returns whether anything ran.
    pub(crate) fn flush_passive_effects(&self) -> Result<bool> {
        if self.is_busy() {
            return Ok(false);
        }
        let Some(pending) = self.passive.borrow_mut().take() else {
            return Ok(false);
        };
        if let Some(task) = &pending.task {
            self.scheduler.cancel_callback(task);
        }
        if pending.is_empty() {
            return Ok(false);
        }

        let priority = EventPriority::Default.max(lanes_to_event_priority(pending.lanes));
        self.run_with_priority(priority, || {
            let _span = debug_span!(
                target: "fibra.commit",
                "fibra.passive",
                effects = pending.effects.len(),
                deleted = pending.deleted.len(),
            )
            .entered();
            for effect in &pending.deleted {
                effect.run_teardown();
            }
            for effect in &pending.effects {
                effect.run_teardown();
            }
            for effect in &pending.effects {
                effect.run_setup();
            }
        });
        self.record(|s| s.passive_flushes += 1);
        self.flush_sync_callbacks()?;
        Ok(true)
    }
}
