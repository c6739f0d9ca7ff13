//! Complete phase: create or diff host instances and bubble effects up.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::Result;
use crate::fiber::{FiberId, FiberType, WorkTag};
use crate::flags::Flags;
use crate::host::HostConfig;
use crate::lane::{NO_LANES, merge_lanes};
use crate::work_loop::RootState;

impl<H: HostConfig> RootState<H> {
    /// Finish `wip` after all of its children have completed.
    pub(crate) fn complete_work(&mut self, wip: FiberId) -> Result<()> {
        let current = self.tree.alternate_of(wip);
        match self.tree[wip].tag {
            WorkTag::HostComponent => self.complete_host_component(current, wip)?,
            WorkTag::HostText => self.complete_host_text(current, wip)?,
            WorkTag::HostRoot | WorkTag::FunctionComponent | WorkTag::IndeterminateComponent => {}
        }
        self.bubble_properties(current, wip);
        Ok(())
    }

    fn complete_host_component(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<()> {
        let FiberType::Host(ty) = &self.tree[wip].ty else {
            return Ok(());
        };
        let ty = Rc::clone(ty);
        let Some(new_props) = self.tree[wip].memoized_props.props().cloned() else {
            return Ok(());
        };

        let existing = current.and(self.tree[wip].state_node.clone());
        match (current, existing) {
            (Some(current), Some(instance)) => {
                let Some(old_props) = self.tree[current].memoized_props.props().cloned() else {
                    return Ok(());
                };
                if Rc::ptr_eq(&old_props, &new_props) {
                    return Ok(());
                }
                let payload = self
                    .host
                    .prepare_update_payload(&instance, &ty, &old_props, &new_props)?;
                if payload.is_some() {
                    let fiber = &mut self.tree[wip];
                    fiber.update_payload = payload;
                    fiber.flags |= Flags::UPDATE;
                }
            }
            _ => {
                let instance = self.host.create_instance(&ty, &new_props)?;
                self.append_all_children(&instance, wip)?;
                self.host
                    .finalize_initial_properties(&instance, &ty, &new_props)?;
                self.tree[wip].state_node = Some(instance);
            }
        }
        Ok(())
    }

    fn complete_host_text(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<()> {
        let Some(text) = self.tree[wip].memoized_props.text().cloned() else {
            return Ok(());
        };
        match current.filter(|_| self.tree[wip].state_node.is_some()) {
            Some(current) => {
                if self.tree[current].memoized_props.text() != Some(&text) {
                    self.tree[wip].flags |= Flags::UPDATE;
                }
            }
            None => {
                let instance = self.host.create_text_instance(&text)?;
                self.tree[wip].state_node = Some(instance);
            }
        }
        Ok(())
    }

    /// Attach the top-level host nodes below `fiber` to a fresh `parent`.
    fn append_all_children(&mut self, parent: &H::Instance, fiber: FiberId) -> Result<()> {
        let children: SmallVec<[FiberId; 8]> = self.tree.children(fiber).collect();
        for child in children {
            if self.tree[child].tag.is_host() {
                if let Some(instance) = self.tree[child].state_node.clone() {
                    self.host.append_initial_child(parent, &instance)?;
                }
            } else {
                self.append_all_children(parent, child)?;
            }
        }
        Ok(())
    }

    /// Fold the lanes and effects of the children of `wip` into it. Children
    /// left over from a bail-out carry effects that were already committed,
    /// so only their lanes count.
    fn bubble_properties(&mut self, current: Option<FiberId>, wip: FiberId) {
        let did_bailout = current.is_some_and(|current| self.tree[current].child == self.tree[wip].child);
        let children: SmallVec<[FiberId; 8]> = self.tree.children(wip).collect();
        let mut child_lanes = NO_LANES;
        let mut subtree_flags = Flags::empty();
        for child in children {
            let fiber = &mut self.tree[child];
            child_lanes = merge_lanes(child_lanes, merge_lanes(fiber.lanes, fiber.child_lanes));
            if !did_bailout {
                subtree_flags |= fiber.flags | fiber.subtree_flags;
            }
            fiber.return_ = Some(wip);
        }
        let fiber = &mut self.tree[wip];
        fiber.child_lanes = child_lanes;
        fiber.subtree_flags = subtree_flags;
    }
}
