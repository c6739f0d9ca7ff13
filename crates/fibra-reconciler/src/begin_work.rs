//! Begin phase: render one fiber and reconcile its children.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::child_reconciler::reconcile_children;
use crate::element::{Node, Props};
use crate::error::{ReconcileError, Result};
use crate::fiber::{FiberId, FiberQueue, FiberState, FiberType, WorkTag};
use crate::flags::Flags;
use crate::hooks::{HookCx, UpdateSink};
use crate::host::HostConfig;
use crate::lane::{Lanes, NO_LANES, includes_some_lane, merge_lanes, remove_lanes};
use crate::work_loop::RootState;

impl<H: HostConfig> RootState<H> {
    /// Render `wip` for `lanes`. Returns the first child to descend into, or
    /// `None` when the subtree below `wip` is done.
    pub(crate) fn begin_work(
        &mut self,
        wip: FiberId,
        lanes: Lanes,
        sink: &Weak<dyn UpdateSink>,
    ) -> Result<Option<FiberId>> {
        let current = self.tree.alternate_of(wip);
        if let Some(current) = current {
            let old = &self.tree[current];
            if old.memoized_props.same(&self.tree[wip].pending_props)
                && !includes_some_lane(old.lanes, lanes)
            {
                return Ok(self.bailout_on_already_finished_work(wip, lanes));
            }
        }

        self.tree[wip].lanes = NO_LANES;
        match self.tree[wip].tag {
            WorkTag::HostRoot => Ok(self.update_host_root(current, wip, lanes)),
            WorkTag::HostComponent => Ok(self.update_host_component(current, wip, lanes)),
            WorkTag::HostText => Ok(None),
            WorkTag::FunctionComponent | WorkTag::IndeterminateComponent => {
                self.update_function_component(current, wip, lanes, sink)
            }
        }
    }

    fn update_host_root(&mut self, current: Option<FiberId>, wip: FiberId, lanes: Lanes) -> Option<FiberId> {
        let prev_element = self.tree[wip]
            .memoized_element()
            .map(|state| state.element.clone())
            .unwrap_or_default();

        let FiberQueue::Root(mut queue) = std::mem::take(&mut self.tree[wip].update_queue) else {
            return None;
        };
        match current {
            Some(current) => queue.absorb_pending(self.tree[current].root_queue_mut()),
            None => queue.absorb_pending(None),
        }
        let (next_state, skipped) = queue.process(&Props::new(), lanes);
        let element = next_state.element.clone();

        let fiber = &mut self.tree[wip];
        fiber.update_queue = FiberQueue::Root(queue);
        fiber.memoized_state = FiberState::Root(next_state);
        fiber.lanes = skipped;

        if element.same(&prev_element) {
            return self.bailout_on_already_finished_work(wip, lanes);
        }
        reconcile_children(&mut self.tree, current, wip, &element, lanes);
        self.tree[wip].child
    }

    fn update_host_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        lanes: Lanes,
    ) -> Option<FiberId> {
        let FiberType::Host(ty) = &self.tree[wip].ty else {
            return None;
        };
        let ty = Rc::clone(ty);
        let props = self.tree[wip].props().cloned().unwrap_or_default();
        let inline_text = self.host.should_inline_text_child(&ty, &props);
        let next_children = if inline_text {
            Node::Empty
        } else {
            props.children.clone()
        };

        if let Some(current) = current {
            let was_inline = self.tree[current]
                .memoized_props
                .props()
                .is_some_and(|prev| self.host.should_inline_text_child(&ty, prev));
            if was_inline && !inline_text {
                self.tree[wip].flags |= Flags::CONTENT_RESET;
            }
        }
        self.mark_ref(current, wip);

        reconcile_children(&mut self.tree, current, wip, &next_children, lanes);
        self.tree[wip].child
    }

    fn update_function_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        lanes: Lanes,
        sink: &Weak<dyn UpdateSink>,
    ) -> Result<Option<FiberId>> {
        let FiberType::Component(component) = self.tree[wip].ty.clone() else {
            return Ok(None);
        };
        let props = self.tree[wip].props().cloned().unwrap_or_default();

        // The committed records are lent to the render and handed back
        // whatever the outcome, so a failed pass leaves them intact.
        let committed = current.and_then(|current| self.tree[current].hooks().cloned());
        let prev = committed
            .as_ref()
            .map(|list| std::mem::take(&mut *list.borrow_mut()))
            .unwrap_or_default();
        let did_receive_update = current.is_none_or(|current| {
            !self.tree[current]
                .memoized_props
                .same(&self.tree[wip].pending_props)
        });

        let mut cx = HookCx::new(
            wip,
            committed.is_some(),
            prev,
            Weak::clone(sink),
            lanes,
            did_receive_update,
        );
        let children = component.render(&mut cx, &props);
        let (rendered, prev) = cx.finish();
        if let Some(list) = &committed {
            *list.borrow_mut() = prev;
        }
        let children = children.map_err(|err| ReconcileError::from_render(component.name(), err))?;
        let rendered = rendered.map_err(|source| ReconcileError::Hook {
            component: component.name().to_owned(),
            source,
        })?;

        let fiber = &mut self.tree[wip];
        fiber.tag = WorkTag::FunctionComponent;
        fiber.memoized_state = FiberState::Hooks(Rc::new(RefCell::new(rendered.hooks)));
        fiber.update_queue = FiberQueue::Effects(rendered.effects.into());
        fiber.flags |= rendered.flags;
        fiber.lanes = merge_lanes(fiber.lanes, rendered.skipped_lanes);

        if let Some(current) = current
            && !rendered.did_receive_update
        {
            self.bailout_hooks(current, wip, lanes);
            return Ok(self.bailout_on_already_finished_work(wip, lanes));
        }
        reconcile_children(&mut self.tree, current, wip, &children, lanes);
        Ok(self.tree[wip].child)
    }

    // --- Bail-out ---

    /// Keep the committed effects of a component whose render changed
    /// nothing, and drop the lanes this pass consumed.
    fn bailout_hooks(&mut self, current: FiberId, wip: FiberId, lanes: Lanes) {
        let effects = self.tree[current].update_queue.clone();
        let fiber = &mut self.tree[wip];
        fiber.update_queue = effects;
        fiber.flags.remove(Flags::PASSIVE | Flags::UPDATE);
        let old = &mut self.tree[current];
        old.lanes = remove_lanes(old.lanes, lanes);
    }

    fn bailout_on_already_finished_work(&mut self, wip: FiberId, lanes: Lanes) -> Option<FiberId> {
        if !includes_some_lane(lanes, self.tree[wip].child_lanes) {
            return None;
        }
        self.clone_child_fibers(wip);
        self.tree[wip].child
    }

    /// Replace the committed children `wip` still points at with
    /// work-in-progress clones carrying the same props.
    fn clone_child_fibers(&mut self, wip: FiberId) {
        let children: SmallVec<[FiberId; 8]> = self.tree.children(wip).collect();
        let mut previous: Option<FiberId> = None;
        for child in children {
            let props = self.tree[child].pending_props.clone();
            let clone = self.tree.create_work_in_progress(child, props);
            self.tree[clone].return_ = Some(wip);
            match previous {
                Some(prev) => self.tree[prev].sibling = Some(clone),
                None => self.tree[wip].child = Some(clone),
            }
            previous = Some(clone);
        }
        if let Some(last) = previous {
            self.tree[last].sibling = None;
        }
    }

    fn mark_ref(&mut self, current: Option<FiberId>, wip: FiberId) {
        let next = &self.tree[wip].host_ref;
        let changed = match current {
            None => next.is_some(),
            Some(current) => self.tree[current].host_ref != *next,
        };
        if changed {
            self.tree[wip].flags |= Flags::REF;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Component, Element};
    use crate::fiber::FiberProps;
    use crate::lane::{DEFAULT_LANE, Lane, SYNC_LANE};
    use crate::testing::MemoryHost;
    use crate::update_queue::{HostRootState, StatePayload, Update};
    use std::time::Duration;

    struct NullSink;

    impl UpdateSink for NullSink {
        fn request_update_lane(&self) -> Lane {
            DEFAULT_LANE
        }
        fn request_event_time(&self) -> Duration {
            Duration::ZERO
        }
        fn fiber_is_idle(&self, _fiber: FiberId) -> bool {
            false
        }
        fn enqueue_update(&self, _fiber: FiberId, _lane: Lane, apply: Box<dyn FnOnce()>) {
            apply();
        }
        fn schedule_update_on_fiber(&self, _fiber: FiberId, _lane: Lane, _t: Duration) -> Result<()> {
            Ok(())
        }
        fn record_eager_bailout(&self) {}
    }

    fn state() -> (RootState<MemoryHost>, Rc<NullSink>) {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let mut tree = crate::fiber::FiberTree::new();
        let root = tree.create_host_root();
        let state = RootState {
            host,
            tree,
            container,
            current: root,
            wip_root: None,
            wip: None,
            wip_lanes: NO_LANES,
            rendered: Vec::new(),
        };
        (state, Rc::new(NullSink))
    }

    fn sink(sink: &Rc<NullSink>) -> Weak<dyn UpdateSink> {
        Rc::downgrade(sink) as Weak<dyn UpdateSink>
    }

    fn push_root_element(state: &mut RootState<MemoryHost>, lane: Lane, node: Node) {
        let queue = state.tree[state.current].root_queue_mut().unwrap();
        queue
            .shared
            .borrow_mut()
            .push(Update::new(lane, StatePayload::Replace(HostRootState { element: node })));
    }

    /// Mark `lanes` on the committed root, then start a pass on it.
    fn root_wip(state: &mut RootState<MemoryHost>, lanes: Lanes) -> FiberId {
        let root = state.current;
        state.tree[root].lanes = lanes;
        state.tree.create_work_in_progress(root, FiberProps::None)
    }

    #[test]
    fn host_root_processes_queue_and_reconciles() {
        let (mut state, null) = state();
        push_root_element(&mut state, DEFAULT_LANE, Element::host("div").key("a").into());
        let wip = root_wip(&mut state, DEFAULT_LANE);

        let child = state.begin_work(wip, DEFAULT_LANE, &sink(&null)).unwrap().unwrap();
        assert_eq!(state.tree[child].tag, WorkTag::HostComponent);
        assert_eq!(state.tree[child].return_, Some(wip));
        assert!(state.tree[wip].flags.is_empty(), "first mount places nothing");
    }

    #[test]
    fn skipped_root_update_keeps_its_lane() {
        let (mut state, null) = state();
        push_root_element(&mut state, DEFAULT_LANE, Element::host("div").into());
        let wip = root_wip(&mut state, DEFAULT_LANE | SYNC_LANE);

        let child = state.begin_work(wip, SYNC_LANE, &sink(&null)).unwrap();
        assert_eq!(child, None, "element unchanged, nothing below has work");
        assert_eq!(state.tree[wip].lanes, DEFAULT_LANE);

        let current = state.current;
        let queue = state.tree[current].root_queue_mut().unwrap();
        assert_eq!(queue.base_queue.len(), 1, "deferred update survives on the committed queue");
    }

    #[test]
    fn untouched_root_bails_out_without_processing() {
        let (mut state, null) = state();
        push_root_element(&mut state, DEFAULT_LANE, Element::host("div").into());
        let wip = root_wip(&mut state, NO_LANES);
        assert_eq!(state.begin_work(wip, DEFAULT_LANE, &sink(&null)).unwrap(), None);
        let queue = state.tree[wip].root_queue_mut().unwrap();
        assert_eq!(queue.shared.borrow().len(), 1, "pending update left untouched");
    }

    #[test]
    fn inline_text_child_is_not_materialized() {
        let (mut state, null) = state();
        let el = Element::host("p").text("hello").into_element();
        let fiber = state.tree.create_fiber_from_element(&el, DEFAULT_LANE);
        assert_eq!(state.begin_work(fiber, DEFAULT_LANE, &sink(&null)).unwrap(), None);
        assert_eq!(state.tree[fiber].child, None);
    }

    #[test]
    fn indeterminate_component_becomes_function_component() {
        let (mut state, null) = state();
        let app = Component::new("App", |cx, _| {
            let (n, _) = cx.use_state(|| 1)?;
            Ok(Element::host("span").text(n.to_string()).into())
        });
        let fiber = state.tree.create_fiber_from_element(&app.element().into_element(), DEFAULT_LANE);
        assert_eq!(state.tree[fiber].tag, WorkTag::IndeterminateComponent);

        let child = state.begin_work(fiber, DEFAULT_LANE, &sink(&null)).unwrap();
        assert!(child.is_some());
        assert_eq!(state.tree[fiber].tag, WorkTag::FunctionComponent);
        assert_eq!(state.tree[fiber].hooks().unwrap().borrow().len(), 1);
    }

    #[test]
    fn component_error_names_the_component() {
        let (mut state, null) = state();
        let broken = Component::new("Broken", |_, _| Err(crate::error::RenderError::msg("boom")));
        let fiber = state
            .tree
            .create_fiber_from_element(&broken.element().into_element(), DEFAULT_LANE);
        let err = state.begin_work(fiber, DEFAULT_LANE, &sink(&null)).unwrap_err();
        assert_eq!(err.to_string(), "component `Broken` failed to render: boom");
    }

    #[test]
    fn ref_flag_set_on_mount_with_ref() {
        let (mut state, null) = state();
        let el = Element::host("input").host_ref(crate::element::HostRef::new()).into_element();
        let fiber = state.tree.create_fiber_from_element(&el, DEFAULT_LANE);
        state.begin_work(fiber, DEFAULT_LANE, &sink(&null)).unwrap();
        assert!(state.tree[fiber].flags.contains(Flags::REF));
    }
}
