//! Host backend interface.
//!
//! The reconciler never touches a native tree directly. Everything it needs
//! from the outside world goes through [`HostConfig`]: creating nodes,
//! wiring them together, diffing and applying properties, and reporting the
//! priority of the event currently being dispatched.

use std::fmt;

use crate::element::Props;
use crate::error::HostError;
use crate::event_priority::EventPriority;

/// A mutable native tree the reconciler renders into.
///
/// Instances are cheap handles (ids, `Rc`s, ...). The root container passed
/// to [`Root::create`](crate::Root::create) is itself an instance.
pub trait HostConfig: 'static {
    /// Handle to a native node.
    type Instance: Clone + fmt::Debug + 'static;
    /// Precomputed property diff produced during render, applied at commit.
    type UpdatePayload: fmt::Debug + 'static;

    fn create_instance(&mut self, ty: &str, props: &Props) -> Result<Self::Instance, HostError>;

    fn create_text_instance(&mut self, text: &str) -> Result<Self::Instance, HostError>;

    /// Attach a child to a parent that is not yet part of the visible tree.
    fn append_initial_child(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
    ) -> Result<(), HostError>;

    /// Move or insert `child` as the last child of `parent`.
    fn append_child(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
    ) -> Result<(), HostError>;

    /// Move or insert `child` right before `before`.
    fn insert_before(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
        before: &Self::Instance,
    ) -> Result<(), HostError>;

    fn remove_child(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
    ) -> Result<(), HostError>;

    /// Apply the initial properties of a freshly created instance.
    fn finalize_initial_properties(
        &mut self,
        instance: &Self::Instance,
        ty: &str,
        props: &Props,
    ) -> Result<(), HostError> {
        let _ = (instance, ty, props);
        Ok(())
    }

    /// Diff `old` against `new`. `None` means nothing to apply.
    fn prepare_update_payload(
        &mut self,
        instance: &Self::Instance,
        ty: &str,
        old: &Props,
        new: &Props,
    ) -> Result<Option<Self::UpdatePayload>, HostError>;

    fn apply_update_payload(
        &mut self,
        instance: &Self::Instance,
        payload: Self::UpdatePayload,
        ty: &str,
        old: &Props,
        new: &Props,
    ) -> Result<(), HostError>;

    fn commit_text_update(
        &mut self,
        instance: &Self::Instance,
        old: &str,
        new: &str,
    ) -> Result<(), HostError>;

    /// Clear inline text content before element children are placed.
    fn reset_text_content(&mut self, instance: &Self::Instance) -> Result<(), HostError>;

    /// Whether `props.children` is rendered as a property of the instance
    /// instead of a separate text node.
    fn should_inline_text_child(&self, ty: &str, props: &Props) -> bool {
        let _ = ty;
        props.children.as_text().is_some()
    }

    /// Priority of the event currently being dispatched, used when no
    /// explicit update priority is set.
    fn current_event_priority(&self) -> EventPriority {
        EventPriority::Default
    }
}
