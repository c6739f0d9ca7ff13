//! In-memory host backend for tests.
//!
//! [`MemoryHost`] keeps a plain node table, logs every primitive it is asked
//! to perform, and can be told to fail the next call of a given primitive.
//! [`MemoryHost::to_markup`] renders a subtree as compact markup for
//! assertions.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::rc::Rc;

use crate::element::{AttrChange, PropValue, Props};
use crate::error::HostError;
use crate::event_priority::EventPriority;
use crate::host::HostConfig;

/// Handle to a node of a [`MemoryHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One primitive call, as recorded by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    Create { node: NodeId, tag: String },
    CreateText { node: NodeId, text: String },
    AppendInitial { parent: NodeId, child: NodeId },
    Append { parent: NodeId, child: NodeId },
    InsertBefore { parent: NodeId, child: NodeId, before: NodeId },
    Remove { parent: NodeId, child: NodeId },
    Update { node: NodeId, changed: Vec<String> },
    SetText { node: NodeId, text: String },
    ResetText { node: NodeId },
}

impl HostOp {
    /// Whether the op touched a node that was already attached.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::Create { .. } | Self::CreateText { .. } | Self::AppendInitial { .. }
        )
    }
}

/// Diff produced by [`MemoryHost::prepare_update_payload`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryUpdate {
    pub attrs: Vec<AttrChange>,
    /// `Some` when the inline text changed.
    pub text: Option<Option<String>>,
}

#[derive(Debug, Clone)]
enum MemoryNodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, PropValue>,
        text: Option<String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct MemoryNode {
    kind: MemoryNodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Host backend that renders into an in-memory node table.
#[derive(Debug, Default)]
pub struct MemoryHost {
    nodes: Vec<MemoryNode>,
    ops: Vec<HostOp>,
    fail_next: Option<&'static str>,
    event_priority: EventPriority,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a container node to render into.
    pub fn create_container(&mut self) -> NodeId {
        self.alloc(MemoryNodeKind::Element {
            tag: "root".into(),
            attrs: BTreeMap::new(),
            text: None,
        })
    }

    /// Recorded primitive calls, oldest first.
    #[must_use]
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Make the next call of primitive `op` (for example `"insert_before"`)
    /// fail.
    pub fn fail_next(&mut self, op: &'static str) {
        self.fail_next = Some(op);
    }

    /// Priority reported by [`HostConfig::current_event_priority`].
    pub fn set_event_priority(&mut self, priority: EventPriority) {
        self.event_priority = priority;
    }

    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0 as usize)
            .map_or(&[], |n| n.children.as_slice())
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0 as usize).and_then(|n| n.parent)
    }

    #[must_use]
    pub fn attr(&self, node: NodeId, name: &str) -> Option<&PropValue> {
        match &self.nodes.get(node.0 as usize)?.kind {
            MemoryNodeKind::Element { attrs, .. } => attrs.get(name),
            MemoryNodeKind::Text(_) => None,
        }
    }

    /// Number of nodes ever created, container included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Markup of the children of `node` (the container is not printed).
    #[must_use]
    pub fn to_markup(&self, node: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(node) {
            self.write_markup(child, &mut out);
        }
        out
    }

    fn write_markup(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id.0 as usize];
        match &node.kind {
            MemoryNodeKind::Text(text) => out.push_str(text),
            MemoryNodeKind::Element { tag, attrs, text } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                if text.is_none() && node.children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                if let Some(text) = text {
                    out.push_str(text);
                }
                for &child in &node.children {
                    self.write_markup(child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    fn alloc(&mut self, kind: MemoryNodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(MemoryNode {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn check(&mut self, op: &'static str) -> Result<(), HostError> {
        if self.fail_next == Some(op) {
            self.fail_next = None;
            return Err(HostError::new(op, "injected failure"));
        }
        Ok(())
    }

    fn node_mut(&mut self, id: NodeId, op: &'static str) -> Result<&mut MemoryNode, HostError> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or_else(|| HostError::new(op, format!("unknown node {id}")))
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.nodes[child.0 as usize].parent.take() else {
            return;
        };
        self.nodes[parent.0 as usize].children.retain(|&c| c != child);
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>, op: &'static str) -> Result<(), HostError> {
        self.node_mut(child, op)?;
        self.node_mut(parent, op)?;
        self.detach(child);
        let siblings = &mut self.nodes[parent.0 as usize].children;
        let at = match before {
            Some(anchor) => siblings
                .iter()
                .position(|&c| c == anchor)
                .ok_or_else(|| HostError::new(op, format!("{anchor} is not a child of {parent}")))?,
            None => siblings.len(),
        };
        siblings.insert(at, child);
        self.nodes[child.0 as usize].parent = Some(parent);
        Ok(())
    }
}

impl HostConfig for MemoryHost {
    type Instance = NodeId;
    type UpdatePayload = MemoryUpdate;

    fn create_instance(&mut self, ty: &str, props: &Props) -> Result<NodeId, HostError> {
        self.check("create_instance")?;
        let id = self.alloc(MemoryNodeKind::Element {
            tag: ty.to_owned(),
            attrs: BTreeMap::new(),
            text: None,
        });
        let _ = props;
        self.ops.push(HostOp::Create {
            node: id,
            tag: ty.to_owned(),
        });
        Ok(id)
    }

    fn create_text_instance(&mut self, text: &str) -> Result<NodeId, HostError> {
        self.check("create_text_instance")?;
        let id = self.alloc(MemoryNodeKind::Text(text.to_owned()));
        self.ops.push(HostOp::CreateText {
            node: id,
            text: text.to_owned(),
        });
        Ok(id)
    }

    fn append_initial_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<(), HostError> {
        self.check("append_initial_child")?;
        self.attach(*parent, *child, None, "append_initial_child")?;
        self.ops.push(HostOp::AppendInitial {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn append_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<(), HostError> {
        self.check("append_child")?;
        self.attach(*parent, *child, None, "append_child")?;
        self.ops.push(HostOp::Append {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn insert_before(&mut self, parent: &NodeId, child: &NodeId, before: &NodeId) -> Result<(), HostError> {
        self.check("insert_before")?;
        self.attach(*parent, *child, Some(*before), "insert_before")?;
        self.ops.push(HostOp::InsertBefore {
            parent: *parent,
            child: *child,
            before: *before,
        });
        Ok(())
    }

    fn remove_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<(), HostError> {
        self.check("remove_child")?;
        if self.node_mut(*child, "remove_child")?.parent != Some(*parent) {
            return Err(HostError::new(
                "remove_child",
                format!("{child} is not a child of {parent}"),
            ));
        }
        self.detach(*child);
        self.ops.push(HostOp::Remove {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn finalize_initial_properties(&mut self, instance: &NodeId, _ty: &str, props: &Props) -> Result<(), HostError> {
        self.check("finalize_initial_properties")?;
        let node = self.node_mut(*instance, "finalize_initial_properties")?;
        if let MemoryNodeKind::Element { attrs, text, .. } = &mut node.kind {
            attrs.extend(props.attrs().map(|(k, v)| (k.to_owned(), v.clone())));
            *text = props.text().map(str::to_owned);
        }
        Ok(())
    }

    fn prepare_update_payload(
        &mut self,
        _instance: &NodeId,
        _ty: &str,
        old: &Props,
        new: &Props,
    ) -> Result<Option<MemoryUpdate>, HostError> {
        let attrs = old.diff_attrs(new);
        let text = (old.text() != new.text()).then(|| new.text().map(str::to_owned));
        if attrs.is_empty() && text.is_none() {
            return Ok(None);
        }
        Ok(Some(MemoryUpdate { attrs, text }))
    }

    fn apply_update_payload(
        &mut self,
        instance: &NodeId,
        payload: MemoryUpdate,
        _ty: &str,
        _old: &Props,
        _new: &Props,
    ) -> Result<(), HostError> {
        self.check("apply_update_payload")?;
        let mut changed: Vec<String> = payload.attrs.iter().map(|(name, _)| name.clone()).collect();
        let node = self.node_mut(*instance, "apply_update_payload")?;
        if let MemoryNodeKind::Element { attrs, text, .. } = &mut node.kind {
            for (name, value) in payload.attrs {
                match value {
                    Some(value) => attrs.insert(name, value),
                    None => attrs.remove(&name),
                };
            }
            if let Some(next) = payload.text {
                *text = next;
                changed.push("#text".into());
            }
        }
        self.ops.push(HostOp::Update {
            node: *instance,
            changed,
        });
        Ok(())
    }

    fn commit_text_update(&mut self, instance: &NodeId, _old: &str, new: &str) -> Result<(), HostError> {
        self.check("commit_text_update")?;
        let node = self.node_mut(*instance, "commit_text_update")?;
        if let MemoryNodeKind::Text(text) = &mut node.kind {
            *text = new.to_owned();
        }
        self.ops.push(HostOp::SetText {
            node: *instance,
            text: new.to_owned(),
        });
        Ok(())
    }

    fn reset_text_content(&mut self, instance: &NodeId) -> Result<(), HostError> {
        self.check("reset_text_content")?;
        let node = self.node_mut(*instance, "reset_text_content")?;
        if let MemoryNodeKind::Element { text, .. } = &mut node.kind {
            *text = None;
        }
        self.ops.push(HostOp::ResetText { node: *instance });
        Ok(())
    }

    fn current_event_priority(&self) -> EventPriority {
        self.event_priority
    }
}

/// Shared, ordered log for effect and render assertions.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<std::cell::RefCell<Vec<String>>>);

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    /// Drain and return everything logged so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_detach_from_previous_position() {
        let mut host = MemoryHost::new();
        let root = host.create_container();
        let a = host.create_text_instance("a").unwrap();
        let b = host.create_text_instance("b").unwrap();
        host.append_child(&root, &a).unwrap();
        host.append_child(&root, &b).unwrap();
        host.insert_before(&root, &b, &a).unwrap();
        assert_eq!(host.to_markup(root), "ba");
        assert_eq!(host.children(root), &[b, a]);
    }

    #[test]
    fn markup_includes_attrs_and_inline_text() {
        let mut host = MemoryHost::new();
        let root = host.create_container();
        let props = Props::new().with("id", "x");
        let div = host.create_instance("div", &props).unwrap();
        let mut with_text = props.clone();
        with_text.children = "hi".into();
        host.finalize_initial_properties(&div, "div", &with_text).unwrap();
        let span = host.create_instance("span", &Props::new()).unwrap();
        host.append_initial_child(&div, &span).unwrap();
        host.append_child(&root, &div).unwrap();
        assert_eq!(host.to_markup(root), "<div id=\"x\">hi<span/></div>");
    }

    #[test]
    fn injected_failure_fires_once() {
        let mut host = MemoryHost::new();
        let root = host.create_container();
        let a = host.create_text_instance("a").unwrap();
        host.fail_next("append_child");
        let err = host.append_child(&root, &a).unwrap_err();
        assert_eq!(err.op(), "append_child");
        host.append_child(&root, &a).unwrap();
    }

    #[test]
    fn payload_covers_attrs_and_text() {
        let mut host = MemoryHost::new();
        let node = host.create_instance("p", &Props::new()).unwrap();
        let old = Props::new().with("a", 1);
        let mut new = Props::new().with("a", 2);
        assert!(host.prepare_update_payload(&node, "p", &old, &old).unwrap().is_none());
        new.children = "t".into();
        let payload = host.prepare_update_payload(&node, "p", &old, &new).unwrap().unwrap();
        assert_eq!(payload.text, Some(Some("t".into())));
        host.apply_update_payload(&node, payload, "p", &old, &new).unwrap();
        assert_eq!(host.attr(node, "a"), Some(&PropValue::Int(2)));
    }
}
