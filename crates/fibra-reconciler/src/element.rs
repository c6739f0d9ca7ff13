//! Declarative element trees.
//!
//! A [`Node`] is an immutable description of what the host tree should look
//! like. Elements are reference counted so re-rendering an unchanged subtree
//! hands the reconciler the very same `Rc`, which is how bail-outs detect
//! "nothing changed" without deep comparison.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::RenderError;
use crate::hooks::HookCx;

// ============================================================================
// Node
// ============================================================================

/// One position in an element tree.
#[derive(Clone, Default, PartialEq)]
pub enum Node {
    /// Renders nothing but still occupies a slot in a list.
    #[default]
    Empty,
    Text(Rc<str>),
    Element(Rc<Element>),
    /// Ordered children. Nested lists are flattened by the reconciler.
    List(Rc<[Node]>),
}

impl Node {
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn text(text: impl Into<Rc<str>>) -> Self {
        Self::Text(text.into())
    }

    pub fn list(items: impl IntoIterator<Item = Node>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Identity comparison: same allocation for elements and lists, same
    /// contents for text.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Element(a), Self::Element(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Element(element) => element.fmt(f),
            Self::List(items) => f.debug_list().entries(items.iter()).finish(),
        }
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Self::Text(text.into())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Self::Text(text.into())
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Self::List(items.into())
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(Rc::new(element))
    }
}

impl From<ElementBuilder> for Node {
    fn from(builder: ElementBuilder) -> Self {
        builder.build()
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(node: Option<T>) -> Self {
        node.map_or(Self::Empty, Into::into)
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Sibling identity. Compared by exact string equality.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Rc<str>);

impl Key {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self(key.into())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(key.into())
    }
}

macro_rules! key_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Key {
            fn from(key: $ty) -> Self {
                Self(key.to_string().into())
            }
        })*
    };
}

key_from_int!(u32, u64, usize, i32, i64);

// ============================================================================
// Props
// ============================================================================

/// A single property value.
#[derive(Clone)]
pub enum PropValue {
    Str(Rc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Arbitrary data, compared by allocation identity.
    Any(Rc<dyn Any>),
}

impl PropValue {
    /// Wrap arbitrary data.
    pub fn any<T: 'static>(value: T) -> Self {
        Self::Any(Rc::new(value))
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Any(a), Self::Any(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Any(_) => f.write_str("<any>"),
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            other => write!(f, "{other:?}"),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One changed attribute: `None` means removed.
pub type AttrChange = (String, Option<PropValue>);

/// Element properties: named attributes plus children.
#[derive(Clone, Default, PartialEq)]
pub struct Props {
    attrs: BTreeMap<String, PropValue>,
    pub children: Node,
}

impl Props {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropValue>) {
        self.attrs.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.attrs.get(name)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(PropValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(PropValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.attrs.get(name) {
            Some(PropValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Downcast an [`PropValue::Any`] attribute.
    #[must_use]
    pub fn get_any<T: 'static>(&self, name: &str) -> Option<Rc<T>> {
        match self.attrs.get(name) {
            Some(PropValue::Any(value)) => Rc::clone(value).downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Inline text child, if the children are a single text node.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.children.as_text()
    }

    /// Attributes that differ between `self` and `next`, sorted by name.
    #[must_use]
    pub fn diff_attrs(&self, next: &Props) -> Vec<AttrChange> {
        let mut changes = Vec::new();
        for (name, old) in &self.attrs {
            match next.attrs.get(name) {
                None => changes.push((name.clone(), None)),
                Some(new) if new != old => changes.push((name.clone(), Some(new.clone()))),
                Some(_) => {}
            }
        }
        for (name, new) in &next.attrs {
            if !self.attrs.contains_key(name) {
                changes.push((name.clone(), Some(new.clone())));
            }
        }
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        changes
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        map.entries(self.attrs.iter());
        if !self.children.is_empty() {
            map.entry(&"children", &self.children);
        }
        map.finish()
    }
}

// ============================================================================
// Host refs
// ============================================================================

/// Handle that receives a host instance when its element is committed.
#[derive(Clone, Default)]
pub struct HostRef {
    slot: Rc<RefCell<Option<Box<dyn Any>>>>,
}

impl HostRef {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The attached instance, if it has type `T`.
    #[must_use]
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.slot
            .borrow()
            .as_ref()
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub(crate) fn attach(&self, instance: Box<dyn Any>) {
        *self.slot.borrow_mut() = Some(instance);
    }

    pub(crate) fn detach(&self) {
        self.slot.borrow_mut().take();
    }
}

impl PartialEq for HostRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRef")
            .field("attached", &self.is_attached())
            .finish()
    }
}

// ============================================================================
// Components
// ============================================================================

/// Body of a function component.
pub type RenderFn = dyn Fn(&mut HookCx, &Props) -> Result<Node, RenderError>;

/// A function component.
///
/// Identity is the allocation of the render closure: clones of one
/// `Component` are the same type to the reconciler, two separately created
/// components are not, even with identical bodies.
#[derive(Clone)]
pub struct Component {
    name: Rc<str>,
    render: Rc<RenderFn>,
}

impl Component {
    pub fn new(
        name: impl Into<Rc<str>>,
        render: impl Fn(&mut HookCx, &Props) -> Result<Node, RenderError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            render: Rc::new(render),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start an element of this component.
    pub fn element(&self) -> ElementBuilder {
        ElementBuilder::new(ElementType::Component(self.clone()))
    }

    pub(crate) fn render(&self, cx: &mut HookCx, props: &Props) -> Result<Node, RenderError> {
        (self.render)(cx, props)
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.render, &other.render)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.name)
    }
}

// ============================================================================
// Elements
// ============================================================================

/// What an element renders as.
#[derive(Clone, PartialEq)]
pub enum ElementType {
    /// Native host node, by tag name.
    Host(Rc<str>),
    Component(Component),
}

impl ElementType {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Host(tag) => tag,
            Self::Component(component) => component.name(),
        }
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(tag) => f.write_str(tag),
            Self::Component(component) => component.fmt(f),
        }
    }
}

/// An element: type, optional key, props and optional host ref.
#[derive(Clone, PartialEq)]
pub struct Element {
    pub ty: ElementType,
    pub key: Option<Key>,
    pub props: Rc<Props>,
    pub host_ref: Option<HostRef>,
}

impl Element {
    /// Start a host element.
    pub fn host(tag: impl Into<Rc<str>>) -> ElementBuilder {
        ElementBuilder::new(ElementType::Host(tag.into()))
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.ty.name());
        if let Some(key) = &self.key {
            s.field("key", key);
        }
        s.field("props", &self.props).finish()
    }
}

/// Builder for [`Element`].
#[must_use]
pub struct ElementBuilder {
    ty: ElementType,
    key: Option<Key>,
    props: Props,
    children: Vec<Node>,
    as_list: bool,
    host_ref: Option<HostRef>,
}

impl ElementBuilder {
    fn new(ty: ElementType) -> Self {
        Self {
            ty,
            key: None,
            props: Props::default(),
            children: Vec::new(),
            as_list: false,
            host_ref: None,
        }
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.set(name, value);
        self
    }

    /// Alias of [`attr`](Self::attr) for component props.
    pub fn prop(self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.attr(name, value)
    }

    /// Append one child. A single child stays a single node.
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Append children as a list, even if there is only one.
    pub fn children<I, N>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self.as_list = true;
        self
    }

    /// Single text child.
    pub fn text(self, text: impl Into<Rc<str>>) -> Self {
        self.child(Node::Text(text.into()))
    }

    pub fn host_ref(mut self, host_ref: HostRef) -> Self {
        self.host_ref = Some(host_ref);
        self
    }

    #[must_use]
    pub fn build(self) -> Node {
        Node::Element(Rc::new(self.into_element()))
    }

    #[must_use]
    pub fn into_element(mut self) -> Element {
        self.props.children = match (self.as_list, self.children.len()) {
            (false, 0) => Node::Empty,
            (false, 1) => self.children.pop().unwrap_or_default(),
            _ => Node::List(self.children.into()),
        };
        Element {
            ty: self.ty,
            key: self.key,
            props: Rc::new(self.props),
            host_ref: self.host_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_child_is_not_wrapped() {
        let Node::Element(el) = Element::host("p").text("hi").build() else {
            panic!("expected element");
        };
        assert_eq!(el.props.text(), Some("hi"));
    }

    #[test]
    fn children_always_form_a_list() {
        let Node::Element(el) = Element::host("ul")
            .children([Element::host("li").key("a")])
            .build()
        else {
            panic!("expected element");
        };
        assert!(matches!(&el.props.children, Node::List(items) if items.len() == 1));
    }

    #[test]
    fn same_is_identity_for_elements() {
        let a = Element::host("div").build();
        let b = a.clone();
        let c = Element::host("div").build();
        assert!(a.same(&b));
        assert!(!a.same(&c));
        assert_eq!(a, c);
        assert!(Node::text("x").same(&Node::from("x")));
    }

    #[test]
    fn component_identity_is_closure_identity() {
        let a = Component::new("A", |_, _| Ok(Node::Empty));
        let b = Component::new("A", |_, _| Ok(Node::Empty));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn diff_attrs_reports_set_changed_and_removed() {
        let old = Props::new().with("a", 1).with("b", "x").with("c", true);
        let new = Props::new().with("a", 1).with("b", "y").with("d", 2.5);
        let diff = old.diff_attrs(&new);
        let names: Vec<_> = diff.iter().map(|(n, v)| (n.as_str(), v.is_some())).collect();
        assert_eq!(names, vec![("b", true), ("c", false), ("d", true)]);
    }

    #[test]
    fn any_props_downcast() {
        let props = Props::new().with("items", PropValue::any(vec![1, 2, 3]));
        assert_eq!(props.get_any::<Vec<i32>>("items").map(|v| v.len()), Some(3));
        assert!(props.get_any::<String>("items").is_none());
    }

    #[test]
    fn host_ref_attach_and_detach() {
        let r = HostRef::new();
        assert!(!r.is_attached());
        r.attach(Box::new(7usize));
        assert_eq!(r.get::<usize>(), Some(7));
        assert_eq!(r.get::<u8>(), None);
        r.detach();
        assert!(!r.is_attached());
    }

    #[test]
    fn keys_from_numbers() {
        assert_eq!(Key::from(3usize), Key::from("3"));
    }
}
