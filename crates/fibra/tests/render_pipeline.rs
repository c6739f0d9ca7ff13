#![forbid(unsafe_code)]

//! End-to-end rendering of function components through the facade.
//!
//! Run:
//!   cargo test -p fibra --test render_pipeline

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fibra::reconciler::testing::{EventLog, HostOp, MemoryHost, NodeId};
use fibra::reconciler::{Dispatch, HookError, ReconcileError};
use fibra::{
    Component, Element, Error, HostRef, ManualClock, Node, Props, Root, RuntimeConfig, Scheduler,
    StateSetter, Teardown,
};

// ============================================================================
// Helpers
// ============================================================================

fn setup() -> (Root<MemoryHost>, Scheduler) {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let config = RuntimeConfig::default();
    let scheduler = config.build_scheduler_with_clock(ManualClock::new());
    let root = config.create_root(host, container, scheduler.clone());
    (root, scheduler)
}

fn render(root: &Root<MemoryHost>, scheduler: &Scheduler, node: impl Into<Node>) {
    root.render(node).unwrap();
    scheduler.run_until_idle().unwrap();
}

fn markup(root: &Root<MemoryHost>) -> String {
    let container = root.container();
    root.with_host(|host| host.to_markup(container))
}

fn take_ops(root: &Root<MemoryHost>) -> Vec<HostOp> {
    root.with_host_mut(MemoryHost::take_ops)
}

type Slot<T> = Rc<RefCell<Option<T>>>;

fn slot<T>() -> Slot<T> {
    Rc::new(RefCell::new(None))
}

// ============================================================================
// Reducer-driven list
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Todo {
    id: usize,
    title: String,
    done: bool,
}

#[derive(Debug, Clone)]
enum Action {
    Add(&'static str),
    Toggle(usize),
    Remove(usize),
}

fn todos(state: &Vec<Todo>, action: &Action) -> Vec<Todo> {
    let mut next = state.clone();
    match action {
        Action::Add(title) => {
            let id = next.iter().map(|t| t.id + 1).max().unwrap_or(0);
            next.push(Todo {
                id,
                title: (*title).to_owned(),
                done: false,
            });
        }
        Action::Toggle(id) => {
            if let Some(todo) = next.iter_mut().find(|t| t.id == *id) {
                todo.done = !todo.done;
            }
        }
        Action::Remove(id) => next.retain(|t| t.id != *id),
    }
    next
}

fn todo_app(dispatch_slot: &Slot<Dispatch<Vec<Todo>, Action>>) -> Component {
    let dispatch_slot = Rc::clone(dispatch_slot);
    Component::new("TodoApp", move |cx, _props| {
        let (items, dispatch) = cx.use_reducer(todos, Vec::new)?;
        *dispatch_slot.borrow_mut() = Some(dispatch);
        Ok(Element::host("ul")
            .children(items.iter().map(|todo| {
                Element::host("li")
                    .key(todo.id)
                    .attr("class", if todo.done { "done" } else { "open" })
                    .text(todo.title.clone())
            }))
            .build())
    })
}

#[test]
fn reducer_driven_list_updates_in_place() {
    let (root, scheduler) = setup();
    let dispatch = slot();
    render(&root, &scheduler, todo_app(&dispatch).element());
    assert_eq!(markup(&root), "<ul/>");

    let send = |action| {
        dispatch.borrow().clone().unwrap().dispatch(action);
        scheduler.run_until_idle().unwrap();
    };
    send(Action::Add("milk"));
    send(Action::Add("eggs"));
    send(Action::Add("tea"));
    assert_eq!(
        markup(&root),
        r#"<ul><li class="open">milk</li><li class="open">eggs</li><li class="open">tea</li></ul>"#
    );
    take_ops(&root);

    send(Action::Toggle(1));
    let ops = take_ops(&root);
    assert_eq!(ops.len(), 1, "{ops:?}");
    assert!(matches!(&ops[0], HostOp::Update { changed, .. } if changed == &["class".to_owned()]));

    send(Action::Remove(0));
    let ops = take_ops(&root);
    assert_eq!(ops.len(), 1, "{ops:?}");
    assert!(matches!(ops[0], HostOp::Remove { .. }));
    assert_eq!(
        markup(&root),
        r#"<ul><li class="done">eggs</li><li class="open">tea</li></ul>"#
    );
}

// ============================================================================
// Bail-out and hooks
// ============================================================================

#[test]
fn child_state_update_skips_the_parent() {
    let (root, scheduler) = setup();
    let log = EventLog::new();
    let setter: Slot<StateSetter<i64>> = slot();

    let child = {
        let log = log.clone();
        let setter = Rc::clone(&setter);
        Component::new("Child", move |cx, _props| {
            let (value, set) = cx.use_state(|| 0_i64)?;
            *setter.borrow_mut() = Some(set);
            log.push(format!("child {value}"));
            Ok(Element::host("b").text(value.to_string()).build())
        })
    };
    let parent = {
        let log = log.clone();
        Component::new("Parent", move |_cx, _props| {
            log.push("parent");
            Ok(Element::host("section").child(child.element()).build())
        })
    };

    render(&root, &scheduler, parent.element());
    assert_eq!(log.take(), vec!["parent", "child 0"]);

    setter.borrow().clone().unwrap().update(|n| n + 5);
    scheduler.run_until_idle().unwrap();
    assert_eq!(log.take(), vec!["child 5"]);
    assert_eq!(markup(&root), "<section><b>5</b></section>");
}

#[test]
fn memo_recomputes_only_when_deps_change() {
    let (root, scheduler) = setup();
    let computed = Rc::new(Cell::new(0));
    let component = {
        let computed = Rc::clone(&computed);
        Component::new("Square", move |cx, props: &Props| {
            let n = props.get_int("n").unwrap_or(0);
            let square = cx.use_memo(n, |n| {
                computed.set(computed.get() + 1);
                n * n
            })?;
            Ok(Element::host("i").text(square.to_string()).build())
        })
    };

    render(&root, &scheduler, component.element().prop("n", 3));
    render(&root, &scheduler, component.element().prop("n", 3));
    assert_eq!(computed.get(), 1);
    assert_eq!(markup(&root), "<i>9</i>");

    render(&root, &scheduler, component.element().prop("n", 4));
    assert_eq!(computed.get(), 2);
    assert_eq!(markup(&root), "<i>16</i>");
}

#[test]
fn ref_object_persists_without_scheduling() {
    let (root, scheduler) = setup();
    let renders: Slot<fibra::RefObject<u32>> = slot();
    let component = {
        let renders = Rc::clone(&renders);
        Component::new("Counted", move |cx, _props| {
            let count = cx.use_ref(|| 0_u32)?;
            count.with_mut(|n| *n += 1);
            *renders.borrow_mut() = Some(count);
            Ok(Node::empty())
        })
    };

    render(&root, &scheduler, component.element());
    render(&root, &scheduler, component.element());
    let count = renders.borrow().clone().unwrap();
    assert_eq!(count.get(), 2);

    count.set(40);
    assert_eq!(root.pending_lanes(), 0, "writing a ref schedules nothing");
    render(&root, &scheduler, component.element());
    assert_eq!(count.get(), 41);
}

#[test]
fn layout_effect_sees_attached_ref() {
    let (root, scheduler) = setup();
    let seen: Slot<NodeId> = slot();
    let component = {
        let seen = Rc::clone(&seen);
        Component::new("Measure", move |cx, _props| {
            let host_ref = cx.use_ref(HostRef::new)?.get();
            let seen = Rc::clone(&seen);
            let probe = host_ref.clone();
            cx.use_layout_effect_with((), move || {
                *seen.borrow_mut() = probe.get::<NodeId>();
            })?;
            Ok(Element::host("canvas").host_ref(host_ref).build())
        })
    };

    render(&root, &scheduler, component.element());
    let container = root.container();
    let canvas = root.with_host(|host| host.children(container)[0]);
    assert_eq!(*seen.borrow(), Some(canvas));
}

#[test]
fn passive_effect_can_schedule_a_follow_up_render() {
    let (root, scheduler) = setup();
    let component = Component::new("Loader", |cx, _props| {
        let (status, set) = cx.use_state(|| "loading")?;
        cx.use_effect_with((), move || set.set("ready"))?;
        Ok(Element::host("p").text(status).build())
    });

    render(&root, &scheduler, component.element());
    assert_eq!(markup(&root), "<p>ready</p>");
    assert_eq!(root.stats().commits, 2);
}

#[test]
fn unmount_runs_every_teardown() {
    let (root, scheduler) = setup();
    let log = EventLog::new();
    let leaf = {
        let log = log.clone();
        Component::new("Leaf", move |cx, props: &Props| {
            let name = props.get_str("name").unwrap_or_default().to_owned();
            let layout_log = log.clone();
            let layout_name = name.clone();
            cx.use_layout_effect_with((), move || {
                Teardown::new(move || layout_log.push(format!("layout {layout_name}")))
            })?;
            let passive_log = log.clone();
            let passive_name = name.clone();
            cx.use_effect_with((), move || {
                Teardown::new(move || passive_log.push(format!("passive {passive_name}")))
            })?;
            Ok(Element::host("span").text(name).build())
        })
    };
    let tree = Element::host("div")
        .children([
            leaf.element().key("a").prop("name", "a"),
            leaf.element().key("b").prop("name", "b"),
        ])
        .build();

    render(&root, &scheduler, tree);
    assert_eq!(markup(&root), "<div><span>a</span><span>b</span></div>");
    assert!(log.take().is_empty());

    root.unmount().unwrap();
    let mut torn_down = log.take();
    torn_down.sort();
    assert_eq!(torn_down, vec!["layout a", "layout b", "passive a", "passive b"]);
    assert_eq!(markup(&root), "");
}

// ============================================================================
// Errors through the facade
// ============================================================================

#[test]
fn hook_order_violation_surfaces_as_facade_error() {
    let (root, scheduler) = setup();
    let flip = Rc::new(Cell::new(false));
    let component = {
        let flip = Rc::clone(&flip);
        Component::new("Unstable", move |cx, _props| {
            if flip.get() {
                cx.use_ref(|| ())?;
            } else {
                cx.use_state(|| 0_u8)?;
            }
            Ok(Node::empty())
        })
    };

    render(&root, &scheduler, component.element());
    flip.set(true);
    root.render(component.element()).unwrap();
    let err = Error::from(scheduler.run_until_idle().unwrap_err());
    match err.as_reconcile_error() {
        Some(ReconcileError::Hook { component, source }) => {
            assert_eq!(component, "Unstable");
            assert!(matches!(source, HookError::KindMismatch { index: 0, .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
