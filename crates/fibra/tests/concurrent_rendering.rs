#![forbid(unsafe_code)]

//! Priorities, time slicing and starvation across roots sharing one
//! scheduler. Time only moves when a test (or a slow component) advances
//! the manual clock.
//!
//! Run:
//!   cargo test -p fibra --test concurrent_rendering

use std::time::Duration;

use fibra::reconciler::testing::{EventLog, MemoryHost};
use fibra::reconciler::{DEFAULT_LANE, IDLE_LANE, TRANSITION_LANES};
use fibra::{
    Component, Element, EventPriority, ManualClock, Node, Root, RuntimeConfig, Scheduler,
    SchedulerConfig,
};

// ============================================================================
// Helpers
// ============================================================================

struct World {
    scheduler: Scheduler,
    clock: ManualClock,
    config: RuntimeConfig,
}

impl World {
    fn new() -> Self {
        let clock = ManualClock::new();
        let config = RuntimeConfig {
            scheduler: SchedulerConfig::default(),
            ..Default::default()
        };
        let scheduler = config.build_scheduler_with_clock(clock.clone());
        Self {
            scheduler,
            clock,
            config,
        }
    }

    fn root(&self) -> Root<MemoryHost> {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        self.config
            .create_root(host, container, self.scheduler.clone())
    }

    fn slice(&self) -> bool {
        self.scheduler.perform_work_until_deadline().unwrap()
    }

    fn run(&self) {
        self.scheduler.run_until_idle().unwrap();
    }

    /// Items that each cost one full frame to render.
    fn slow_list(&self, items: &[&str]) -> Node {
        let clock = self.clock.clone();
        let frame = self.scheduler.config().frame_interval;
        let item = Component::new("SlowItem", move |_cx, props| {
            clock.advance(frame);
            Ok(Element::host("li")
                .text(props.get_str("label").unwrap_or_default().to_owned())
                .build())
        });
        Element::host("ol")
            .children(
                items
                    .iter()
                    .map(|label| item.element().key(*label).prop("label", *label)),
            )
            .build()
    }
}

fn markup(root: &Root<MemoryHost>) -> String {
    let container = root.container();
    root.with_host(|host| host.to_markup(container))
}

fn committed_marker(log: &EventLog, name: &'static str) -> Node {
    let log = log.clone();
    Component::new(name, move |cx, _props| {
        let log = log.clone();
        cx.use_layout_effect(move || log.push(name))?;
        Ok(Node::empty())
    })
    .element()
    .build()
}

// ============================================================================
// Time slicing
// ============================================================================

#[test]
fn long_render_spreads_over_slices() {
    let world = World::new();
    let root = world.root();
    root.render(world.slow_list(&["a", "b", "c", "d"])).unwrap();

    let mut slices = 0;
    while world.slice() {
        slices += 1;
        assert!(slices < 20, "render never finished");
    }
    assert_eq!(
        markup(&root),
        "<ol><li>a</li><li>b</li><li>c</li><li>d</li></ol>"
    );
    assert!(slices >= 3, "only {slices} slices");
    assert_eq!(root.stats().commits, 1);
}

#[test]
fn starved_render_finishes_without_yielding() {
    let world = World::new();
    let root = world.root();
    root.render(world.slow_list(&["a", "b", "c", "d"])).unwrap();

    assert!(world.slice());
    assert!(root.is_render_in_progress());

    world.clock.advance(Duration::from_secs(6));
    world.slice();
    assert!(!root.is_render_in_progress());
    assert_eq!(
        markup(&root),
        "<ol><li>a</li><li>b</li><li>c</li><li>d</li></ol>"
    );
}

// ============================================================================
// Priorities
// ============================================================================

#[test]
fn input_update_preempts_a_transition() {
    let world = World::new();
    let root = world.root();

    root.start_transition(|| root.render(world.slow_list(&["x", "y", "z"])))
        .unwrap();
    assert_ne!(root.pending_lanes() & TRANSITION_LANES, 0);
    assert!(world.slice());
    assert!(root.is_render_in_progress());

    root.with_update_priority(EventPriority::Continuous, || {
        root.render(Element::host("input").attr("value", "typed").build())
    })
    .unwrap();
    world.slice();
    assert_eq!(markup(&root), r#"<input value="typed"/>"#);
    assert_eq!(root.stats().restarts, 1);

    // The transition replays underneath the input that superseded it.
    world.run();
    assert_eq!(markup(&root), r#"<input value="typed"/>"#);
    assert_eq!(root.pending_lanes(), 0);
}

#[test]
fn idle_work_runs_after_default_work_of_another_root() {
    let world = World::new();
    let log = EventLog::new();
    let background = world.root();
    let foreground = world.root();

    background
        .with_update_priority(EventPriority::Idle, || {
            background.render(committed_marker(&log, "idle"))
        })
        .unwrap();
    assert_eq!(background.pending_lanes(), IDLE_LANE);
    foreground.render(committed_marker(&log, "default")).unwrap();
    assert_eq!(foreground.pending_lanes(), DEFAULT_LANE);

    world.run();
    assert_eq!(log.take(), vec!["default", "idle"]);
}

#[test]
fn sync_work_on_one_root_leaves_the_other_mid_render() {
    let world = World::new();
    let slow = world.root();
    let fast = world.root();

    slow.render(world.slow_list(&["a", "b", "c"])).unwrap();
    assert!(world.slice());
    assert!(slow.is_render_in_progress());

    fast.flush_sync(|| fast.render(Element::host("p").text("now").build()))
        .unwrap()
        .unwrap();
    assert_eq!(markup(&fast), "<p>now</p>");
    assert!(slow.is_render_in_progress(), "the other root keeps its pass");

    world.run();
    assert_eq!(markup(&slow), "<ol><li>a</li><li>b</li><li>c</li></ol>");
    assert_eq!(slow.stats().restarts, 0);
}

#[test]
fn scheduled_fiber_update_commits_without_mutations() {
    let world = World::new();
    let root = world.root();
    root.render(Element::host("main").text("steady").build())
        .unwrap();
    world.run();
    root.with_host_mut(MemoryHost::take_ops);
    let commits = root.stats().commits;

    let host_root = root.with_tree(|_tree, current| current);
    root.schedule_update(host_root, DEFAULT_LANE, root.request_event_time())
        .unwrap();
    assert_eq!(root.pending_lanes(), DEFAULT_LANE);
    world.run();

    assert_eq!(root.stats().commits, commits + 1);
    assert!(root.with_host_mut(MemoryHost::take_ops).is_empty());
    assert_eq!(root.pending_lanes(), 0);
}
