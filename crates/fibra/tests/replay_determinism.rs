#![forbid(unsafe_code)]

//! Random interleavings of updates at mixed priorities, slices and clock
//! jumps. Replaying the same script must produce the same host operations,
//! and once the queue drains the host shows the last submitted tree no
//! matter how the passes were interrupted.
//!
//! Run:
//!   cargo test -p fibra --test replay_determinism

use std::time::Duration;

use fibra::reconciler::testing::{HostOp, MemoryHost};
use fibra::{Component, Element, ManualClock, Node, Root, RuntimeConfig, Scheduler};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    Render(Vec<u8>),
    Transition(Vec<u8>),
    Sync(Vec<u8>),
    Slice,
    Advance(u64),
}

struct Replay {
    root: Root<MemoryHost>,
    scheduler: Scheduler,
    clock: ManualClock,
    item: Component,
}

impl Replay {
    fn new() -> Self {
        let clock = ManualClock::new();
        let config = RuntimeConfig::default();
        let scheduler = config.build_scheduler_with_clock(clock.clone());
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let root = config.create_root(host, container, scheduler.clone());
        let cost = clock.clone();
        let item = Component::new("Item", move |_cx, props| {
            cost.advance(Duration::from_millis(2));
            Ok(Element::host("li")
                .text(props.get_int("id").unwrap_or(-1).to_string())
                .build())
        });
        Self {
            root,
            scheduler,
            clock,
            item,
        }
    }

    fn tree(&self, ids: &[u8]) -> Node {
        Element::host("ul")
            .children(
                ids.iter()
                    .map(|&id| self.item.element().key(u32::from(id)).prop("id", i64::from(id))),
            )
            .build()
    }

    fn apply(&self, step: &Step) {
        match step {
            Step::Render(ids) => self.root.render(self.tree(ids)).unwrap(),
            Step::Transition(ids) => self
                .root
                .start_transition(|| self.root.render(self.tree(ids)))
                .unwrap(),
            Step::Sync(ids) => self
                .root
                .flush_sync(|| self.root.render(self.tree(ids)))
                .unwrap()
                .unwrap(),
            Step::Slice => {
                self.scheduler.perform_work_until_deadline().unwrap();
            }
            Step::Advance(ms) => self.clock.advance(Duration::from_millis(*ms)),
        }
    }

    fn finish(&self) -> (Vec<HostOp>, String) {
        self.scheduler.run_until_idle().unwrap();
        let container = self.root.container();
        let ops = self.root.with_host_mut(MemoryHost::take_ops);
        let markup = self.root.with_host(|host| host.to_markup(container));
        (ops, markup)
    }
}

fn expected_markup(ids: &[u8]) -> String {
    if ids.is_empty() {
        return "<ul/>".to_owned();
    }
    let items: String = ids.iter().map(|id| format!("<li>{id}</li>")).collect();
    format!("<ul>{items}</ul>")
}

fn ids() -> impl Strategy<Value = Vec<u8>> {
    proptest::sample::subsequence((0u8..8).collect::<Vec<_>>(), 0..=8).prop_shuffle()
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => ids().prop_map(Step::Render),
        2 => ids().prop_map(Step::Transition),
        1 => ids().prop_map(Step::Sync),
        4 => Just(Step::Slice),
        1 => (1u64..8_000).prop_map(Step::Advance),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn replays_are_deterministic_and_converge(script in proptest::collection::vec(step(), 1..24)) {
        let first = Replay::new();
        let second = Replay::new();
        for step in &script {
            first.apply(step);
            second.apply(step);
        }
        let (ops_a, markup_a) = first.finish();
        let (ops_b, markup_b) = second.finish();
        prop_assert_eq!(&ops_a, &ops_b);
        prop_assert_eq!(&markup_a, &markup_b);

        let last = script.iter().rev().find_map(|step| match step {
            Step::Render(ids) | Step::Transition(ids) | Step::Sync(ids) => Some(ids.as_slice()),
            Step::Slice | Step::Advance(_) => None,
        });
        match last {
            Some(ids) => prop_assert_eq!(markup_a, expected_markup(ids)),
            None => prop_assert_eq!(markup_a, String::new()),
        }
        prop_assert_eq!(first.root.pending_lanes(), 0);
    }
}
