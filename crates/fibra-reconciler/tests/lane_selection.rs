#![forbid(unsafe_code)]

//! Root lane bookkeeping driven only through the public lane API.
//!
//! Run:
//!   cargo test -p fibra-reconciler --test lane_selection

use std::time::Duration;

use fibra_reconciler::lane::{
    LaneTimeouts, NON_IDLE_LANES, RootLanes, TOTAL_LANES, describe_lanes,
    get_highest_priority_lane, is_subset_of_lanes,
};
use fibra_reconciler::{
    DEFAULT_LANE, EventPriority, IDLE_LANE, INPUT_CONTINUOUS_LANE, NO_LANES, SYNC_LANE,
    TRANSITION_LANES,
};
use proptest::prelude::*;

const MS: Duration = Duration::from_millis(1);

#[test]
fn a_frame_of_mixed_updates_drains_most_urgent_first() {
    let timeouts = LaneTimeouts::default();
    let mut lanes = RootLanes::default();
    let transition = lanes.claim_next_transition_lane();
    for lane in [IDLE_LANE, transition, DEFAULT_LANE, SYNC_LANE] {
        lanes.mark_updated(lane);
    }
    lanes.mark_starved_lanes_as_expired(Duration::ZERO, &timeouts);

    let mut order = Vec::new();
    loop {
        let next = lanes.next_lanes(NO_LANES);
        if next == NO_LANES {
            break;
        }
        order.push(describe_lanes(next));
        lanes.mark_finished(lanes.pending & !next);
    }
    assert_eq!(order, ["sync", "default", "transition", "idle"]);
    assert_eq!(lanes.expired, NO_LANES);
}

#[test]
fn starved_transition_expires_while_input_keeps_arriving() {
    let timeouts = LaneTimeouts::default();
    let mut lanes = RootLanes::default();
    let transition = lanes.claim_next_transition_lane();
    lanes.mark_updated(transition);
    lanes.mark_starved_lanes_as_expired(Duration::ZERO, &timeouts);

    let mut now = Duration::ZERO;
    while !lanes.includes_expired_lane(transition) {
        lanes.mark_updated(INPUT_CONTINUOUS_LANE);
        assert_eq!(lanes.next_lanes(NO_LANES), INPUT_CONTINUOUS_LANE);
        lanes.mark_finished(lanes.pending & !INPUT_CONTINUOUS_LANE);
        now += 100 * MS;
        lanes.mark_starved_lanes_as_expired(now, &timeouts);
        assert!(now <= timeouts.default, "transition never expired");
    }
    assert_eq!(now, timeouts.default);
    assert_eq!(lanes.next_lanes(NO_LANES), transition);
}

#[test]
fn event_priorities_land_on_their_lanes() {
    let mut lanes = RootLanes::default();
    for priority in [EventPriority::Idle, EventPriority::Continuous, EventPriority::Discrete] {
        lanes.mark_updated(priority.lane());
    }
    assert_eq!(lanes.next_lanes(NO_LANES), EventPriority::Discrete.lane());
    lanes.mark_finished(lanes.pending & !SYNC_LANE);
    assert_eq!(lanes.next_lanes(NO_LANES), EventPriority::Continuous.lane());
}

fn pending_sets() -> impl Strategy<Value = u32> {
    1u32..(1u32 << TOTAL_LANES)
}

proptest! {
    #[test]
    fn next_lanes_is_a_pending_group_with_the_top_lane(pending in pending_sets()) {
        let mut lanes = RootLanes::default();
        lanes.pending = pending;
        let next = lanes.next_lanes(NO_LANES);
        prop_assert_ne!(next, NO_LANES);
        prop_assert!(is_subset_of_lanes(pending, next));

        let candidates = if pending & NON_IDLE_LANES != NO_LANES {
            pending & NON_IDLE_LANES
        } else {
            pending
        };
        prop_assert_eq!(get_highest_priority_lane(next), get_highest_priority_lane(candidates));
        if next & TRANSITION_LANES != NO_LANES {
            prop_assert_eq!(next, pending & TRANSITION_LANES);
        }
    }

    #[test]
    fn in_progress_render_survives_less_urgent_arrivals(
        pending in pending_sets(),
        extra in pending_sets(),
    ) {
        let mut lanes = RootLanes::default();
        lanes.pending = pending;
        let wip = lanes.next_lanes(NO_LANES);
        let top = get_highest_priority_lane(wip);
        // Only lanes no more urgent than the one being rendered.
        let later = extra & !(top | (top - 1));
        lanes.pending |= later;
        prop_assert_eq!(lanes.next_lanes(wip), wip);
    }
}
