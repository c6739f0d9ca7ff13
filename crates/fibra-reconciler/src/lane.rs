//! Lane bitmask priority model.
//!
//! A lane is one bit of a 31-bit mask; a set of lanes is the OR of those
//! bits. Lower bits are more urgent, so the highest priority lane of a set is
//! its lowest set bit (`lanes & lanes.wrapping_neg()`).
//!
//! Priority comparisons between two single lanes go through
//! [`is_higher_priority_lane`], which treats [`NO_LANE`] as lower than every
//! real lane. Raw `<` on lane values is never used outside this module.
//!
//! # Key Invariants
//!
//! 1. Every named lane is a single power of two below `1 << TOTAL_LANES`.
//! 2. Named lanes ascend in value as urgency decreases.
//! 3. A pending lane gets an expiration time once, the first time it is seen
//!    by [`RootLanes::mark_starved_lanes_as_expired`], and loses it when it
//!    stops being pending.

use std::fmt;
use std::time::Duration;

/// A set of lanes.
pub type Lanes = u32;

/// A single lane (one bit), or [`NO_LANE`].
pub type Lane = u32;

/// Number of usable lanes.
pub const TOTAL_LANES: usize = 31;

pub const NO_LANES: Lanes = 0b0000000000000000000000000000000;
pub const NO_LANE: Lane = 0b0000000000000000000000000000000;

pub const SYNC_HYDRATION_LANE: Lane = 0b0000000000000000000000000000001;
pub const SYNC_LANE: Lane = 0b0000000000000000000000000000010;

pub const INPUT_CONTINUOUS_HYDRATION_LANE: Lane = 0b0000000000000000000000000000100;
pub const INPUT_CONTINUOUS_LANE: Lane = 0b0000000000000000000000000001000;

pub const DEFAULT_HYDRATION_LANE: Lane = 0b0000000000000000000000000010000;
pub const DEFAULT_LANE: Lane = 0b0000000000000000000000000100000;

/// Lanes that updates from user code land in outside transitions.
pub const SYNC_UPDATE_LANES: Lanes = 0b0000000000000000000000000101010;

/// Lanes that always render to completion without yielding.
pub const SYNC_LANES: Lanes = SYNC_HYDRATION_LANE | SYNC_LANE;

pub const TRANSITION_HYDRATION_LANE: Lane = 0b0000000000000000000000001000000;
pub const TRANSITION_LANES: Lanes = 0b0000000011111111111111110000000;
pub const TRANSITION_LANE_1: Lane = 0b0000000000000000000000010000000;
pub const TRANSITION_LANE_16: Lane = 0b0000000010000000000000000000000;

pub const RETRY_LANES: Lanes = 0b0000111100000000000000000000000;
pub const RETRY_LANE_1: Lane = 0b0000000100000000000000000000000;

pub const SELECTIVE_HYDRATION_LANE: Lane = 0b0001000000000000000000000000000;

pub const NON_IDLE_LANES: Lanes = 0b0001111111111111111111111111111;

pub const IDLE_HYDRATION_LANE: Lane = 0b0010000000000000000000000000000;
pub const IDLE_LANE: Lane = 0b0100000000000000000000000000000;

pub const OFFSCREEN_LANE: Lane = 0b1000000000000000000000000000000;

// ============================================================================
// Set algebra
// ============================================================================

#[inline]
#[must_use]
pub const fn merge_lanes(a: Lanes, b: Lanes) -> Lanes {
    a | b
}

#[inline]
#[must_use]
pub const fn remove_lanes(set: Lanes, subset: Lanes) -> Lanes {
    set & !subset
}

#[inline]
#[must_use]
pub const fn intersect_lanes(a: Lanes, b: Lanes) -> Lanes {
    a & b
}

#[inline]
#[must_use]
pub const fn includes_some_lane(a: Lanes, b: Lanes) -> bool {
    a & b != NO_LANES
}

/// Exact containment: every bit of `subset` is in `set`.
#[inline]
#[must_use]
pub const fn is_subset_of_lanes(set: Lanes, subset: Lanes) -> bool {
    set & subset == subset
}

/// Lowest set bit of `lanes`, or [`NO_LANE`] for an empty set.
#[inline]
#[must_use]
pub const fn get_highest_priority_lane(lanes: Lanes) -> Lane {
    lanes & lanes.wrapping_neg()
}

/// Whether lane `a` is strictly more urgent than lane `b`.
///
/// [`NO_LANE`] is less urgent than every lane, so an empty set never wins and
/// any lane beats an empty one.
#[inline]
#[must_use]
pub const fn is_higher_priority_lane(a: Lane, b: Lane) -> bool {
    match (a, b) {
        (NO_LANE, _) => false,
        (_, NO_LANE) => true,
        _ => a < b,
    }
}

/// The group of lanes that render together with the most urgent lane of
/// `lanes`. Transition and retry lanes batch as groups; everything else
/// renders alone.
#[must_use]
pub const fn get_highest_priority_lanes(lanes: Lanes) -> Lanes {
    let lane = get_highest_priority_lane(lanes);
    if lane & TRANSITION_LANES != NO_LANES {
        lanes & TRANSITION_LANES
    } else if lane & RETRY_LANES != NO_LANES {
        lanes & RETRY_LANES
    } else {
        lane
    }
}

/// Bit index of the most urgent lane in `lane`, or `None` for [`NO_LANE`].
#[inline]
#[must_use]
pub const fn lane_to_index(lane: Lane) -> Option<usize> {
    if lane == NO_LANE {
        None
    } else {
        Some(lane.trailing_zeros() as usize)
    }
}

#[inline]
#[must_use]
pub const fn includes_non_idle_work(lanes: Lanes) -> bool {
    lanes & NON_IDLE_LANES != NO_LANES
}

/// Sync lanes are never time-sliced.
#[inline]
#[must_use]
pub const fn includes_sync_lane(lanes: Lanes) -> bool {
    lanes & SYNC_LANES != NO_LANES
}

/// Input-continuous and default lanes. These render without yielding unless
/// the root opts into time-slicing them.
#[inline]
#[must_use]
pub const fn includes_blocking_lane(lanes: Lanes) -> bool {
    const SYNC_DEFAULT_LANES: Lanes = INPUT_CONTINUOUS_HYDRATION_LANE
        | INPUT_CONTINUOUS_LANE
        | DEFAULT_HYDRATION_LANE
        | DEFAULT_LANE;
    lanes & SYNC_DEFAULT_LANES != NO_LANES
}

#[inline]
#[must_use]
pub const fn includes_only_transitions(lanes: Lanes) -> bool {
    lanes != NO_LANES && lanes & TRANSITION_LANES == lanes
}

/// Iterate the single lanes of a set, most urgent first.
pub fn iter_lanes(mut lanes: Lanes) -> impl Iterator<Item = Lane> {
    std::iter::from_fn(move || {
        if lanes == NO_LANES {
            return None;
        }
        let lane = get_highest_priority_lane(lanes);
        lanes &= !lane;
        Some(lane)
    })
}

/// Human readable label for log output (`"sync|default"`).
#[must_use]
pub fn describe_lanes(lanes: Lanes) -> String {
    if lanes == NO_LANES {
        return "none".to_owned();
    }
    let mut parts: Vec<&'static str> = Vec::new();
    for lane in iter_lanes(lanes) {
        let name = lane_name(lane);
        if parts.last() != Some(&name) {
            parts.push(name);
        }
    }
    parts.join("|")
}

fn lane_name(lane: Lane) -> &'static str {
    match lane {
        SYNC_HYDRATION_LANE => "sync_hydration",
        SYNC_LANE => "sync",
        INPUT_CONTINUOUS_HYDRATION_LANE => "input_continuous_hydration",
        INPUT_CONTINUOUS_LANE => "input_continuous",
        DEFAULT_HYDRATION_LANE => "default_hydration",
        DEFAULT_LANE => "default",
        TRANSITION_HYDRATION_LANE => "transition_hydration",
        SELECTIVE_HYDRATION_LANE => "selective_hydration",
        IDLE_HYDRATION_LANE => "idle_hydration",
        IDLE_LANE => "idle",
        OFFSCREEN_LANE => "offscreen",
        l if l & TRANSITION_LANES != 0 => "transition",
        l if l & RETRY_LANES != 0 => "retry",
        _ => "unknown",
    }
}

// ============================================================================
// LaneMap
// ============================================================================

/// One slot per lane.
#[derive(Clone, PartialEq, Eq)]
pub struct LaneMap<T>([T; TOTAL_LANES]);

impl<T: Clone> LaneMap<T> {
    /// Every slot starts as a clone of `initial`.
    pub fn new(initial: T) -> Self {
        Self(std::array::from_fn(|_| initial.clone()))
    }
}

impl<T> LaneMap<T> {
    /// Slot for `lane`. Empty and out-of-range lanes have none.
    #[must_use]
    pub fn get(&self, lane: Lane) -> Option<&T> {
        lane_to_index(lane).and_then(|index| self.0.get(index))
    }

    pub fn get_mut(&mut self, lane: Lane) -> Option<&mut T> {
        lane_to_index(lane).and_then(|index| self.0.get_mut(index))
    }

    /// Visit the slot of every lane in `lanes`.
    pub fn for_each_mut(&mut self, lanes: Lanes, mut f: impl FnMut(Lane, &mut T)) {
        for lane in iter_lanes(lanes) {
            if let Some(slot) = self.get_mut(lane) {
                f(lane, slot);
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LaneMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

// ============================================================================
// Root lane bookkeeping
// ============================================================================

/// Per-lane timeouts used to stamp expiration times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneTimeouts {
    /// Sync and input-continuous lanes. Default: 250ms.
    pub sync: Duration,
    /// Default and transition lanes. Default: 5s.
    pub default: Duration,
}

impl Default for LaneTimeouts {
    fn default() -> Self {
        Self {
            sync: Duration::from_millis(250),
            default: Duration::from_millis(5_000),
        }
    }
}

impl LaneTimeouts {
    /// Expiration time for `lane` first seen at `now`, or `None` for lanes
    /// that never expire (retry, idle, offscreen).
    #[must_use]
    pub fn expiration_time(&self, lane: Lane, now: Duration) -> Option<Duration> {
        match lane {
            SYNC_HYDRATION_LANE
            | SYNC_LANE
            | INPUT_CONTINUOUS_HYDRATION_LANE
            | INPUT_CONTINUOUS_LANE => Some(now + self.sync),
            DEFAULT_HYDRATION_LANE | DEFAULT_LANE | TRANSITION_HYDRATION_LANE => {
                Some(now + self.default)
            }
            l if l & TRANSITION_LANES != NO_LANES => Some(now + self.default),
            _ => None,
        }
    }
}

/// Lane state owned by a root container.
#[derive(Debug, Clone)]
pub struct RootLanes {
    /// Lanes with unprocessed updates somewhere in the tree.
    pub pending: Lanes,
    /// Pending lanes whose deadline has passed.
    pub expired: Lanes,
    expiration_times: LaneMap<Option<Duration>>,
    next_transition_lane: Lane,
}

impl Default for RootLanes {
    fn default() -> Self {
        Self {
            pending: NO_LANES,
            expired: NO_LANES,
            expiration_times: LaneMap::new(None),
            next_transition_lane: TRANSITION_LANE_1,
        }
    }
}

impl RootLanes {
    /// Record that `lane` has pending work.
    pub fn mark_updated(&mut self, lane: Lane) {
        self.pending = merge_lanes(self.pending, lane);
    }

    /// Stamp unseen pending lanes with a deadline and move the ones whose
    /// deadline has passed into `expired`.
    pub fn mark_starved_lanes_as_expired(&mut self, now: Duration, timeouts: &LaneTimeouts) {
        let mut expired = self.expired;
        self.expiration_times
            .for_each_mut(self.pending, |lane, slot| match *slot {
                None => *slot = timeouts.expiration_time(lane, now),
                Some(deadline) if deadline <= now => expired |= lane,
                Some(_) => {}
            });
        self.expired = expired;
    }

    /// Expiration time currently stamped on `lane`.
    #[must_use]
    pub fn expiration_time(&self, lane: Lane) -> Option<Duration> {
        self.expiration_times.get(lane).copied().flatten()
    }

    /// Lanes to render next.
    ///
    /// With a render in progress on `wip_lanes`, keep rendering those unless
    /// strictly more urgent work arrived; switching lanes mid-render throws
    /// the partial tree away.
    #[must_use]
    pub fn next_lanes(&self, wip_lanes: Lanes) -> Lanes {
        if self.pending == NO_LANES {
            return NO_LANES;
        }
        let non_idle = self.pending & NON_IDLE_LANES;
        let next = if non_idle != NO_LANES {
            get_highest_priority_lanes(non_idle)
        } else {
            get_highest_priority_lanes(self.pending)
        };
        if wip_lanes != NO_LANES
            && wip_lanes != next
            && !is_higher_priority_lane(
                get_highest_priority_lane(next),
                get_highest_priority_lane(wip_lanes),
            )
        {
            return wip_lanes;
        }
        next
    }

    /// After a commit, only `remaining` lanes stay pending. Lanes that left
    /// the pending set lose their deadline and expired status.
    pub fn mark_finished(&mut self, remaining: Lanes) {
        let no_longer_pending = self.pending & !remaining;
        self.pending = remaining;
        self.expired &= remaining;
        self.expiration_times
            .for_each_mut(no_longer_pending, |_, slot| *slot = None);
    }

    /// Whether any of `lanes` has expired.
    #[must_use]
    pub fn includes_expired_lane(&self, lanes: Lanes) -> bool {
        includes_some_lane(self.expired, lanes)
    }

    /// Round-robin over the sixteen transition lanes.
    pub fn claim_next_transition_lane(&mut self) -> Lane {
        let lane = self.next_transition_lane;
        self.next_transition_lane <<= 1;
        if self.next_transition_lane & TRANSITION_LANES == NO_LANES {
            self.next_transition_lane = TRANSITION_LANE_1;
        }
        lane
    }
}
