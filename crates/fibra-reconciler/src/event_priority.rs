//! Event priorities: the coarse buckets the event layer tags updates with.

use fibra_scheduler::PriorityLevel;

use crate::lane::{
    DEFAULT_LANE, IDLE_LANE, INPUT_CONTINUOUS_LANE, Lane, Lanes, NO_LANES, SYNC_LANE,
    get_highest_priority_lane, includes_non_idle_work, is_higher_priority_lane,
};

/// Priority of the event that caused an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EventPriority {
    /// Clicks, key presses: flushed synchronously.
    Discrete,
    /// Drags, scrolls, pointer moves.
    Continuous,
    #[default]
    Default,
    Idle,
}

impl EventPriority {
    /// The lane updates at this priority are assigned.
    #[must_use]
    pub const fn lane(self) -> Lane {
        match self {
            Self::Discrete => SYNC_LANE,
            Self::Continuous => INPUT_CONTINUOUS_LANE,
            Self::Default => DEFAULT_LANE,
            Self::Idle => IDLE_LANE,
        }
    }

    /// Scheduler priority used for render callbacks at this event priority.
    #[must_use]
    pub const fn scheduler_priority(self) -> PriorityLevel {
        match self {
            Self::Discrete => PriorityLevel::Immediate,
            Self::Continuous => PriorityLevel::UserBlocking,
            Self::Default => PriorityLevel::Normal,
            Self::Idle => PriorityLevel::Idle,
        }
    }
}

/// Whether lane `a` is a strictly more urgent event priority than `b`.
#[must_use]
pub const fn is_higher_event_priority(a: Lane, b: Lane) -> bool {
    is_higher_priority_lane(a, b)
}

/// Bucket a set of lanes into the event priority of its most urgent lane.
///
/// An empty set maps to [`EventPriority::Default`].
#[must_use]
pub fn lanes_to_event_priority(lanes: Lanes) -> EventPriority {
    if lanes == NO_LANES {
        return EventPriority::Default;
    }
    let lane = get_highest_priority_lane(lanes);
    if !is_higher_event_priority(EventPriority::Discrete.lane(), lane) {
        EventPriority::Discrete
    } else if !is_higher_event_priority(EventPriority::Continuous.lane(), lane) {
        EventPriority::Continuous
    } else if includes_non_idle_work(lane) {
        EventPriority::Default
    } else {
        EventPriority::Idle
    }
}
