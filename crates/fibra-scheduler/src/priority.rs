//! Scheduler priority levels.

use std::fmt;
use std::time::Duration;

use crate::config::SchedulerConfig;

/// Priority of a scheduled task.
///
/// Lower discriminants are more urgent. Each level maps to a timeout (see
/// [`SchedulerConfig`]); a task's expiration time is its start time plus that
/// timeout and is the only ordering key of the task heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PriorityLevel {
    /// Already expired on submission; never yields.
    Immediate = 1,
    /// Input that must feel instantaneous.
    UserBlocking = 2,
    /// Default for ordinary updates and follow-up work.
    #[default]
    Normal = 3,
    Low = 4,
    /// Only when nothing else is pending.
    Idle = 5,
}

impl PriorityLevel {
    /// All levels, most urgent first.
    pub const ALL: [Self; 5] = [
        Self::Immediate,
        Self::UserBlocking,
        Self::Normal,
        Self::Low,
        Self::Idle,
    ];

    /// Timeout added to the start time, or `None` for already-expired work.
    #[must_use]
    pub fn timeout(self, config: &SchedulerConfig) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::UserBlocking => Some(config.user_blocking_timeout),
            Self::Normal => Some(config.normal_timeout),
            Self::Low => Some(config.low_timeout),
            Self::Idle => Some(config.idle_timeout),
        }
    }

    /// Stable lowercase name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::UserBlocking => "user_blocking",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_grow_with_lower_priority() {
        let config = SchedulerConfig::default();
        let mut last = Duration::ZERO;
        for level in &PriorityLevel::ALL[1..] {
            let timeout = level.timeout(&config).unwrap();
            assert!(timeout > last, "{level} should time out later");
            last = timeout;
        }
        assert_eq!(PriorityLevel::Immediate.timeout(&config), None);
    }

    #[test]
    fn ordering_matches_urgency() {
        assert!(PriorityLevel::Immediate < PriorityLevel::Idle);
        assert!(PriorityLevel::UserBlocking < PriorityLevel::Normal);
    }
}
