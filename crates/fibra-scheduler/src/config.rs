//! Scheduler configuration.

use std::time::Duration;

/// Length of one time slice before the scheduler yields to the host.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(5);

/// Timeout for [`PriorityLevel::UserBlocking`](crate::PriorityLevel::UserBlocking).
pub const USER_BLOCKING_TIMEOUT: Duration = Duration::from_millis(250);

/// Timeout for [`PriorityLevel::Normal`](crate::PriorityLevel::Normal).
pub const NORMAL_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Timeout for [`PriorityLevel::Low`](crate::PriorityLevel::Low).
pub const LOW_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Timeout for [`PriorityLevel::Idle`](crate::PriorityLevel::Idle): the largest
/// signed 31-bit millisecond count, i.e. effectively never.
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(1_073_741_823);

/// Maximum number of queued tasks.
const MAX_QUEUE_SIZE: usize = 10_000;

/// Configuration for the [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// Budget of one slice; `should_yield` turns true once it elapses.
    /// Default: 5ms.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub frame_interval: Duration,

    /// Default: 250ms.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub user_blocking_timeout: Duration,

    /// Default: 5s.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub normal_timeout: Duration,

    /// Default: 10s.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub low_timeout: Duration,

    /// Default: ~12.4 days.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub idle_timeout: Duration,

    /// Maximum number of queued tasks. Submissions beyond this are rejected.
    /// Default: 10_000.
    pub max_queue_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            user_blocking_timeout: USER_BLOCKING_TIMEOUT,
            normal_timeout: NORMAL_TIMEOUT,
            low_timeout: LOW_TIMEOUT,
            idle_timeout: IDLE_TIMEOUT,
            max_queue_size: MAX_QUEUE_SIZE,
        }
    }
}

impl SchedulerConfig {
    /// Validate the configuration, returning a list of problems.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.frame_interval.is_zero() {
            errors.push("scheduler.frame_interval must be > 0".into());
        }
        if self.user_blocking_timeout > self.normal_timeout {
            errors.push("scheduler.user_blocking_timeout must not exceed normal_timeout".into());
        }
        if self.normal_timeout > self.low_timeout {
            errors.push("scheduler.normal_timeout must not exceed low_timeout".into());
        }
        if self.low_timeout > self.idle_timeout {
            errors.push("scheduler.low_timeout must not exceed idle_timeout".into());
        }
        if self.max_queue_size == 0 {
            errors.push("scheduler.max_queue_size must be > 0".into());
        }
        errors
    }
}

#[cfg(feature = "serde")]
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SchedulerConfig::default().validate().is_empty());
    }

    #[test]
    fn zero_frame_interval_is_rejected() {
        let config = SchedulerConfig {
            frame_interval: Duration::ZERO,
            ..Default::default()
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("frame_interval"));
    }

    #[test]
    fn inverted_timeouts_are_rejected() {
        let config = SchedulerConfig {
            normal_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(
            config
                .validate()
                .iter()
                .any(|e| e.contains("normal_timeout"))
        );
    }
}
