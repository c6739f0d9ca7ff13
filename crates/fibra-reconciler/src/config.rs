//! Reconciler configuration.

use std::time::Duration;

use crate::lane::LaneTimeouts;

/// How a root schedules its render passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RootMode {
    /// Updates get lanes from the ambient event priority; non-sync passes
    /// are time-sliced and interruptible.
    #[default]
    Concurrent,
    /// Every update is synchronous and every pass runs to completion.
    Sync,
}

impl RootMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Concurrent => "concurrent",
            Self::Sync => "sync",
        }
    }
}

/// Configuration for a [`Root`](crate::Root).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReconcilerConfig {
    pub mode: RootMode,

    /// Starvation deadline of sync and input-continuous lanes.
    /// Default: 250ms.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub sync_lane_timeout: Duration,

    /// Starvation deadline of default and transition lanes.
    /// Default: 5s.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub default_lane_timeout: Duration,

    /// Time-slice input-continuous and default lanes in concurrent mode.
    /// When off, only transition and idle lanes yield. Default: true.
    pub time_slice_default_lanes: bool,

    /// Consecutive synchronous re-commits allowed before
    /// [`ReconcileError::NestedUpdateLimit`](crate::ReconcileError::NestedUpdateLimit).
    /// Default: 50.
    pub nested_update_limit: u32,

    /// Emit a `trace!` line for every flagged fiber after each render.
    /// Default: false.
    pub trace_finished_work: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        let timeouts = LaneTimeouts::default();
        Self {
            mode: RootMode::Concurrent,
            sync_lane_timeout: timeouts.sync,
            default_lane_timeout: timeouts.default,
            time_slice_default_lanes: true,
            nested_update_limit: 50,
            trace_finished_work: false,
        }
    }
}

impl ReconcilerConfig {
    /// Synchronous root with defaults otherwise.
    #[must_use]
    pub fn sync() -> Self {
        Self {
            mode: RootMode::Sync,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn lane_timeouts(&self) -> LaneTimeouts {
        LaneTimeouts {
            sync: self.sync_lane_timeout,
            default: self.default_lane_timeout,
        }
    }

    /// Validate the configuration, returning a list of problems.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.sync_lane_timeout.is_zero() {
            errors.push("reconciler.sync_lane_timeout must be > 0".into());
        }
        if self.sync_lane_timeout > self.default_lane_timeout {
            errors.push("reconciler.sync_lane_timeout must not exceed default_lane_timeout".into());
        }
        if self.nested_update_limit == 0 {
            errors.push("reconciler.nested_update_limit must be > 0".into());
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
    fn defaults_are_valid_and_concurrent() {
        let config = ReconcilerConfig::default();
        assert!(config.validate().is_empty());
        assert_eq!(config.mode, RootMode::Concurrent);
        assert_eq!(config.lane_timeouts(), LaneTimeouts::default());
    }

    #[test]
    fn inverted_timeouts_are_rejected() {
        let config = ReconcilerConfig {
            sync_lane_timeout: Duration::from_secs(10),
            nested_update_limit: 0,
            ..Default::default()
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("sync_lane_timeout"));
    }

    #[test]
    fn sync_constructor_only_changes_mode() {
        let config = ReconcilerConfig::sync();
        assert_eq!(config.mode, RootMode::Sync);
        assert_eq!(config.nested_update_limit, 50);
    }
}
