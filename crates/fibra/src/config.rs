//! Runtime configuration as data.
//!
//! [`RuntimeConfig`] groups the scheduler and reconciler settings so an
//! application can tune both from one file instead of recompiling.
//!
//! ```toml
//! # fibra.toml
//! [scheduler]
//! frame_interval = 8        # milliseconds
//!
//! [reconciler]
//! mode = "sync"
//! nested_update_limit = 25
//! ```
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_toml_file("fibra.toml")?;
//! let scheduler = config.build_scheduler();
//! let root = config.create_root(host, container, scheduler.clone());
//! ```
//!
//! Omitted sections and fields keep their defaults.

#[cfg(feature = "config")]
use std::path::Path;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use fibra_reconciler::{HostConfig, ReconcilerConfig, Root};
use fibra_scheduler::{Clock, Scheduler, SchedulerConfig};

/// Scheduler and reconciler settings for one application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub reconciler: ReconcilerConfig,
}

impl RuntimeConfig {
    /// Load from a TOML string.
    #[cfg(feature = "config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Serialize to pretty TOML.
    #[cfg(feature = "config")]
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::TomlEncode)
    }

    /// Collect every range problem of both sections. Empty means valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.scheduler.validate();
        errors.extend(self.reconciler.validate());
        errors
    }

    /// `self`, or [`ConfigError::Invalid`] listing what is wrong with it.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// A scheduler on the wall clock.
    #[must_use]
    pub fn build_scheduler(&self) -> Scheduler {
        Scheduler::new(self.scheduler.clone())
    }

    /// A scheduler on a caller-supplied clock.
    #[must_use]
    pub fn build_scheduler_with_clock(&self, clock: impl Clock + 'static) -> Scheduler {
        Scheduler::with_clock(self.scheduler.clone(), clock)
    }

    /// A root rendering into `container` with the reconciler settings.
    pub fn create_root<H: HostConfig>(
        &self,
        host: H,
        container: H::Instance,
        scheduler: Scheduler,
    ) -> Root<H> {
        debug!(
            target: "fibra.reconciler",
            mode = self.reconciler.mode.as_str(),
            frame_interval_ms = self.scheduler.frame_interval.as_millis() as u64,
            "creating root from runtime config"
        );
        Root::with_config(host, container, scheduler, self.reconciler.clone())
    }
}

/// Failure to load or validate a [`RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "config")]
    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),

    #[cfg(feature = "config")]
    #[error("TOML encode error: {0}")]
    TomlEncode(#[source] toml::ser::Error),

    #[cfg(feature = "config")]
    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),

    #[error("validation errors: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
