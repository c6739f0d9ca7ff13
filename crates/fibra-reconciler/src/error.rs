//! Error types for the reconciler.

use std::fmt;

use fibra_scheduler::TaskError;

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Kind of a hook record, used to detect call-order violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    State,
    Reducer,
    Effect,
    LayoutEffect,
    Ref,
    Memo,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::State => "use_state",
            Self::Reducer => "use_reducer",
            Self::Effect => "use_effect",
            Self::LayoutEffect => "use_layout_effect",
            Self::Ref => "use_ref",
            Self::Memo => "use_memo",
        })
    }
}

/// Violation of the hook call-order contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    /// A different hook was called at this position than last render.
    #[error("hook #{index} is {found} but the previous render called {expected} here")]
    KindMismatch {
        index: usize,
        expected: HookKind,
        found: HookKind,
    },

    /// More hooks were called than during the previous render.
    #[error("hook #{index} has no counterpart in the previous render")]
    TooMany { index: usize },

    /// Fewer hooks were called than during the previous render.
    #[error("rendered {found} hooks but the previous render called {expected}")]
    TooFew { expected: usize, found: usize },

    /// The stored value has a different type than requested.
    #[error("hook #{index} holds a value of a different type")]
    StateTypeMismatch { index: usize },
}

/// Error returned by a component body.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + 'static>),
}

impl RenderError {
    /// Plain message error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Wrap any error type.
    pub fn other<E: std::error::Error + 'static>(error: E) -> Self {
        Self::Other(Box::new(error))
    }
}

/// Failure of a host primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("host {op} failed: {message}")]
pub struct HostError {
    op: &'static str,
    message: String,
}

impl HostError {
    pub fn new(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
        }
    }

    /// Name of the primitive that failed (`"insert_before"`, ...).
    #[must_use]
    pub fn op(&self) -> &'static str {
        self.op
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Top-level reconciler error.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A component body returned an error.
    #[error("component `{component}` failed to render: {source}")]
    Render {
        component: String,
        #[source]
        source: RenderError,
    },

    /// A component broke the hook call-order contract.
    #[error("component `{component}` violated hook order: {source}")]
    Hook {
        component: String,
        #[source]
        source: HookError,
    },

    /// A host primitive failed during render or commit.
    #[error(transparent)]
    Host(#[from] HostError),

    /// Synchronous re-commits exceeded the configured limit.
    #[error("maximum update depth exceeded: {limit} nested synchronous commits")]
    NestedUpdateLimit { limit: u32 },

    /// The scheduler rejected a callback.
    #[error(transparent)]
    Scheduler(#[from] TaskError),
}

impl ReconcileError {
    pub(crate) fn from_render(component: &str, error: RenderError) -> Self {
        match error {
            RenderError::Hook(source) => Self::Hook {
                component: component.to_owned(),
                source,
            },
            source => Self::Render {
                component: component.to_owned(),
                source,
            },
        }
    }

    /// The hook violation behind this error, if any.
    #[must_use]
    pub fn as_hook_error(&self) -> Option<&HookError> {
        match self {
            Self::Hook { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The host failure behind this error, if any.
    #[must_use]
    pub fn as_host_error(&self) -> Option<&HostError> {
        match self {
            Self::Host(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_render_errors_become_hook_variant() {
        let err = ReconcileError::from_render(
            "Counter",
            RenderError::Hook(HookError::TooMany { index: 2 }),
        );
        assert_eq!(err.as_hook_error(), Some(&HookError::TooMany { index: 2 }));
        assert!(err.to_string().contains("Counter"));
    }

    #[test]
    fn message_errors_keep_component_name() {
        let err = ReconcileError::from_render("List", RenderError::msg("bad row"));
        assert!(matches!(err, ReconcileError::Render { .. }));
        assert_eq!(err.to_string(), "component `List` failed to render: bad row");
    }

    #[test]
    fn host_error_display() {
        let err = HostError::new("insert_before", "anchor detached");
        assert_eq!(err.op(), "insert_before");
        assert_eq!(err.to_string(), "host insert_before failed: anchor detached");
        let wrapped: ReconcileError = err.clone().into();
        assert_eq!(wrapped.as_host_error(), Some(&err));
    }

    #[test]
    fn kind_mismatch_names_both_hooks() {
        let err = HookError::KindMismatch {
            index: 0,
            expected: HookKind::State,
            found: HookKind::Effect,
        };
        let text = err.to_string();
        assert!(text.contains("use_state") && text.contains("use_effect"));
    }
}
