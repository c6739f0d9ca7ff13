#![forbid(unsafe_code)]

//! Fiber reconciliation engine.
//!
//! # Role in fibra
//! `fibra-reconciler` turns a description of the UI ([`Node`] trees built
//! from host elements, text and function [`Component`]s) into the smallest
//! sequence of mutations on a host tree. The host itself is abstract: any
//! backend implementing [`HostConfig`] can be driven.
//!
//! # Primary responsibilities
//! - **Lanes**: bitmask priorities, starvation and expiration tracking.
//! - **Update queues**: ordered, lane-filtered state transitions with rebasing.
//! - **Child reconciliation**: keyed diffing with minimal moves.
//! - **Hooks**: state, reducers, refs, memos and effects on function components.
//! - **Work loop**: interruptible render passes driven by `fibra-scheduler`.
//! - **Commit**: mutation, layout and passive effect phases.
//!
//! # How it fits in the system
//! The render phase is pure with respect to the host and may be paused,
//! resumed or thrown away. Only the commit phase touches host instances, and
//! it always runs to completion. Scheduling goes through a shared
//! [`fibra_scheduler::Scheduler`], so several roots can share one frame loop.

pub mod config;
pub mod element;
pub mod error;
pub mod event_priority;
pub mod fiber;
pub mod flags;
pub mod hooks;
pub mod host;
pub mod lane;
pub mod update_queue;

mod begin_work;
mod child_reconciler;
mod commit_work;
mod complete_work;
mod concurrent_updates;
mod root;
mod sync_queue;
mod work_loop;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use config::{ReconcilerConfig, RootMode};
pub use element::{
    AttrChange, Component, Element, ElementBuilder, ElementType, HostRef, Key, Node, PropValue,
    Props,
};
pub use error::{HookError, HookKind, HostError, ReconcileError, RenderError, Result};
pub use event_priority::EventPriority;
pub use fiber::{Fiber, FiberId, FiberTree, WorkTag};
pub use flags::Flags;
pub use hooks::{Dispatch, HookCx, IntoTeardown, RefObject, SetStateAction, StateSetter, Teardown};
pub use host::HostConfig;
pub use lane::{
    DEFAULT_LANE, IDLE_LANE, INPUT_CONTINUOUS_LANE, Lane, Lanes, NO_LANE, NO_LANES, SYNC_LANE,
    TRANSITION_LANES,
};
pub use root::{Root, RootStats};
