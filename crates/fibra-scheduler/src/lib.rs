#![forbid(unsafe_code)]

//! Cooperative priority scheduler for fibra.
//!
//! A single-threaded task runner in the style of a browser frame loop: the
//! host calls [`Scheduler::perform_work_until_deadline`] once per frame, the
//! scheduler runs queued callbacks in expiration order until its slice budget
//! (`frame_interval`) is spent, and long-running work cooperates by checking
//! [`Scheduler::should_yield`] and returning a continuation.
//!
//! # Example
//!
//! ```
//! use fibra_scheduler::{ManualClock, PriorityLevel, Scheduler, SchedulerConfig, TaskStatus};
//!
//! let scheduler = Scheduler::with_clock(SchedulerConfig::default(), ManualClock::new());
//! scheduler
//!     .schedule_callback(PriorityLevel::Normal, |_did_timeout| Ok(TaskStatus::Complete))
//!     .unwrap();
//! scheduler.run_until_idle().unwrap();
//! assert_eq!(scheduler.pending_tasks(), 0);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod priority;
pub mod scheduler;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::SchedulerConfig;
pub use error::{Result, TaskError};
pub use priority::PriorityLevel;
pub use scheduler::{Scheduler, SchedulerStats, TaskCallback, TaskHandle, TaskResult, TaskStatus};
