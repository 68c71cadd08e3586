//! Scheduler for workflow time-based work.
//!
//! This crate provides:
//!
//! - **Scheduled work**: the two engine entry points driven by time
//! - **Scheduler**: ticks them on fixed cadences until shutdown

pub mod schedule;
pub mod work;

pub use schedule::{Scheduler, SchedulerConfig};
pub use work::ScheduledWork;
