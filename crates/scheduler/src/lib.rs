pub mod cli;
pub mod scheduler;

pub use scheduler::{RunStats, Scheduler, SchedulerConfig, SchedulerError, SchedulerState};
