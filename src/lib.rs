pub mod config;
pub mod core;
pub mod domain;
pub mod gui;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::SchedulerConfig;
pub use crate::core::process::SmartProcess;
pub use crate::core::scheduler::{Scheduler, SchedulerHandle};
pub use domain::model::{RunOutcome, RunSummary, SchedulerCommand, SchedulerUpdate, Task};
pub use utils::error::{Result, SchedulerError};
