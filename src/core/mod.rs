pub mod admission;
pub mod forecast;
pub mod process;
pub mod scheduler;
pub mod task_log;

pub use crate::domain::model::{RunSummary, SchedulerCommand, SchedulerUpdate, Task};
pub use crate::domain::ports::{Gui, ResourceProbe};
pub use crate::utils::error::Result;
