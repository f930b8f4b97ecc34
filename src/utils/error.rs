use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("No uncompleted tasks found for run '{run_name}'")]
    NoRemainingTasks { run_name: String },

    #[error("Failed to spawn task '{task_id}': {source}")]
    SpawnError {
        task_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Task '{task_id}' failed after {attempts} attempt(s) (exit code: {exit_code:?})")]
    TaskFailed {
        task_id: String,
        exit_code: Option<i32>,
        attempts: u32,
    },

    #[error("Memory usage {used} bytes exceeded the limit of {limit} bytes")]
    OverMemory { used: u64, limit: u64 },

    #[error("Signal delivery to pid {pid} failed: {message}")]
    SignalError { pid: u32, message: String },

    #[error("System information unavailable: {message}")]
    SystemInfoError { message: String },

    #[error("Operation not supported on this platform: {operation}")]
    Unsupported { operation: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Io,
    Process,
    Resource,
    Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SchedulerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SchedulerError::ConfigValidationError { .. }
            | SchedulerError::InvalidConfigValueError { .. }
            | SchedulerError::MissingConfigError { .. }
            | SchedulerError::NoRemainingTasks { .. } => ErrorCategory::Configuration,
            SchedulerError::IoError(_) | SchedulerError::CsvError(_) => ErrorCategory::Io,
            SchedulerError::SpawnError { .. }
            | SchedulerError::TaskFailed { .. }
            | SchedulerError::SignalError { .. } => ErrorCategory::Process,
            SchedulerError::OverMemory { .. } | SchedulerError::SystemInfoError { .. } => {
                ErrorCategory::Resource
            }
            SchedulerError::Unsupported { .. } => ErrorCategory::Platform,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 所有任務都已完成，不算真正的失敗
            SchedulerError::NoRemainingTasks { .. } => ErrorSeverity::Low,
            SchedulerError::TaskFailed { .. } | SchedulerError::OverMemory { .. } => {
                ErrorSeverity::Medium
            }
            SchedulerError::ConfigValidationError { .. }
            | SchedulerError::InvalidConfigValueError { .. }
            | SchedulerError::MissingConfigError { .. }
            | SchedulerError::SpawnError { .. }
            | SchedulerError::CsvError(_) => ErrorSeverity::High,
            SchedulerError::IoError(_)
            | SchedulerError::SignalError { .. }
            | SchedulerError::SystemInfoError { .. }
            | SchedulerError::Unsupported { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            SchedulerError::ConfigValidationError { field, .. }
            | SchedulerError::InvalidConfigValueError { field, .. } => {
                format!("Check the '{}' entry in your configuration file", field)
            }
            SchedulerError::MissingConfigError { field } => {
                format!("Add the '{}' entry to your configuration file", field)
            }
            SchedulerError::NoRemainingTasks { .. } => {
                "Delete the completed tasks log or choose a new run name to run the tasks again"
                    .to_string()
            }
            SchedulerError::SpawnError { .. } => {
                "Make sure [command].program exists and is executable".to_string()
            }
            SchedulerError::TaskFailed { task_id, .. } => format!(
                "Inspect the log of task '{}', or raise failed_task_repeats / disable stop_all_on_error",
                task_id
            ),
            SchedulerError::OverMemory { .. } => {
                "Lower process_count or memory_mb, or set error_on_overmemory = false to evict tasks instead"
                    .to_string()
            }
            SchedulerError::CsvError(_) => {
                "The completed tasks log may be corrupt; fix or remove it".to_string()
            }
            SchedulerError::IoError(_) => {
                "Check file permissions and free disk space in the log directory".to_string()
            }
            SchedulerError::SignalError { .. } => {
                "The process may belong to another user or have already exited".to_string()
            }
            SchedulerError::SystemInfoError { .. } => {
                "Set process_count and memory_mb explicitly in the configuration".to_string()
            }
            SchedulerError::Unsupported { .. } => {
                "Pause and signal based termination require a Unix platform".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            SchedulerError::NoRemainingTasks { run_name } => format!(
                "Nothing to do: every task of run '{}' has already completed",
                run_name
            ),
            SchedulerError::TaskFailed {
                task_id, attempts, ..
            } => format!("Task '{}' failed ({} attempt(s))", task_id, attempts),
            SchedulerError::OverMemory { used, limit } => format!(
                "Memory limit exceeded: {:.2} GB used of {:.2} GB allowed",
                *used as f64 / GB,
                *limit as f64 / GB
            ),
            other => other.to_string(),
        }
    }
}

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub type Result<T> = std::result::Result<T, SchedulerError>;
