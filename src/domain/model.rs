use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// 一個要在子程序中執行的任務
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub args: Vec<String>,
    pub metadata: Option<String>,
    /// bytes
    pub expected_memory: Option<u64>,
    /// seconds
    pub expected_runtime: Option<f64>,
    pub priority: i32,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            args: Vec::new(),
            metadata: None,
            expected_memory: None,
            expected_runtime: None,
            priority: 0,
        }
    }

    pub fn with_expected_memory(mut self, bytes: u64) -> Self {
        self.expected_memory = Some(bytes);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running { slot: usize },
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

/// 完成任務日誌 (CSV) 中的一列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub metadata: Option<String>,
    pub status: TaskStatus,
    pub attempts: u32,
    pub runtime_secs: f64,
    pub peak_memory_bytes: u64,
    pub exit_code: Option<i32>,
    pub completed_at: DateTime<Local>,
}

/// 執行期間可調整的設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub process_count: Option<usize>,
    pub memory_mb: Option<u64>,
    pub max_memory_mb: Option<u64>,
    pub failed_task_repeats: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SchedulerCommand {
    /// 跑完目前的任務後停止，不再啟動新任務
    Stop,
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
    Pause,
    Resume,
    Update(ConfigUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotStatus {
    pub slot: usize,
    pub task_id: Option<String>,
    pub update: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub step: u64,
    pub slots: Vec<SlotStatus>,
    pub running: usize,
    pub max_slots: usize,
    pub cpu_percent: f32,
    pub memory_used: u64,
    pub memory_expected: u64,
    pub memory_budget: u64,
    pub max_memory: u64,
    pub remaining_tasks: usize,
    pub paused: bool,
    pub expected_finish: Option<DateTime<Local>>,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let padding = self.slots.len().to_string().len();
        writeln!(f, "-- Process slots (step {}) --", self.step)?;
        for slot in &self.slots {
            writeln!(f, "{:<width$}: {}", slot.slot, slot.update, width = padding)?;
        }
        writeln!(f, "-- Current total resource use --")?;
        writeln!(f, "Processes: {} of {}", self.running, self.max_slots)?;
        writeln!(f, "CPU: {:.1}%", self.cpu_percent)?;
        writeln!(
            f,
            "RAM: {:.3} GB of {:.3} GB ({:.3} GB expected, {:.3} GB budget)",
            self.memory_used as f64 / GB,
            self.max_memory as f64 / GB,
            self.memory_expected as f64 / GB,
            self.memory_budget as f64 / GB
        )?;
        writeln!(f, "-- Forecasts --")?;
        writeln!(f, "Remaining tasks: {}", self.remaining_tasks)?;
        match self.expected_finish {
            Some(finish) => write!(f, "Expected finish: {}", finish.format("%y.%m.%d - %H:%M:%S"))?,
            None => write!(f, "Expected finish: unknown")?,
        }
        if self.paused {
            write!(f, "\n** PAUSED **")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerUpdate {
    TaskStarted {
        slot: usize,
        task_id: String,
        pid: u32,
    },
    TaskOutput {
        task_id: String,
        line: String,
    },
    TaskSucceeded {
        task_id: String,
        runtime_secs: f64,
        peak_memory_bytes: u64,
    },
    TaskFailed {
        task_id: String,
        exit_code: Option<i32>,
        attempts: u32,
        will_retry: bool,
    },
    TaskEvicted {
        task_id: String,
        memory_bytes: u64,
    },
    Paused,
    Resumed,
    Stopping {
        reason: String,
    },
    Status(StatusSnapshot),
}

impl fmt::Display for SchedulerUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerUpdate::TaskStarted { slot, task_id, pid } => {
                write!(f, "Started task {} in slot {} (pid {})", task_id, slot, pid)
            }
            SchedulerUpdate::TaskOutput { task_id, line } => write!(f, "{}: {}", task_id, line),
            SchedulerUpdate::TaskSucceeded {
                task_id,
                runtime_secs,
                peak_memory_bytes,
            } => write!(
                f,
                "Task {} finished in {:.1}s (peak {:.3} GB)",
                task_id,
                runtime_secs,
                *peak_memory_bytes as f64 / GB
            ),
            SchedulerUpdate::TaskFailed {
                task_id,
                exit_code,
                attempts,
                will_retry,
            } => write!(
                f,
                "Task {} failed with exit code {:?} (attempt {}){}",
                task_id,
                exit_code,
                attempts,
                if *will_retry { ", retrying" } else { "" }
            ),
            SchedulerUpdate::TaskEvicted {
                task_id,
                memory_bytes,
            } => write!(
                f,
                "Task {} evicted at {:.3} GB to stay under the memory limit",
                task_id,
                *memory_bytes as f64 / GB
            ),
            SchedulerUpdate::Paused => write!(f, "Paused all running tasks"),
            SchedulerUpdate::Resumed => write!(f, "Resumed all running tasks"),
            SchedulerUpdate::Stopping { reason } => write!(f, "Stopping: {}", reason),
            SchedulerUpdate::Status(snapshot) => write!(f, "\n{}", snapshot),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Stopped,
    Terminated,
    Killed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub succeeded: usize,
    pub failed: usize,
    /// 之前的執行已完成而跳過的任務
    pub skipped: usize,
    pub evicted: usize,
    pub peak_memory_bytes: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_display() {
        let update = SchedulerUpdate::TaskFailed {
            task_id: "t3".to_string(),
            exit_code: Some(2),
            attempts: 1,
            will_retry: true,
        };
        assert_eq!(
            update.to_string(),
            "Task t3 failed with exit code Some(2) (attempt 1), retrying"
        );
    }

    #[test]
    fn test_command_json_shape() {
        let cmd: SchedulerCommand = serde_json::from_str(r#"{"command":"pause"}"#).unwrap();
        assert_eq!(cmd, SchedulerCommand::Pause);

        let cmd: SchedulerCommand =
            serde_json::from_str(r#"{"command":"update","process_count":3}"#).unwrap();
        assert_eq!(
            cmd,
            SchedulerCommand::Update(ConfigUpdate {
                process_count: Some(3),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_snapshot_display_lists_slots() {
        let snapshot = StatusSnapshot {
            step: 7,
            slots: vec![
                SlotStatus {
                    slot: 0,
                    task_id: Some("a".to_string()),
                    update: "working".to_string(),
                },
                SlotStatus {
                    slot: 1,
                    task_id: None,
                    update: "-".to_string(),
                },
            ],
            running: 1,
            max_slots: 2,
            cpu_percent: 12.5,
            memory_used: 0,
            memory_expected: 0,
            memory_budget: 0,
            max_memory: 0,
            remaining_tasks: 4,
            paused: true,
            expected_finish: None,
        };
        let text = snapshot.to_string();
        assert!(text.contains("0: working"));
        assert!(text.contains("Processes: 1 of 2"));
        assert!(text.contains("Remaining tasks: 4"));
        assert!(text.ends_with("** PAUSED **"));
    }
}
