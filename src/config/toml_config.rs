use crate::domain::model::{ConfigUpdate, Task};
use crate::utils::error::{Result, SchedulerError};
use crate::utils::monitor;
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const MB: u64 = 1024 * 1024;

pub const DEFAULT_RUN_NAME: &str = "Untitled_SmartMultiprocessing_Run";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    pub command: CommandConfig,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub name: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub log_main_thread: Option<bool>,
    pub log_every_process: Option<bool>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesConfig {
    pub process_count: Option<usize>,
    pub memory_mb: Option<u64>,
    pub max_memory_mb: Option<u64>,
    pub default_task_memory_mb: Option<u64>,
    pub error_on_overmemory: Option<bool>,
    pub stop_all_on_error: Option<bool>,
    pub failed_task_repeats: Option<u32>,
    pub benchmarking_tasks: Option<usize>,
    pub measure_children: Option<bool>,
    pub shutdown_grace_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub metadata: Option<String>,
    pub expected_memory_mb: Option<u64>,
    pub expected_runtime_secs: Option<f64>,
    pub priority: Option<i32>,
}

/// 系統預設值，只量測一次
struct SystemDefaults {
    cores: usize,
    total_memory: u64,
}

fn system_defaults() -> &'static SystemDefaults {
    static DEFAULTS: OnceLock<SystemDefaults> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        let cores = monitor::usable_physical_cpu_count().unwrap_or_else(|e| {
            tracing::warn!("⚠️ {}; assuming a single core", e);
            1
        });
        SystemDefaults {
            cores,
            total_memory: monitor::total_system_memory(),
        }
    })
}

impl SchedulerConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(SchedulerError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| SchedulerError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${DATA_DIR})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| SchedulerError::ConfigValidationError {
            field: "env_substitution".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("command.program", &self.command.program)?;
        validation::validate_non_empty_string("run.name", self.run_name())?;

        let log_dir = self.log_dir();
        validation::validate_path("run.log_dir", &log_dir.to_string_lossy())?;

        if self.tasks.is_empty() {
            return Err(SchedulerError::MissingConfigError {
                field: "tasks".to_string(),
            });
        }
        validation::validate_unique_ids("tasks.id", self.tasks.iter().map(|t| t.id.as_str()))?;

        validation::validate_positive_number("resources.process_count", self.process_count(), 1)?;
        validation::validate_positive_number(
            "run.poll_interval_ms",
            self.run.poll_interval_ms.unwrap_or(1) as usize,
            1,
        )?;

        let max_memory = self.max_memory_bytes();
        validation::validate_range("resources.memory_mb", self.memory_bytes() / MB, 1, max_memory / MB)?;

        for task in &self.tasks {
            if let Some(runtime) = task.expected_runtime_secs {
                if !(runtime.is_finite() && runtime >= 0.0) {
                    return Err(SchedulerError::InvalidConfigValueError {
                        field: "tasks.expected_runtime_secs".to_string(),
                        value: runtime.to_string(),
                        reason: "Runtime must be a non-negative number".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// 套用執行期間的設定更新，失敗時保持原設定
    pub fn apply_update(&mut self, update: &ConfigUpdate) -> Result<()> {
        let mut candidate = self.clone();
        if let Some(count) = update.process_count {
            candidate.resources.process_count = Some(count);
        }
        if let Some(memory) = update.memory_mb {
            candidate.resources.memory_mb = Some(memory);
        }
        if let Some(max_memory) = update.max_memory_mb {
            candidate.resources.max_memory_mb = Some(max_memory);
        }
        if let Some(repeats) = update.failed_task_repeats {
            candidate.resources.failed_task_repeats = Some(repeats);
        }
        candidate.validate_config()?;
        *self = candidate;
        Ok(())
    }

    pub fn run_name(&self) -> &str {
        self.run.name.as_deref().unwrap_or(DEFAULT_RUN_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.run
            .log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn completed_tasks_log(&self) -> PathBuf {
        self.log_dir()
            .join(format!("{}_completed_tasks.csv", self.run_name()))
    }

    pub fn main_log(&self) -> Option<PathBuf> {
        if self.run.log_main_thread.unwrap_or(false) {
            Some(self.log_dir().join(format!("{}_main.log", self.run_name())))
        } else {
            None
        }
    }

    pub fn log_every_process(&self) -> bool {
        self.run.log_every_process.unwrap_or(false)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.run.poll_interval_ms.unwrap_or(500).max(1))
    }

    pub fn process_count(&self) -> usize {
        self.resources
            .process_count
            .unwrap_or_else(|| system_defaults().cores)
    }

    /// 軟性上限：新任務的預期記憶體必須放得進這裡
    pub fn memory_bytes(&self) -> u64 {
        match self.resources.memory_mb {
            Some(mb) => mb * MB,
            None => (system_defaults().total_memory as f64 * 0.6) as u64,
        }
    }

    /// 硬性上限：超過就驅逐任務或報錯
    pub fn max_memory_bytes(&self) -> u64 {
        match self.resources.max_memory_mb {
            Some(mb) => mb * MB,
            None => {
                let default = (system_defaults().total_memory as f64 * 0.8) as u64;
                default.max(self.resources.memory_mb.map(|mb| mb * MB).unwrap_or(0))
            }
        }
    }

    pub fn default_task_memory_bytes(&self) -> u64 {
        match self.resources.default_task_memory_mb {
            Some(mb) => mb * MB,
            None => {
                let defaults = system_defaults();
                (defaults.total_memory as f64 / defaults.cores.max(1) as f64 * 0.7) as u64
            }
        }
    }

    pub fn error_on_overmemory(&self) -> bool {
        self.resources.error_on_overmemory.unwrap_or(false)
    }

    pub fn stop_all_on_error(&self) -> bool {
        self.resources.stop_all_on_error.unwrap_or(true)
    }

    pub fn failed_task_repeats(&self) -> u32 {
        self.resources.failed_task_repeats.unwrap_or(0)
    }

    pub fn benchmarking_tasks(&self) -> usize {
        self.resources.benchmarking_tasks.unwrap_or(0)
    }

    pub fn measure_children(&self) -> bool {
        self.resources.measure_children.unwrap_or(true)
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.resources.shutdown_grace_secs.unwrap_or(5))
    }

    /// 依設定順序轉成 Task
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .map(|t| Task {
                id: t.id.clone(),
                args: t.args.clone(),
                metadata: t.metadata.clone(),
                expected_memory: t.expected_memory_mb.map(|mb| mb * MB),
                expected_runtime: t.expected_runtime_secs,
                priority: t.priority.unwrap_or(0),
            })
            .collect()
    }

    /// 模板參數中的 `{id}` 換成任務 id，之後接上任務自己的參數
    pub fn argv_for(&self, task: &Task) -> Vec<String> {
        self.command
            .args
            .iter()
            .map(|arg| arg.replace("{id}", &task.id))
            .chain(task.args.iter().cloned())
            .collect()
    }
}

impl Validate for SchedulerConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
