pub mod toml_config;

pub use toml_config::SchedulerConfig;

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "smart-multiprocessing")]
#[command(about = "Run many tasks as child processes without running out of memory")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "smp.toml")]
    pub config: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Print updates as JSON lines instead of text
    #[arg(long)]
    pub json: bool,

    /// Show what would be run without starting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Override resources.process_count
    #[arg(long)]
    pub process_count: Option<usize>,

    /// Override resources.memory_mb
    #[arg(long)]
    pub memory_mb: Option<u64>,

    /// Override resources.max_memory_mb
    #[arg(long)]
    pub max_memory_mb: Option<u64>,

    /// Override run.name
    #[arg(long)]
    pub name: Option<String>,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 命令列覆蓋設定檔
    pub fn apply_overrides(&self, config: &mut SchedulerConfig) {
        if let Some(count) = self.process_count {
            config.resources.process_count = Some(count);
        }
        if let Some(memory) = self.memory_mb {
            config.resources.memory_mb = Some(memory);
        }
        if let Some(max_memory) = self.max_memory_mb {
            config.resources.max_memory_mb = Some(max_memory);
        }
        if let Some(name) = &self.name {
            config.run.name = Some(name.clone());
        }
    }
}
