use clap::Parser;
use smart_multiprocessing::domain::ports::Gui;
use smart_multiprocessing::gui::{JsonGui, PrintGui};
use smart_multiprocessing::utils::error::ErrorSeverity;
use smart_multiprocessing::utils::{logger, validation::Validate};
use smart_multiprocessing::{CliConfig, RunOutcome, Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliConfig::parse();

    // 載入 TOML 配置
    let mut config = match SchedulerConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };
    args.apply_overrides(&mut config);

    // 初始化日誌
    if args.json {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose, config.main_log().as_deref());
    }

    tracing::info!("🚀 Starting smart-multiprocessing");
    tracing::info!("📁 Loaded configuration from: {}", args.config);

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    display_config_summary(&config);

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No tasks will be started");
        perform_dry_run(&config);
        return Ok(());
    }

    let gui: Box<dyn Gui> = if args.json {
        Box::new(JsonGui::new())
    } else {
        Box::new(PrintGui::new(20, args.verbose))
    };

    let scheduler = match Scheduler::new(config, gui) {
        Ok(scheduler) => scheduler,
        Err(e) => exit_with(e),
    };

    // 第一次 Ctrl-C 等待目前任務結束，第二次送出 SIGTERM
    let handle = scheduler.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Ctrl-C: finishing running tasks (press again to terminate)");
            handle.stop();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Ctrl-C: terminating running tasks");
            handle.terminate();
        }
    });

    match scheduler.run().await {
        Ok(summary) => {
            if args.json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!(
                    "✅ {} succeeded, {} failed, {} skipped, {} evicted",
                    summary.succeeded, summary.failed, summary.skipped, summary.evicted
                );
                if summary.outcome != RunOutcome::Completed {
                    println!("⚠️ Run ended early: {:?}", summary.outcome);
                }
            }
            if summary.outcome != RunOutcome::Completed {
                std::process::exit(2);
            }
            if summary.failed > 0 {
                std::process::exit(1);
            }
        }
        Err(e) => exit_with(e),
    }

    Ok(())
}

fn exit_with(e: smart_multiprocessing::SchedulerError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}

fn display_config_summary(config: &SchedulerConfig) {
    const MB: u64 = 1024 * 1024;
    tracing::info!("📋 Run: {}", config.run_name());
    tracing::info!(
        "⚙️ Command: {} {}",
        config.command.program,
        config.command.args.join(" ")
    );
    tracing::info!(
        "🧮 Processes: {}, memory budget: {} MB, hard limit: {} MB",
        config.process_count(),
        config.memory_bytes() / MB,
        config.max_memory_bytes() / MB
    );
    tracing::info!(
        "🔁 Failed task repeats: {}, stop all on error: {}",
        config.failed_task_repeats(),
        config.stop_all_on_error()
    );
    tracing::info!("📁 Logs: {}", config.log_dir().display());
}

fn perform_dry_run(config: &SchedulerConfig) {
    for task in config.tasks() {
        println!(
            "{} {} {}",
            task.id,
            config.command.program,
            config.argv_for(&task).join(" ")
        );
    }
    println!("{} task(s) would be scheduled", config.tasks.len());
}
