//! A worker for exercising the scheduler: waits, optionally holds memory,
//! optionally spawns children, optionally fails.
use clap::Parser;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "smp-test-worker")]
#[command(about = "Test task for smart-multiprocessing")]
// 任務參數接在模板參數後面，後出現的值覆蓋前面的
#[command(args_override_self = true)]
struct Args {
    /// Seconds to wait
    #[arg(long, default_value = "1")]
    wait: f64,

    /// Megabytes to allocate and keep touched while waiting
    #[arg(long, default_value = "0")]
    memory_mb: usize,

    /// Exit with code 1 after waiting
    #[arg(long)]
    fail: bool,

    /// Number of child processes (copies of this worker without --children)
    #[arg(long, default_value = "0")]
    children: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let task_id = std::env::var("SMP_TASK_ID").unwrap_or_else(|_| "?".to_string());
    println!("Starting worker for task {}", task_id);

    let mut children = Vec::new();
    for _ in 0..args.children {
        let child = std::process::Command::new(std::env::current_exe()?)
            .arg("--wait")
            .arg(args.wait.to_string())
            .arg("--memory-mb")
            .arg(args.memory_mb.to_string())
            .spawn()?;
        println!("Spawned child {}", child.id());
        children.push(child);
    }

    // 實際寫入每一頁，確保記憶體真的被佔用
    let mut block = vec![0u8; args.memory_mb * 1024 * 1024];
    for byte in block.iter_mut().step_by(4096) {
        *byte = 1;
    }
    if args.memory_mb > 0 {
        println!("Allocated {} MB", args.memory_mb);
    }

    println!("Waiting for {} seconds", args.wait);
    std::thread::sleep(Duration::from_secs_f64(args.wait.max(0.0)));
    let touched: usize = block.iter().step_by(4096).map(|&b| b as usize).sum();

    for mut child in children {
        child.wait()?;
    }

    if args.fail {
        eprintln!("Failing on purpose");
        std::process::exit(1);
    }

    println!("Waiting completed! ({} pages held)", touched);
    Ok(())
}
