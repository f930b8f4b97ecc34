use smart_multiprocessing::core::task_log::CompletedTaskLog;
use smart_multiprocessing::domain::model::TaskStatus;
use smart_multiprocessing::domain::ports::{Gui, ResourceProbe};
use smart_multiprocessing::gui::SilentGui;
use smart_multiprocessing::utils::monitor::SysinfoProbe;
use smart_multiprocessing::{
    RunOutcome, Scheduler, SchedulerCommand, SchedulerConfig, SchedulerError, SchedulerUpdate,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const WORKER: &str = env!("CARGO_BIN_EXE_smp-test-worker");

#[derive(Clone, Default)]
struct RecordingGui {
    updates: Arc<Mutex<Vec<SchedulerUpdate>>>,
}

impl Gui for RecordingGui {
    fn start(&mut self) {}
    fn stop(&mut self) {}
    fn update(&mut self, updates: &[SchedulerUpdate]) {
        self.updates.lock().unwrap().extend_from_slice(updates);
    }
    fn get_commands(&mut self) -> Option<Vec<SchedulerCommand>> {
        None
    }
}

fn build_config(dir: &TempDir, resources: &str, wait: f64, tasks: &str) -> SchedulerConfig {
    let resources = format!(
        "memory_mb = 4096\nmax_memory_mb = 1000000\ndefault_task_memory_mb = 1\n{}",
        resources
    );
    build_config_with_limits(dir, &resources, wait, tasks)
}

/// 記憶體上限完全由呼叫端決定
fn build_config_with_limits(
    dir: &TempDir,
    resources: &str,
    wait: f64,
    tasks: &str,
) -> SchedulerConfig {
    let text = format!(
        r#"
[run]
name = "integration"
log_dir = "{log_dir}"
poll_interval_ms = 20
log_every_process = true

[resources]
{resources}

[command]
program = "{worker}"
args = ["--wait", "{wait}"]

{tasks}
"#,
        log_dir = dir.path().display(),
        resources = resources,
        worker = WORKER,
        wait = wait,
        tasks = tasks,
    );
    SchedulerConfig::from_toml_str(&text).unwrap()
}

/// 回傳指定 TaskOutput 前綴後面的 pid
fn reported_pids(updates: &[SchedulerUpdate], prefix: &str) -> Vec<u32> {
    updates
        .iter()
        .filter_map(|u| match u {
            SchedulerUpdate::TaskOutput { line, .. } => line.strip_prefix(prefix),
            _ => None,
        })
        .filter_map(|pid| pid.trim().parse().ok())
        .collect()
}

/// zombie 不算活著
fn alive(pid: u32) -> bool {
    use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}

fn completed_log(dir: &TempDir) -> CompletedTaskLog {
    CompletedTaskLog::open(dir.path().join("integration_completed_tasks.csv")).unwrap()
}

#[tokio::test]
async fn test_runs_all_tasks_and_records_them() {
    let dir = TempDir::new().unwrap();
    let config = build_config(
        &dir,
        "process_count = 2",
        0.1,
        r#"
[[tasks]]
id = "a"
[[tasks]]
id = "b"
metadata = "second task"
[[tasks]]
id = "c"
[[tasks]]
id = "d"
"#,
    );

    let gui = RecordingGui::default();
    let scheduler = Scheduler::new(config, Box::new(gui.clone())).unwrap();
    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);

    let log = completed_log(&dir);
    assert_eq!(log.records().len(), 4);
    assert!(log.records().iter().all(|r| r.status == TaskStatus::Succeeded));
    let b = log.records().iter().find(|r| r.id == "b").unwrap();
    assert_eq!(b.metadata.as_deref(), Some("second task"));

    // 每個任務都有自己的日誌檔
    let task_logs = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
        .count();
    assert_eq!(task_logs, 4);

    let updates = gui.updates.lock().unwrap();
    let max_running = updates
        .iter()
        .filter_map(|u| match u {
            SchedulerUpdate::Status(s) => Some(s.running),
            _ => None,
        })
        .max()
        .unwrap();
    assert!(max_running <= 2);
    assert!(updates
        .iter()
        .any(|u| matches!(u, SchedulerUpdate::TaskOutput { line, .. } if line.starts_with("Starting worker"))));
}

#[tokio::test]
async fn test_resumes_from_completed_log() {
    let dir = TempDir::new().unwrap();
    let two = r#"
[[tasks]]
id = "a"
[[tasks]]
id = "b"
"#;
    let config = build_config(&dir, "process_count = 2", 0.05, two);
    let summary = Scheduler::new(config, Box::new(SilentGui))
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 2);

    let three = format!("{}\n[[tasks]]\nid = \"c\"\n", two);
    let config = build_config(&dir, "process_count = 2", 0.05, &three);
    let summary = Scheduler::new(config, Box::new(SilentGui))
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.succeeded, 1);

    let config = build_config(&dir, "process_count = 2", 0.05, &three);
    let result = Scheduler::new(config, Box::new(SilentGui));
    assert!(matches!(result, Err(SchedulerError::NoRemainingTasks { .. })));

    // 表頭只寫一次
    let content =
        std::fs::read_to_string(dir.path().join("integration_completed_tasks.csv")).unwrap();
    assert_eq!(content.lines().count(), 4);
}

#[tokio::test]
async fn test_failed_task_is_retried_then_recorded() {
    let dir = TempDir::new().unwrap();
    let config = build_config(
        &dir,
        r#"
process_count = 2
failed_task_repeats = 1
stop_all_on_error = false
"#,
        0.05,
        r#"
[[tasks]]
id = "ok"
[[tasks]]
id = "broken"
args = ["--fail"]
"#,
    );

    let gui = RecordingGui::default();
    let summary = Scheduler::new(config, Box::new(gui.clone()))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    let log = completed_log(&dir);
    let broken = log.records().iter().find(|r| r.id == "broken").unwrap();
    assert_eq!(broken.status, TaskStatus::Failed);
    assert_eq!(broken.attempts, 2);
    assert_eq!(broken.exit_code, Some(1));

    let updates = gui.updates.lock().unwrap();
    let retries = updates
        .iter()
        .filter(|u| matches!(u, SchedulerUpdate::TaskFailed { will_retry: true, .. }))
        .count();
    assert_eq!(retries, 1);
}

#[tokio::test]
async fn test_stop_all_on_error_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let config = build_config(
        &dir,
        "process_count = 2",
        0.05,
        r#"
[[tasks]]
id = "broken"
args = ["--fail"]
[[tasks]]
id = "slow"
args = ["--wait", "30"]
"#,
    );

    let result = tokio::time::timeout(
        Duration::from_secs(20),
        Scheduler::new(config, Box::new(SilentGui)).unwrap().run(),
    )
    .await
    .expect("run should end without waiting for the slow task");

    match result {
        Err(SchedulerError::TaskFailed {
            task_id, attempts, ..
        }) => {
            assert_eq!(task_id, "broken");
            assert_eq!(attempts, 1);
        }
        other => panic!("expected TaskFailed, got {:?}", other.map(|s| s.outcome)),
    }
}

#[tokio::test]
async fn test_stop_lets_running_tasks_finish() {
    let dir = TempDir::new().unwrap();
    let config = build_config(
        &dir,
        "process_count = 1",
        0.5,
        r#"
[[tasks]]
id = "a"
[[tasks]]
id = "b"
[[tasks]]
id = "c"
"#,
    );

    let scheduler = Scheduler::new(config, Box::new(SilentGui)).unwrap();
    let handle = scheduler.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop();
    });

    let summary = scheduler.run().await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(completed_log(&dir).records().len(), 1);
}

#[tokio::test]
async fn test_terminate_ends_run_quickly() {
    let dir = TempDir::new().unwrap();
    let config = build_config(
        &dir,
        "process_count = 2",
        30.0,
        r#"
[[tasks]]
id = "a"
[[tasks]]
id = "b"
"#,
    );

    let scheduler = Scheduler::new(config, Box::new(SilentGui)).unwrap();
    let handle = scheduler.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.terminate();
    });

    let summary = tokio::time::timeout(Duration::from_secs(15), scheduler.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Terminated);
    assert_eq!(summary.succeeded, 0);
    assert!(completed_log(&dir).records().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_pause_and_resume() {
    let dir = TempDir::new().unwrap();
    let config = build_config(
        &dir,
        "process_count = 1",
        0.3,
        r#"
[[tasks]]
id = "a"
"#,
    );

    let gui = RecordingGui::default();
    let scheduler = Scheduler::new(config, Box::new(gui.clone())).unwrap();
    let handle = scheduler.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.pause();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.resume();
    });

    let summary = scheduler.run().await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.succeeded, 1);

    let updates = gui.updates.lock().unwrap();
    let paused = updates
        .iter()
        .position(|u| matches!(u, SchedulerUpdate::Paused))
        .unwrap();
    let resumed = updates
        .iter()
        .position(|u| matches!(u, SchedulerUpdate::Resumed))
        .unwrap();
    assert!(paused < resumed);
    assert!(updates
        .iter()
        .any(|u| matches!(u, SchedulerUpdate::Status(s) if s.paused)));
}

#[tokio::test]
async fn test_kill_ends_run_immediately() {
    let dir = TempDir::new().unwrap();
    let config = build_config(
        &dir,
        "process_count = 2\nshutdown_grace_secs = 30",
        30.0,
        r#"
[[tasks]]
id = "a"
[[tasks]]
id = "b"
"#,
    );

    let gui = RecordingGui::default();
    let scheduler = Scheduler::new(config, Box::new(gui.clone())).unwrap();
    let handle = scheduler.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.kill();
    });

    // 寬限期 30 秒，SIGKILL 不該等它
    let summary = tokio::time::timeout(Duration::from_secs(10), scheduler.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Killed);
    assert_eq!(summary.succeeded, 0);
    assert!(completed_log(&dir).records().is_empty());
    assert!(gui
        .updates
        .lock()
        .unwrap()
        .iter()
        .any(|u| matches!(u, SchedulerUpdate::Stopping { reason } if reason.contains("kill"))));
}

/// 看到第一個任務啟動後，透過 get_commands 送出 Stop
#[derive(Clone, Default)]
struct StoppingGui {
    started: Arc<Mutex<bool>>,
    sent: Arc<Mutex<bool>>,
}

impl Gui for StoppingGui {
    fn start(&mut self) {}
    fn stop(&mut self) {}
    fn update(&mut self, updates: &[SchedulerUpdate]) {
        if updates
            .iter()
            .any(|u| matches!(u, SchedulerUpdate::TaskStarted { .. }))
        {
            *self.started.lock().unwrap() = true;
        }
    }
    fn get_commands(&mut self) -> Option<Vec<SchedulerCommand>> {
        let started = *self.started.lock().unwrap();
        let mut sent = self.sent.lock().unwrap();
        if started && !*sent {
            *sent = true;
            Some(vec![SchedulerCommand::Stop])
        } else {
            None
        }
    }
}

#[tokio::test]
async fn test_gui_commands_control_the_run() {
    let dir = TempDir::new().unwrap();
    let config = build_config(
        &dir,
        "process_count = 1",
        0.3,
        r#"
[[tasks]]
id = "a"
[[tasks]]
id = "b"
[[tasks]]
id = "c"
"#,
    );

    let gui = StoppingGui::default();
    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        Scheduler::new(config, Box::new(gui.clone())).unwrap().run(),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(*gui.sent.lock().unwrap());
    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn test_real_memory_evicts_newest_task() {
    let dir = TempDir::new().unwrap();
    let config = build_config_with_limits(
        &dir,
        r#"
process_count = 2
memory_mb = 200
max_memory_mb = 250
default_task_memory_mb = 1
stop_all_on_error = false
"#,
        1.5,
        r#"
[[tasks]]
id = "first"
args = ["--memory-mb", "150"]
[[tasks]]
id = "second"
args = ["--memory-mb", "150"]
"#,
    );

    let gui = RecordingGui::default();
    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        Scheduler::new(config, Box::new(gui.clone())).unwrap().run(),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.succeeded, 2);
    assert!(summary.evicted >= 1);

    let updates = gui.updates.lock().unwrap();
    let evicted: Vec<&str> = updates
        .iter()
        .filter_map(|u| match u {
            SchedulerUpdate::TaskEvicted { task_id, memory_bytes } => {
                assert!(*memory_bytes >= 64 * 1024 * 1024);
                Some(task_id.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(evicted[0], "second");
}

#[tokio::test]
async fn test_real_memory_over_limit_fails_run() {
    let dir = TempDir::new().unwrap();
    let config = build_config_with_limits(
        &dir,
        r#"
process_count = 1
memory_mb = 100
max_memory_mb = 100
default_task_memory_mb = 1
error_on_overmemory = true
"#,
        10.0,
        r#"
[[tasks]]
id = "hog"
args = ["--memory-mb", "200"]
"#,
    );

    let result = tokio::time::timeout(
        Duration::from_secs(20),
        Scheduler::new(config, Box::new(SilentGui)).unwrap().run(),
    )
    .await
    .unwrap();

    match result {
        Err(SchedulerError::OverMemory { used, limit }) => {
            assert_eq!(limit, 100 * 1024 * 1024);
            assert!(used > limit);
        }
        other => panic!("expected OverMemory, got {:?}", other.map(|s| s.outcome)),
    }
    assert!(completed_log(&dir).records().is_empty());
}

#[tokio::test]
async fn test_measure_children_counts_descendant_memory() {
    // 父程序 60MB，兩個子程序各 60MB：只有加總才會超過 150MB
    let resources = |measure: bool| {
        format!(
            r#"
process_count = 1
memory_mb = 150
max_memory_mb = 150
default_task_memory_mb = 1
error_on_overmemory = true
measure_children = {}
"#,
            measure
        )
    };
    let tasks = r#"
[[tasks]]
id = "family"
args = ["--memory-mb", "60", "--children", "2"]
"#;

    let dir = TempDir::new().unwrap();
    let config = build_config_with_limits(&dir, &resources(true), 1.5, tasks);
    let result = tokio::time::timeout(
        Duration::from_secs(20),
        Scheduler::new(config, Box::new(SilentGui)).unwrap().run(),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(SchedulerError::OverMemory { .. })));

    let dir = TempDir::new().unwrap();
    let config = build_config_with_limits(&dir, &resources(false), 1.5, tasks);
    let summary = tokio::time::timeout(
        Duration::from_secs(20),
        Scheduler::new(config, Box::new(SilentGui)).unwrap().run(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.succeeded, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminate_reaches_grandchildren() {
    let dir = TempDir::new().unwrap();
    let config = build_config(
        &dir,
        "process_count = 1\nshutdown_grace_secs = 2",
        30.0,
        r#"
[[tasks]]
id = "family"
args = ["--children", "2"]
"#,
    );

    let gui = RecordingGui::default();
    let scheduler = Scheduler::new(config, Box::new(gui.clone())).unwrap();
    let handle = scheduler.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.pause();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.terminate();
    });

    let summary = tokio::time::timeout(Duration::from_secs(15), scheduler.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Terminated);

    let children = reported_pids(&gui.updates.lock().unwrap(), "Spawned child ");
    assert_eq!(children.len(), 2);
    for pid in children {
        assert!(!alive(pid), "child {} outlived the run", pid);
    }
}

/// refresh 很慢的 probe，讓任務在兩次讀取輸出之間結束
struct SlowProbe(SysinfoProbe);

impl ResourceProbe for SlowProbe {
    fn refresh(&mut self) {
        std::thread::sleep(Duration::from_millis(300));
        self.0.refresh();
    }
    fn memory(&self, pid: u32) -> Option<u64> {
        self.0.memory(pid)
    }
    fn cpu(&self, pid: u32) -> Option<f32> {
        self.0.cpu(pid)
    }
    fn descendants(&self, pid: u32) -> Vec<u32> {
        self.0.descendants(pid)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_output_line_reaches_gui() {
    let dir = TempDir::new().unwrap();
    let config = build_config(
        &dir,
        "process_count = 2",
        0.1,
        r#"
[[tasks]]
id = "quick"
[[tasks]]
id = "companion"
args = ["--wait", "1"]
"#,
    );

    let gui = RecordingGui::default();
    let scheduler = Scheduler::with_probe(
        config,
        Box::new(gui.clone()),
        Box::new(SlowProbe(SysinfoProbe::new())),
    )
    .unwrap();
    let summary = scheduler.run().await.unwrap();
    assert_eq!(summary.succeeded, 2);

    let updates = gui.updates.lock().unwrap();
    for id in ["quick", "companion"] {
        assert!(
            updates.iter().any(|u| matches!(
                u,
                SchedulerUpdate::TaskOutput { task_id, line }
                    if task_id == id && line.starts_with("Waiting completed!")
            )),
            "last line of {} was not forwarded",
            id
        );
    }
}
