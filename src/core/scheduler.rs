//! The main loop: admits tasks under the memory budget, watches them, evicts
//! when the hard limit is crossed, retries failures and records results.

use crate::config::SchedulerConfig;
use crate::core::admission::{self, AdmissionCandidate};
use crate::core::forecast::ResourceFit;
use crate::core::process::SmartProcess;
use crate::core::task_log::CompletedTaskLog;
use crate::domain::model::{
    RunOutcome, RunSummary, SchedulerCommand, SchedulerUpdate, SlotStatus, StatusSnapshot, Task,
    TaskRecord, TaskState, TaskStatus,
};
use crate::domain::ports::{Gui, ResourceProbe};
use crate::utils::error::{Result, SchedulerError};
use crate::utils::logfile::{timestamp, TaskLogfile};
use crate::utils::monitor::SysinfoProbe;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

const IDLE_UPDATE: &str = "-";
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Sends commands to a running [`Scheduler`] from another task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Returns false once the scheduler has finished.
    pub fn send(&self, command: SchedulerCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn stop(&self) -> bool {
        self.send(SchedulerCommand::Stop)
    }

    pub fn terminate(&self) -> bool {
        self.send(SchedulerCommand::Terminate)
    }

    pub fn kill(&self) -> bool {
        self.send(SchedulerCommand::Kill)
    }

    pub fn pause(&self) -> bool {
        self.send(SchedulerCommand::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(SchedulerCommand::Resume)
    }
}

struct TaskEntry {
    task: Task,
    state: TaskState,
    attempts: u32,
    /// 被驅逐時觀察到的峰值，之後的預期記憶體不會低於這個值
    memory_floor: u64,
}

struct RunningTask {
    task_index: usize,
    run_id: u64,
    process: SmartProcess,
    expected_memory: u64,
    readers: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct Slot {
    running: Option<RunningTask>,
    update: String,
}

struct OutputLine {
    run_id: u64,
    line: String,
}

#[derive(Clone, Copy)]
enum ShutdownMode {
    Graceful,
    Kill,
}

pub struct Scheduler {
    config: SchedulerConfig,
    gui: Box<dyn Gui>,
    probe: Box<dyn ResourceProbe>,
    tasks: Vec<TaskEntry>,
    slots: Vec<Slot>,
    log: CompletedTaskLog,
    fit: ResourceFit,

    commands_tx: mpsc::UnboundedSender<SchedulerCommand>,
    commands_rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    output_tx: mpsc::UnboundedSender<OutputLine>,
    output_rx: mpsc::UnboundedReceiver<OutputLine>,
    next_run_id: u64,
    updates: Vec<SchedulerUpdate>,

    paused: bool,
    stopping: bool,
    step: u64,
    skipped: usize,
    succeeded: usize,
    failed: usize,
    evicted: usize,
    current_memory: u64,
    current_cpu: f32,
    peak_memory: u64,
    expected_finish: Option<DateTime<Local>>,
}

impl Scheduler {
    /// Validates the configuration, opens the completed tasks log and drops
    /// every task that already succeeded in a previous run.
    pub fn new(config: SchedulerConfig, gui: Box<dyn Gui>) -> Result<Self> {
        Self::with_probe(config, gui, Box::new(SysinfoProbe::new()))
    }

    pub fn with_probe(
        config: SchedulerConfig,
        gui: Box<dyn Gui>,
        probe: Box<dyn ResourceProbe>,
    ) -> Result<Self> {
        tracing::info!("Initialising scheduler for run '{}'", config.run_name());
        config.validate_config()?;
        std::fs::create_dir_all(config.log_dir())?;

        let log = CompletedTaskLog::open(config.completed_tasks_log())?;
        let done = log.succeeded_ids();

        let all_tasks = config.tasks();
        let total = all_tasks.len();
        let tasks: Vec<TaskEntry> = all_tasks
            .into_iter()
            .filter(|task| !done.contains(&task.id))
            .map(|task| TaskEntry {
                task,
                state: TaskState::Pending,
                attempts: 0,
                memory_floor: 0,
            })
            .collect();

        if tasks.is_empty() {
            return Err(SchedulerError::NoRemainingTasks {
                run_name: config.run_name().to_string(),
            });
        }

        let skipped = total - tasks.len();
        if skipped > 0 {
            tracing::info!(
                "⏭️ Skipping {} task(s) already completed according to {}",
                skipped,
                log.path().display()
            );
        }

        let mut fit = ResourceFit::new();
        for record in log.records() {
            if record.status == TaskStatus::Succeeded {
                fit.record(record.runtime_secs, record.peak_memory_bytes);
            }
        }

        let slots = (0..config.process_count())
            .map(|_| Slot {
                running: None,
                update: IDLE_UPDATE.to_string(),
            })
            .collect();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        tracing::info!(
            "✅ {} task(s) to run on up to {} process(es)",
            tasks.len(),
            config.process_count()
        );

        Ok(Self {
            config,
            gui,
            probe,
            tasks,
            slots,
            log,
            fit,
            commands_tx,
            commands_rx,
            output_tx,
            output_rx,
            next_run_id: 0,
            updates: Vec::new(),
            paused: false,
            stopping: false,
            step: 0,
            skipped,
            succeeded: 0,
            failed: 0,
            evicted: 0,
            current_memory: 0,
            current_cpu: 0.0,
            peak_memory: 0,
            expected_finish: None,
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.commands_tx.clone(),
        }
    }

    /// Runs until every task is done, the run is stopped, or an error ends it.
    /// Child processes never outlive this call.
    pub async fn run(mut self) -> Result<RunSummary> {
        let started = Instant::now();
        self.gui.start();

        let result = self.run_loop().await;
        if let Err(e) = &result {
            tracing::error!("❌ Run failed: {}", e);
            self.shutdown_all(ShutdownMode::Graceful).await;
        }

        self.flush_updates();
        self.gui.stop();

        let outcome = result?;
        let summary = RunSummary {
            outcome,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            evicted: self.evicted,
            peak_memory_bytes: self.peak_memory,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        tracing::info!(
            "📊 Run finished ({:?}): {} succeeded, {} failed, {} skipped, {} evicted in {:.1}s",
            summary.outcome,
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.evicted,
            summary.elapsed_secs
        );
        Ok(summary)
    }

    async fn run_loop(&mut self) -> Result<RunOutcome> {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Some(outcome) = self.handle_commands().await? {
                return Ok(outcome);
            }

            self.drain_output();
            self.check_memory_usage().await?;
            let (completed, running) = self.poll_processes().await?;

            if !self.paused && !self.stopping && (completed > 0 || running == 0) {
                self.refresh_forecast();
                self.create_processes()?;
            }

            self.step += 1;
            let snapshot = self.snapshot();
            self.updates.push(SchedulerUpdate::Status(snapshot));
            self.flush_updates();

            if self.running_count() == 0 {
                if self.stopping {
                    return Ok(RunOutcome::Stopped);
                }
                if self.pending_count() == 0 {
                    return Ok(RunOutcome::Completed);
                }
            }
        }
    }

    async fn handle_commands(&mut self) -> Result<Option<RunOutcome>> {
        let mut commands = self.gui.get_commands().unwrap_or_default();
        while let Ok(command) = self.commands_rx.try_recv() {
            commands.push(command);
        }

        for command in commands {
            tracing::debug!("Received command {:?}", command);
            match command {
                SchedulerCommand::Stop => {
                    if !self.stopping {
                        // 暫停中的任務永遠不會結束，先讓它們繼續
                        self.set_paused(false)?;
                        self.stopping = true;
                        tracing::info!("🛑 Stop requested, waiting for running tasks");
                        self.updates.push(SchedulerUpdate::Stopping {
                            reason: "stop requested; finishing running tasks".to_string(),
                        });
                    }
                }
                SchedulerCommand::Terminate => {
                    self.updates.push(SchedulerUpdate::Stopping {
                        reason: "terminate requested".to_string(),
                    });
                    self.shutdown_all(ShutdownMode::Graceful).await;
                    return Ok(Some(RunOutcome::Terminated));
                }
                SchedulerCommand::Kill => {
                    self.updates.push(SchedulerUpdate::Stopping {
                        reason: "kill requested".to_string(),
                    });
                    self.shutdown_all(ShutdownMode::Kill).await;
                    return Ok(Some(RunOutcome::Killed));
                }
                SchedulerCommand::Pause => self.set_paused(true)?,
                SchedulerCommand::Resume => self.set_paused(false)?,
                SchedulerCommand::Update(update) => match self.config.apply_update(&update) {
                    Ok(()) => {
                        tracing::info!("🔧 Configuration updated: {:?}", update);
                        while self.slots.len() < self.config.process_count() {
                            self.slots.push(Slot {
                                running: None,
                                update: IDLE_UPDATE.to_string(),
                            });
                        }
                    }
                    Err(e) => tracing::warn!("⚠️ Ignoring configuration update: {}", e),
                },
            }
        }
        Ok(None)
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        if self.paused == paused {
            return Ok(());
        }
        self.probe.refresh();
        for slot in &mut self.slots {
            if let Some(running) = slot.running.as_mut() {
                let descendants = self.probe.descendants(running.process.pid());
                if paused {
                    running.process.pause(&descendants)?;
                } else {
                    running.process.resume(&descendants)?;
                }
            }
        }
        self.paused = paused;
        if paused {
            tracing::info!("⏸️ Paused all running tasks");
            self.updates.push(SchedulerUpdate::Paused);
        } else {
            tracing::info!("▶️ Resumed all running tasks");
            self.updates.push(SchedulerUpdate::Resumed);
        }
        Ok(())
    }

    fn drain_output(&mut self) {
        while let Ok(output) = self.output_rx.try_recv() {
            let slot = self.slots.iter_mut().find(|slot| {
                slot.running
                    .as_ref()
                    .is_some_and(|running| running.run_id == output.run_id)
            });
            if let Some(slot) = slot {
                slot.update = format!("{}{}", timestamp(false, true), output.line);
                if let Some(running) = &slot.running {
                    let task_id = self.tasks[running.task_index].task.id.clone();
                    self.updates.push(SchedulerUpdate::TaskOutput {
                        task_id,
                        line: output.line,
                    });
                }
            }
        }
    }

    /// Measures every running child. Over the hard limit, either fails the run
    /// or evicts the most recently started task.
    async fn check_memory_usage(&mut self) -> Result<()> {
        if self.running_count() == 0 {
            self.current_memory = 0;
            self.current_cpu = 0.0;
            return Ok(());
        }

        self.probe.refresh();
        let include_children = self.config.measure_children();
        let mut total_memory = 0u64;
        let mut total_cpu = 0f32;
        for slot in &mut self.slots {
            if let Some(running) = slot.running.as_mut() {
                total_memory += running
                    .process
                    .memory_usage(self.probe.as_ref(), include_children);
                total_cpu += running
                    .process
                    .cpu_usage(self.probe.as_ref(), include_children);
            }
        }
        self.current_memory = total_memory;
        self.current_cpu = total_cpu;
        self.peak_memory = self.peak_memory.max(total_memory);

        let limit = self.config.max_memory_bytes();
        if total_memory <= limit {
            return Ok(());
        }

        if self.config.error_on_overmemory() {
            return Err(SchedulerError::OverMemory {
                used: total_memory,
                limit,
            });
        }

        let newest = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.running.as_ref().map(|r| (i, r.run_id)))
            .max_by_key(|(_, run_id)| *run_id)
            .map(|(i, _)| i);

        if let Some(slot_index) = newest {
            self.evict(slot_index, total_memory, limit).await?;
        }
        Ok(())
    }

    async fn evict(&mut self, slot_index: usize, total_memory: u64, limit: u64) -> Result<()> {
        let alone = self.running_count() == 1;
        let status = match self.slots[slot_index].running.as_mut() {
            Some(running) => {
                let descendants = self.probe.descendants(running.process.pid());
                running.process.kill(&descendants).await?
            }
            None => return Ok(()),
        };
        self.finish_output(slot_index).await;
        let Some(running) = self.take_running(slot_index) else {
            return Ok(());
        };

        let peak = running.process.peak_memory();
        let task_id = self.tasks[running.task_index].task.id.clone();

        if alone {
            // 單獨執行仍超過上限，重排也不會成功，視為失敗
            tracing::warn!(
                "⚠️ Task {} alone uses {} bytes, above the limit of {} bytes",
                task_id,
                total_memory,
                limit
            );
            return self.handle_failure(running, status.code());
        }

        tracing::warn!(
            "⚠️ Memory {} bytes above limit {} bytes, evicted task {} (peak {} bytes)",
            total_memory,
            limit,
            task_id,
            peak
        );
        let entry = &mut self.tasks[running.task_index];
        entry.state = TaskState::Pending;
        entry.memory_floor = entry.memory_floor.max(peak);
        self.evicted += 1;
        self.updates.push(SchedulerUpdate::TaskEvicted {
            task_id,
            memory_bytes: peak,
        });
        Ok(())
    }

    /// Reaps finished children. Returns (completed this step, running before polling).
    /// Every slot is reaped before the first error is returned.
    async fn poll_processes(&mut self) -> Result<(usize, usize)> {
        let mut completed = 0;
        let mut running_before = 0;
        let mut first_error = None;

        for slot_index in 0..self.slots.len() {
            let status = match self.slots[slot_index].running.as_mut() {
                Some(running) => {
                    running_before += 1;
                    running.process.try_wait()?
                }
                None => continue,
            };

            let Some(status) = status else { continue };
            completed += 1;

            // 槽位釋放前先轉送子程序最後輸出的幾行
            self.finish_output(slot_index).await;
            let Some(running) = self.take_running(slot_index) else {
                continue;
            };

            let result = if status.success() {
                self.handle_success(running)
            } else {
                self.handle_failure(running, status.code())
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok((completed, running_before)),
        }
    }

    fn handle_success(&mut self, running: RunningTask) -> Result<()> {
        let runtime = running.process.elapsed().as_secs_f64();
        let peak = running.process.peak_memory();
        let entry = &mut self.tasks[running.task_index];
        entry.attempts += 1;
        entry.state = TaskState::Succeeded;

        self.log.append(TaskRecord {
            id: entry.task.id.clone(),
            metadata: entry.task.metadata.clone(),
            status: TaskStatus::Succeeded,
            attempts: entry.attempts,
            runtime_secs: runtime,
            peak_memory_bytes: peak,
            exit_code: Some(0),
            completed_at: Local::now(),
        })?;
        self.fit.record(runtime, peak);
        self.succeeded += 1;

        tracing::info!("✅ Task {} finished in {:.2}s", entry.task.id, runtime);
        self.updates.push(SchedulerUpdate::TaskSucceeded {
            task_id: entry.task.id.clone(),
            runtime_secs: runtime,
            peak_memory_bytes: peak,
        });
        Ok(())
    }

    fn handle_failure(&mut self, running: RunningTask, exit_code: Option<i32>) -> Result<()> {
        let repeats = self.config.failed_task_repeats();
        let runtime = running.process.elapsed().as_secs_f64();
        let peak = running.process.peak_memory();
        let entry = &mut self.tasks[running.task_index];
        entry.attempts += 1;
        let will_retry = entry.attempts <= repeats;

        self.updates.push(SchedulerUpdate::TaskFailed {
            task_id: entry.task.id.clone(),
            exit_code,
            attempts: entry.attempts,
            will_retry,
        });

        if will_retry {
            tracing::warn!(
                "⚠️ Task {} failed with exit code {:?}, retrying ({}/{})",
                entry.task.id,
                exit_code,
                entry.attempts,
                repeats
            );
            entry.state = TaskState::Pending;
            return Ok(());
        }

        tracing::error!(
            "❌ Task {} failed with exit code {:?} after {} attempt(s)",
            entry.task.id,
            exit_code,
            entry.attempts
        );
        entry.state = TaskState::Failed;
        let error = SchedulerError::TaskFailed {
            task_id: entry.task.id.clone(),
            exit_code,
            attempts: entry.attempts,
        };
        self.log.append(TaskRecord {
            id: entry.task.id.clone(),
            metadata: entry.task.metadata.clone(),
            status: TaskStatus::Failed,
            attempts: entry.attempts,
            runtime_secs: runtime,
            peak_memory_bytes: peak,
            exit_code,
            completed_at: Local::now(),
        })?;
        self.failed += 1;

        if self.config.stop_all_on_error() {
            return Err(error);
        }
        Ok(())
    }

    fn refresh_forecast(&mut self) {
        let unfinished = self
            .tasks
            .iter()
            .filter(|e| matches!(e.state, TaskState::Pending | TaskState::Running { .. }))
            .map(|e| &e.task);
        self.expected_finish = Some(self.fit.expected_finish(
            unfinished,
            self.current_max_slots(),
            Local::now(),
        ));
    }

    fn create_processes(&mut self) -> Result<usize> {
        let running = self.running_count();
        let max_slots = self.current_max_slots();
        if running >= max_slots {
            return Ok(0);
        }

        let used = self.current_memory.max(self.expected_memory());
        let available = self.config.memory_bytes().saturating_sub(used);

        let mut pending: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state == TaskState::Pending)
            .map(|(i, _)| i)
            .collect();
        pending.sort_by_key(|&i| std::cmp::Reverse(self.tasks[i].task.priority));

        let candidates: Vec<AdmissionCandidate> = pending
            .iter()
            .map(|&i| AdmissionCandidate {
                key: i,
                expected_memory: self.expected_memory_for(i),
            })
            .collect();

        let chosen = admission::first_fit(&candidates, available, max_slots - running, running == 0);
        for &task_index in &chosen {
            self.start_task(task_index)?;
        }
        Ok(chosen.len())
    }

    fn start_task(&mut self, task_index: usize) -> Result<()> {
        let Some(slot_index) = self.slots.iter().position(|s| s.running.is_none()) else {
            return Ok(());
        };

        let expected_memory = self.expected_memory_for(task_index);
        let task = &self.tasks[task_index].task;

        let mut command = tokio::process::Command::new(&self.config.command.program);
        command
            .args(self.config.argv_for(task))
            .env("SMP_TASK_ID", &task.id)
            .env("SMP_RUN_NAME", self.config.run_name());
        if let Some(dir) = &self.config.command.working_dir {
            command.current_dir(dir);
        }
        if let Some(env) = &self.config.command.env {
            command.envs(env);
        }

        let mut process = SmartProcess::spawn(command, &task.id)?;

        let logfile = if self.config.log_every_process() {
            let logfile = TaskLogfile::create(&self.config.log_dir(), &task.id)?;
            tracing::debug!("Task {} logs to {}", task.id, logfile.path().display());
            Some(Arc::new(Mutex::new(logfile)))
        } else {
            None
        };

        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let mut readers = Vec::new();
        if let Some(stdout) = process.take_stdout() {
            readers.push(spawn_reader(stdout, run_id, logfile.clone(), self.output_tx.clone()));
        }
        if let Some(stderr) = process.take_stderr() {
            readers.push(spawn_reader(stderr, run_id, logfile, self.output_tx.clone()));
        }

        let pid = process.pid();
        tracing::info!("🚀 Started task {} in slot {} (pid {})", task.id, slot_index, pid);
        self.updates.push(SchedulerUpdate::TaskStarted {
            slot: slot_index,
            task_id: task.id.clone(),
            pid,
        });

        self.tasks[task_index].state = TaskState::Running { slot: slot_index };
        let slot = &mut self.slots[slot_index];
        slot.update = format!("{}Initialising from main...", timestamp(false, true));
        slot.running = Some(RunningTask {
            task_index,
            run_id,
            process,
            expected_memory,
            readers,
        });
        Ok(())
    }

    fn take_running(&mut self, slot_index: usize) -> Option<RunningTask> {
        let slot = &mut self.slots[slot_index];
        let running = slot.running.take();
        slot.update = IDLE_UPDATE.to_string();
        running
    }

    /// Waits for the slot's output readers to hit EOF, then forwards what
    /// they sent while the slot still owns the run id.
    async fn finish_output(&mut self, slot_index: usize) {
        let Some(running) = self.slots[slot_index].running.as_mut() else {
            return;
        };
        let run_id = running.run_id;
        for reader in std::mem::take(&mut running.readers) {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                tracing::debug!("Output reader for run {} did not finish", run_id);
            }
        }
        self.drain_output();
    }

    async fn shutdown_all(&mut self, mode: ShutdownMode) {
        let grace = self.config.shutdown_grace();
        let mut set = JoinSet::new();

        self.probe.refresh();
        for slot_index in 0..self.slots.len() {
            let Some(running) = self.take_running(slot_index) else {
                continue;
            };
            let descendants = self.probe.descendants(running.process.pid());
            self.tasks[running.task_index].state = TaskState::Pending;

            let mut running = running;
            set.spawn(async move {
                let result = match mode {
                    ShutdownMode::Graceful => running.process.shutdown(grace, &descendants).await,
                    ShutdownMode::Kill => running.process.kill(&descendants).await,
                };
                if let Err(e) = result {
                    tracing::warn!(
                        "⚠️ Could not stop task {}: {}",
                        running.process.task_id(),
                        e
                    );
                }
                for reader in running.readers {
                    reader.abort();
                }
            });
        }

        while set.join_next().await.is_some() {}
    }

    fn flush_updates(&mut self) {
        if !self.updates.is_empty() {
            let updates = std::mem::take(&mut self.updates);
            self.gui.update(&updates);
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            step: self.step,
            slots: self
                .slots
                .iter()
                .enumerate()
                .map(|(i, slot)| SlotStatus {
                    slot: i,
                    task_id: slot
                        .running
                        .as_ref()
                        .map(|r| self.tasks[r.task_index].task.id.clone()),
                    update: slot.update.clone(),
                })
                .collect(),
            running: self.running_count(),
            max_slots: self.current_max_slots(),
            cpu_percent: self.current_cpu,
            memory_used: self.current_memory,
            memory_expected: self.expected_memory(),
            memory_budget: self.config.memory_bytes(),
            max_memory: self.config.max_memory_bytes(),
            remaining_tasks: self.pending_count() + self.running_count(),
            paused: self.paused,
            expected_finish: self.expected_finish,
        }
    }

    fn expected_memory_for(&self, task_index: usize) -> u64 {
        let entry = &self.tasks[task_index];
        self.fit
            .expected_memory(&entry.task, self.config.default_task_memory_bytes())
            .max(entry.memory_floor)
    }

    /// Sum of the expected memory of every running task.
    fn expected_memory(&self) -> u64 {
        self.slots
            .iter()
            .filter_map(|s| s.running.as_ref())
            .map(|r| r.expected_memory)
            .sum()
    }

    /// One slot while benchmarking, `process_count` afterwards.
    fn current_max_slots(&self) -> usize {
        let benchmarking = self.config.benchmarking_tasks();
        if benchmarking > 0 && self.succeeded + self.failed < benchmarking {
            1
        } else {
            self.config.process_count()
        }
    }

    fn running_count(&self) -> usize {
        self.slots.iter().filter(|s| s.running.is_some()).count()
    }

    fn pending_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|e| e.state == TaskState::Pending)
            .count()
    }
}

fn spawn_reader<R>(
    reader: R,
    run_id: u64,
    logfile: Option<Arc<Mutex<TaskLogfile>>>,
    tx: mpsc::UnboundedSender<OutputLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(logfile) = &logfile {
                if let Ok(mut logfile) = logfile.lock() {
                    if let Err(e) = logfile.write_line(&line) {
                        tracing::warn!("⚠️ Cannot write task log: {}", e);
                    }
                }
            }
            if tx.send(OutputLine { run_id, line }).is_err() {
                break;
            }
        }
    })
}
