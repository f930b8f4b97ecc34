//! A child process wrapper that knows its own memory and CPU footprint.

use crate::domain::ports::ResourceProbe;
use crate::utils::error::{Result, SchedulerError};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

pub struct SmartProcess {
    task_id: String,
    child: Child,
    pid: u32,
    started_at: Instant,
    peak_memory: u64,
    paused: bool,
}

impl SmartProcess {
    /// Spawns `command` with piped stdout/stderr. On Unix the child leads its
    /// own process group so signals reach everything it starts. The child is
    /// killed if the handle is dropped.
    pub fn spawn(mut command: Command, task_id: &str) -> Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let child = command.spawn().map_err(|source| SchedulerError::SpawnError {
            task_id: task_id.to_string(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| SchedulerError::SpawnError {
            task_id: task_id.to_string(),
            source: std::io::Error::other("child exited before its pid was read"),
        })?;

        tracing::debug!("Spawned task {} as pid {}", task_id, pid);

        Ok(Self {
            task_id: task_id.to_string(),
            child,
            pid,
            started_at: Instant::now(),
            peak_memory: 0,
            paused: false,
        })
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn peak_memory(&self) -> u64 {
        self.peak_memory
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Resident memory of the child, optionally including every live
    /// descendant. Descendants that vanish between refresh and lookup count
    /// as zero.
    pub fn memory_usage(&mut self, probe: &dyn ResourceProbe, include_children: bool) -> u64 {
        let mut total = probe.memory(self.pid).unwrap_or(0);
        if include_children {
            total += probe
                .descendants(self.pid)
                .into_iter()
                .filter_map(|pid| probe.memory(pid))
                .sum::<u64>();
        }
        self.peak_memory = self.peak_memory.max(total);
        total
    }

    pub fn cpu_usage(&self, probe: &dyn ResourceProbe, include_children: bool) -> f32 {
        let mut total = probe.cpu(self.pid).unwrap_or(0.0);
        if include_children {
            total += probe
                .descendants(self.pid)
                .into_iter()
                .filter_map(|pid| probe.cpu(pid))
                .sum::<f32>();
        }
        total
    }

    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGSTOP the child's process group and the given descendants.
    pub fn pause(&mut self, descendants: &[u32]) -> Result<()> {
        #[cfg(unix)]
        {
            self.signal_tree(Signal::SIGSTOP, descendants)?;
            self.paused = true;
            Ok(())
        }

        #[cfg(not(unix))]
        {
            let _ = descendants;
            Err(SchedulerError::Unsupported {
                operation: "pause".to_string(),
            })
        }
    }

    /// SIGCONT the child's process group and the given descendants.
    pub fn resume(&mut self, descendants: &[u32]) -> Result<()> {
        #[cfg(unix)]
        {
            self.signal_tree(Signal::SIGCONT, descendants)?;
            self.paused = false;
            Ok(())
        }

        #[cfg(not(unix))]
        {
            let _ = descendants;
            Err(SchedulerError::Unsupported {
                operation: "resume".to_string(),
            })
        }
    }

    /// Politely asks the child and its descendants to exit (SIGTERM).
    pub fn terminate(&mut self, descendants: &[u32]) -> Result<()> {
        #[cfg(unix)]
        {
            self.signal_tree(Signal::SIGTERM, descendants)?;
            // 被暫停的程序要先繼續才會處理 SIGTERM
            if self.paused {
                self.signal_tree(Signal::SIGCONT, descendants)?;
                self.paused = false;
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            let _ = descendants;
            Ok(self.child.start_kill()?)
        }
    }

    /// SIGKILLs the child's process group and the given descendants, then
    /// reaps the child.
    pub async fn kill(&mut self, descendants: &[u32]) -> Result<ExitStatus> {
        #[cfg(unix)]
        {
            self.signal_tree(Signal::SIGKILL, descendants)?;
        }
        #[cfg(not(unix))]
        {
            let _ = descendants;
        }

        if self.child.try_wait()?.is_none() {
            self.child.kill().await?;
        }
        self.paused = false;
        Ok(self.child.wait().await?)
    }

    /// SIGTERM the whole tree, wait up to `grace`, then SIGKILL whatever is
    /// left. Always reaps the child, and no descendant outlives this call.
    pub async fn shutdown(&mut self, grace: Duration, descendants: &[u32]) -> Result<ExitStatus> {
        let deadline = tokio::time::Instant::now() + grace;
        self.terminate(descendants)?;

        let status = match tokio::time::timeout_at(deadline, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(
                    "⚠️ Task {} (pid {}) ignored SIGTERM for {:?}, killing",
                    self.task_id,
                    self.pid,
                    grace
                );
                return self.kill(descendants).await;
            }
        };

        #[cfg(unix)]
        {
            while self.tree_alive(descendants) && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if self.tree_alive(descendants) {
                tracing::warn!(
                    "⚠️ Descendants of task {} outlived SIGTERM, killing",
                    self.task_id
                );
                self.signal_tree(Signal::SIGKILL, descendants)?;
            }
        }
        Ok(status)
    }

    /// 子程序以自己為 process group leader 啟動，所以 pgid == pid
    #[cfg(unix)]
    fn signal_tree(&self, sig: Signal, descendants: &[u32]) -> Result<()> {
        send_group_signal(self.pid, sig)?;
        for &pid in descendants {
            send_signal(pid, sig)?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn tree_alive(&self, descendants: &[u32]) -> bool {
        signal::killpg(Pid::from_raw(self.pid as i32), None).is_ok()
            || descendants
                .iter()
                .any(|&pid| signal::kill(Pid::from_raw(pid as i32), None).is_ok())
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, sig: Signal) -> Result<()> {
    signal_result(pid, signal::kill(Pid::from_raw(pid as i32), sig))
}

#[cfg(unix)]
fn send_group_signal(pgid: u32, sig: Signal) -> Result<()> {
    signal_result(pgid, signal::killpg(Pid::from_raw(pgid as i32), sig))
}

#[cfg(unix)]
fn signal_result(pid: u32, result: nix::Result<()>) -> Result<()> {
    match result {
        // 程序已經結束
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(SchedulerError::SignalError {
            pid,
            message: e.to_string(),
        }),
    }
}
