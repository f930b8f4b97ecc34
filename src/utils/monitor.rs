use crate::domain::ports::ResourceProbe;
use crate::utils::error::{Result, SchedulerError};
use std::collections::HashMap;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// 以 sysinfo 實作的資源探針
pub struct SysinfoProbe {
    system: System,
    children: HashMap<u32, Vec<u32>>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let mut probe = Self {
            system,
            children: HashMap::new(),
        };
        probe.rebuild_tree();
        probe
    }

    fn rebuild_tree(&mut self) {
        self.children.clear();
        for (pid, process) in self.system.processes() {
            if let Some(parent) = process.parent() {
                self.children
                    .entry(parent.as_u32())
                    .or_default()
                    .push(pid.as_u32());
            }
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn refresh(&mut self) {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.rebuild_tree();
    }

    fn memory(&self, pid: u32) -> Option<u64> {
        self.system
            .process(Pid::from_u32(pid))
            .map(|process| process.memory())
    }

    fn cpu(&self, pid: u32) -> Option<f32> {
        self.system
            .process(Pid::from_u32(pid))
            .map(|process| process.cpu_usage())
    }

    fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut found = Vec::new();
        let mut stack = vec![pid];
        while let Some(current) = stack.pop() {
            if let Some(kids) = self.children.get(&current) {
                for &kid in kids {
                    // 防止 pid 重用造成環
                    if kid != pid && !found.contains(&kid) {
                        found.push(kid);
                        stack.push(kid);
                    }
                }
            }
        }
        found
    }
}

/// 可用的實體核心數：實體核心數乘以本程序可使用的邏輯 CPU 比例
pub fn usable_physical_cpu_count() -> Result<usize> {
    let physical = System::physical_core_count().unwrap_or(0);
    let logical = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(physical);

    let mut system = System::new();
    system.refresh_cpu_all();
    let total_logical = system.cpus().len().max(logical);

    let usable = scale_core_count(physical, logical, total_logical);
    if usable < 1 {
        return Err(SchedulerError::SystemInfoError {
            message: "CPU count could not be automatically estimated".to_string(),
        });
    }
    Ok(usable)
}

fn scale_core_count(physical: usize, usable_logical: usize, total_logical: usize) -> usize {
    if total_logical == 0 {
        return 0;
    }
    (physical as f64 * usable_logical as f64 / total_logical as f64) as usize
}

pub fn total_system_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory()
}
