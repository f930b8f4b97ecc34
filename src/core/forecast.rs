use crate::domain::model::Task;
use chrono::{DateTime, Local};
use std::time::Duration;

const FALLBACK_RUNTIME_SECS: f64 = 1.0;

/// 從已完成任務學到的資源用量
#[derive(Debug, Clone, Default)]
pub struct ResourceFit {
    max_peak_memory: Option<u64>,
    runtime_sum: f64,
    samples: usize,
}

impl ResourceFit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, runtime_secs: f64, peak_memory: u64) {
        self.runtime_sum += runtime_secs;
        self.samples += 1;
        if peak_memory > 0 {
            self.max_peak_memory = Some(self.max_peak_memory.unwrap_or(0).max(peak_memory));
        }
    }

    pub fn mean_runtime(&self) -> Option<f64> {
        if self.samples == 0 {
            None
        } else {
            Some(self.runtime_sum / self.samples as f64)
        }
    }

    /// 明確設定的值優先，否則用觀察到的最大峰值，再不然用預設值
    pub fn expected_memory(&self, task: &Task, default: u64) -> u64 {
        task.expected_memory
            .or(self.max_peak_memory)
            .unwrap_or(default)
    }

    pub fn expected_runtime(&self, task: &Task) -> f64 {
        task.expected_runtime
            .or_else(|| self.mean_runtime())
            .unwrap_or(FALLBACK_RUNTIME_SECS)
    }

    /// 剩餘任務的預期時間總和平均分給所有槽位
    pub fn expected_finish<'a, I>(&self, unfinished: I, slots: usize, now: DateTime<Local>) -> DateTime<Local>
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let total: f64 = unfinished.into_iter().map(|t| self.expected_runtime(t)).sum();
        let secs = total / slots.max(1) as f64;
        let remaining = Duration::from_secs_f64(secs.max(0.0));
        now + chrono::Duration::from_std(remaining).unwrap_or(chrono::Duration::zero())
    }
}
