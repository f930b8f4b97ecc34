use crate::domain::model::{SchedulerCommand, SchedulerUpdate};

/// 進度顯示介面，也可以回傳使用者下達的指令
pub trait Gui: Send {
    fn start(&mut self);
    fn stop(&mut self);
    fn update(&mut self, updates: &[SchedulerUpdate]);
    /// 沒有新的使用者輸入時回傳 None
    fn get_commands(&mut self) -> Option<Vec<SchedulerCommand>>;
}

/// 量測子程序資源用量
pub trait ResourceProbe: Send {
    fn refresh(&mut self);
    /// bytes
    fn memory(&self, pid: u32) -> Option<u64>;
    /// percent of one core
    fn cpu(&self, pid: u32) -> Option<f32>;
    fn descendants(&self, pid: u32) -> Vec<u32>;
}
