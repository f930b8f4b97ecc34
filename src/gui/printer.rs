use crate::domain::model::{SchedulerCommand, SchedulerUpdate};
use crate::domain::ports::Gui;
use crate::utils::logfile::timestamp;
use std::io::Write;

/// The most basic GUI: prints every update to the console.
///
/// Status snapshots are printed once every `status_every` steps. Task output
/// lines are only shown when `show_output` is set.
pub struct PrintGui<W: Write + Send = std::io::Stdout> {
    out: W,
    status_every: u64,
    show_output: bool,
}

impl PrintGui {
    pub fn new(status_every: u64, show_output: bool) -> Self {
        Self::with_writer(std::io::stdout(), status_every, show_output)
    }
}

impl Default for PrintGui {
    fn default() -> Self {
        Self::new(20, false)
    }
}

impl<W: Write + Send> PrintGui<W> {
    pub fn with_writer(out: W, status_every: u64, show_output: bool) -> Self {
        Self {
            out,
            status_every: status_every.max(1),
            show_output,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn should_print(&self, update: &SchedulerUpdate) -> bool {
        match update {
            SchedulerUpdate::TaskOutput { .. } => self.show_output,
            SchedulerUpdate::Status(snapshot) => snapshot.step % self.status_every == 0,
            _ => true,
        }
    }
}

impl<W: Write + Send> Gui for PrintGui<W> {
    fn start(&mut self) {
        let _ = writeln!(self.out, "{}Running tasks.", timestamp(true, true));
    }

    fn stop(&mut self) {
        let _ = writeln!(self.out, "{}All done!", timestamp(true, true));
        let _ = self.out.flush();
    }

    fn update(&mut self, updates: &[SchedulerUpdate]) {
        for update in updates {
            if self.should_print(update) {
                let _ = writeln!(self.out, "{}{}", timestamp(true, true), update);
            }
        }
        let _ = self.out.flush();
    }

    fn get_commands(&mut self) -> Option<Vec<SchedulerCommand>> {
        None
    }
}

/// Writes one JSON object per update, for other programs to consume.
pub struct JsonGui<W: Write + Send = std::io::Stdout> {
    out: W,
}

impl JsonGui {
    pub fn new() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl Default for JsonGui {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> JsonGui<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Gui for JsonGui<W> {
    fn start(&mut self) {}

    fn stop(&mut self) {
        let _ = self.out.flush();
    }

    fn update(&mut self, updates: &[SchedulerUpdate]) {
        for update in updates {
            match serde_json::to_string(update) {
                Ok(line) => {
                    let _ = writeln!(self.out, "{}", line);
                }
                Err(e) => tracing::warn!("⚠️ Cannot serialize update: {}", e),
            }
        }
        let _ = self.out.flush();
    }

    fn get_commands(&mut self) -> Option<Vec<SchedulerCommand>> {
        None
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct SilentGui;

impl Gui for SilentGui {
    fn start(&mut self) {}
    fn stop(&mut self) {}
    fn update(&mut self, _updates: &[SchedulerUpdate]) {}
    fn get_commands(&mut self) -> Option<Vec<SchedulerCommand>> {
        None
    }
}
