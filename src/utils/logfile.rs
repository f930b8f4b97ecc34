//! 時間戳與每個任務的日誌檔
use crate::utils::error::Result;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// `[yy.mm.dd - HH:MM:SS]` 或 `[HH:MM:SS]`
pub fn timestamp(date: bool, trailing_space: bool) -> String {
    let now = Local::now();
    let stamp = if date {
        now.format("[%y.%m.%d - %H:%M:%S]").to_string()
    } else {
        now.format("[%H:%M:%S]").to_string()
    };
    if trailing_space {
        stamp + " "
    } else {
        stamp
    }
}

/// 把任務 id 中不適合當檔名的字元換掉
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct TaskLogfile {
    path: PathBuf,
    file: File,
}

impl TaskLogfile {
    /// 在 log_dir 下建立 `<id>_<yymmdd-HHMMSS>.log`
    pub fn create(log_dir: &Path, task_id: &str) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let name = format!(
            "{}_{}.log",
            sanitize(task_id),
            Local::now().format("%y%m%d-%H%M%S")
        );
        let path = log_dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn write_line(&mut self, message: &str) -> Result<()> {
        writeln!(self.file, "{}{}", timestamp(true, true), message)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
