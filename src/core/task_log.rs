use crate::domain::model::{TaskRecord, TaskStatus};
use crate::utils::error::Result;
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// 已完成任務的 CSV 日誌，讓中斷的執行可以接續
pub struct CompletedTaskLog {
    path: PathBuf,
    records: Vec<TaskRecord>,
    write_header: bool,
}

impl CompletedTaskLog {
    /// 讀取既有的日誌；檔案不存在時只記住路徑，第一次寫入才建立
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let exists_with_content = std::fs::metadata(&path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        let records = if exists_with_content {
            let mut reader = csv::Reader::from_path(&path)?;
            reader
                .deserialize()
                .collect::<std::result::Result<Vec<TaskRecord>, csv::Error>>()?
        } else {
            Vec::new()
        };

        tracing::debug!(
            "Loaded {} completed task record(s) from {}",
            records.len(),
            path.display()
        );

        Ok(Self {
            path,
            records,
            write_header: !exists_with_content,
        })
    }

    pub fn append(&mut self, record: TaskRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(self.write_header)
            .from_writer(file);
        writer.serialize(&record)?;
        writer.flush()?;

        self.write_header = false;
        self.records.push(record);
        Ok(())
    }

    /// 最後一筆紀錄為成功的任務 id
    pub fn succeeded_ids(&self) -> HashSet<String> {
        let mut latest: HashMap<&str, TaskStatus> = HashMap::new();
        for record in &self.records {
            latest.insert(record.id.as_str(), record.status);
        }
        latest
            .into_iter()
            .filter(|(_, status)| *status == TaskStatus::Succeeded)
            .map(|(id, _)| id.to_string())
            .collect()
    }

    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
