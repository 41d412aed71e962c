#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modlane_contracts::status::TaskStatus;
use modlane_core::{FileQueueProcessor, IngestConfig, StabilityConfig, StatusSink};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reported {
    Task(TaskStatus, String),
    Progress(u8, String),
}

/// Status sink that remembers everything it was told.
#[derive(Default)]
pub struct RecordingStatus {
    reports: Mutex<Vec<Reported>>,
}

impl RecordingStatus {
    pub fn reports(&self) -> Vec<Reported> {
        self.reports.lock().unwrap().clone()
    }

    pub fn tasks(&self) -> Vec<(TaskStatus, String)> {
        self.reports()
            .into_iter()
            .filter_map(|report| match report {
                Reported::Task(status, message) => Some((status, message)),
                Reported::Progress(..) => None,
            })
            .collect()
    }

    pub fn saw_task(&self, status: TaskStatus, message: &str) -> bool {
        self.tasks()
            .iter()
            .any(|(s, m)| *s == status && m == message)
    }

    /// Poll until a matching task report shows up or five seconds pass.
    pub async fn wait_for_task(&self, status: TaskStatus, message: &str) -> bool {
        for _ in 0..100 {
            if self.saw_task(status, message) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

impl StatusSink for RecordingStatus {
    fn current_task(&self, status: TaskStatus, message: &str) {
        self.reports
            .lock()
            .unwrap()
            .push(Reported::Task(status, message.to_string()));
    }

    fn progress(&self, percent: u8, message: &str) {
        self.reports
            .lock()
            .unwrap()
            .push(Reported::Progress(percent, message.to_string()));
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub config: IngestConfig,
    pub status: Arc<RecordingStatus>,
    pub queue: FileQueueProcessor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stability(StabilityConfig {
            max_attempts: 3,
            retry_base_ms: 10,
            retry_max_ms: 20,
            sample_window_ms: 10,
        })
    }

    pub fn with_stability(stability: StabilityConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig {
            stability,
            state_path: dir.path().join("state").join("queue.json"),
            work_dir: dir.path().join("work"),
            ..IngestConfig::default()
        };
        let status = Arc::new(RecordingStatus::default());
        let sink: Arc<dyn StatusSink> = status.clone();
        let queue = FileQueueProcessor::new(config.clone(), sink);
        Self {
            dir,
            config,
            status,
            queue,
        }
    }

    /// A second queue over the same snapshot, as after a restart.
    pub fn reopen(&self) -> (FileQueueProcessor, Arc<RecordingStatus>) {
        let status = Arc::new(RecordingStatus::default());
        let sink: Arc<dyn StatusSink> = status.clone();
        let queue = FileQueueProcessor::new(self.config.clone(), sink);
        (queue, status)
    }

    pub fn downloads(&self) -> PathBuf {
        let dir = self.dir.path().join("downloads");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn write_download(&self, name: &str, body: &[u8]) -> PathBuf {
        let path = self.downloads().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }
}

pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, body) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}
