use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for the ingestion pipeline.
///
/// Every section has defaults so callers only override what they need.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Filesystem watch debounce configuration.
    pub watch: WatchConfig,
    /// Retry policy of the stability probe.
    pub stability: StabilityConfig,
    /// External tooling used by the archive extractor.
    pub extraction: ExtractionConfig,
    /// Location of the persisted queue snapshot.
    pub state_path: PathBuf,
    /// Root for per-entry extraction directories.
    pub work_dir: PathBuf,
    /// Capacity of the queue's domain event channel.
    pub event_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            watch: WatchConfig::default(),
            stability: StabilityConfig::default(),
            extraction: ExtractionConfig::default(),
            state_path: PathBuf::from("modlane-queue.json"),
            work_dir: PathBuf::from("modlane-work"),
            event_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period a path needs before its notifications are acted on.
    pub debounce_window_ms: u64,
    /// Size of the channel between notify callbacks and the flush loop.
    pub channel_capacity: usize,
}

impl WatchConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms.max(1))
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 500,
            channel_capacity: 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Time between the two size samples of one attempt.
    pub sample_window_ms: u64,
}

impl StabilityConfig {
    /// Delay before retry number `attempt` (1-based), doubling from the base
    /// and capped at the max.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.retry_base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.retry_max_ms))
    }

    pub fn sample_window(&self) -> Duration {
        Duration::from_millis(self.sample_window_ms)
    }
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            retry_base_ms: 500,
            retry_max_ms: 10_000,
            sample_window_ms: 250,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// `7z` executable used for 7z and rar archives.
    pub seven_zip_binary: PathBuf,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            seven_zip_binary: PathBuf::from("7z"),
        }
    }
}
