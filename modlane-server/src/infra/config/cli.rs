use std::path::PathBuf;

use clap::Args as ClapArgs;
use clap::builder::FalseyValueParser;
use modlane_core::{IngestConfig, WatchTarget};

use super::{ChannelConfig, DEFAULT_PORT};

/// Worker options. Every flag can also come from the environment or a
/// `.env` file.
#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// Status channel port on 127.0.0.1
    #[arg(short, long, env = "MODLANE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Comma-separated download directories to watch (recursively)
    #[arg(long, env = "MODLANE_WATCH_DIRS", value_delimiter = ',')]
    pub watch: Vec<PathBuf>,

    /// Queue snapshot file
    #[arg(long, env = "MODLANE_STATE_PATH")]
    pub state_path: Option<PathBuf>,

    /// Root for per-archive extraction directories
    #[arg(long, env = "MODLANE_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Quiet period before a changed file is queued, in milliseconds
    #[arg(long, env = "MODLANE_DEBOUNCE_MS")]
    pub debounce_ms: Option<u64>,

    /// `7z` executable used for 7z and rar archives
    #[arg(long, env = "MODLANE_SEVEN_ZIP")]
    pub seven_zip: Option<PathBuf>,

    /// Set by the launching application to allow the status channel to start.
    /// Any value other than `0`, `false`, `no`, `off` or empty counts as set.
    #[arg(
        long,
        env = "MODLANE_LAUNCH_AUTHORIZED",
        default_value_t = false,
        value_parser = FalseyValueParser::new()
    )]
    pub launch_authorized: bool,
}

impl ServeArgs {
    /// Ingestion settings with command-line overrides applied to the
    /// defaults.
    pub fn ingest_config(&self) -> IngestConfig {
        let mut config = IngestConfig::default();
        if let Some(path) = &self.state_path {
            config.state_path = path.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(ms) = self.debounce_ms {
            config.watch.debounce_window_ms = ms;
        }
        if let Some(binary) = &self.seven_zip {
            config.extraction.seven_zip_binary = binary.clone();
        }
        config
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            launch_authorized: self.launch_authorized,
            ..ChannelConfig::default()
        }
    }

    pub fn watch_targets(&self) -> Vec<WatchTarget> {
        self.watch
            .iter()
            .filter(|path| !path.as_os_str().is_empty())
            .map(WatchTarget::recursive)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    fn parse(args: &[&str]) -> ServeArgs {
        TestCli::try_parse_from(std::iter::once("modlane-worker").chain(args.iter().copied()))
            .unwrap()
            .serve
    }

    #[test]
    fn overrides_flow_into_ingest_config() {
        let args = parse(&[
            "--port",
            "5000",
            "--watch",
            "/dl/a,/dl/b",
            "--state-path",
            "/var/modlane/queue.json",
            "--debounce-ms",
            "50",
            "--seven-zip",
            "/opt/7zz",
            "--launch-authorized",
        ]);

        assert_eq!(args.port, 5000);
        assert!(args.channel_config().launch_authorized);
        assert_eq!(
            args.watch_targets(),
            vec![WatchTarget::recursive("/dl/a"), WatchTarget::recursive("/dl/b")]
        );

        let config = args.ingest_config();
        assert_eq!(config.state_path, PathBuf::from("/var/modlane/queue.json"));
        assert_eq!(config.watch.debounce_window_ms, 50);
        assert_eq!(config.extraction.seven_zip_binary, PathBuf::from("/opt/7zz"));
        assert_eq!(config.work_dir, IngestConfig::default().work_dir);
    }
}
