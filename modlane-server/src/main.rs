//! # Modlane Worker
//!
//! Background process that watches download folders for game mod files.
//!
//! ## Overview
//!
//! - **Watching**: debounced filesystem events feed the ingestion queue
//! - **Ingestion**: each file waits until its download settles, then mod
//!   files are handed off and archives are unpacked
//! - **Status channel**: UIs follow along over a local WebSocket
//!
//! Configuration comes from flags, `MODLANE_*` environment variables or a
//! `.env` file; see `--help`.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use modlane_core::{FileQueueProcessor, FileWatcher, QueueEvent, StatusSink, WatcherEvent};
use modlane_server::{ChannelStatusSink, ChannelWatchObserver, ServeArgs, StatusChannelServer};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "modlane-worker")]
#[command(about = "Watch download folders and queue mods for installation")]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_loaded = dotenvy::dotenv().is_ok();
    let args = Cli::parse().serve;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,modlane_core=info,modlane_server=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if env_loaded {
        info!("loaded .env file");
    }

    let server = StatusChannelServer::new(args.channel_config());
    let addr = server
        .start(args.port)
        .await
        .context("failed to start status channel")?;
    info!(%addr, "status channel ready");

    let config = args.ingest_config();
    info!(
        state_path = %config.state_path.display(),
        work_dir = %config.work_dir.display(),
        debounce_ms = config.watch.debounce_window_ms,
        "ingestion configuration in effect"
    );

    let status: Arc<dyn StatusSink> = Arc::new(ChannelStatusSink::new(server.clone()));
    let queue = FileQueueProcessor::new(config.clone(), status);

    match queue.load_state().await {
        Ok(report) => info!(
            restored = report.restored,
            failed = report.failed,
            quarantined = report.quarantined.is_some(),
            "queue state loaded"
        ),
        Err(err) => {
            // The failure is already on /currentTask; keep the channel up so
            // the UI can show it until we are told to stop.
            error!(%err, "cannot load queue state");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            server.dispose().await;
            return Err(err).context("failed to load queue state");
        }
    }

    let cancel = CancellationToken::new();
    let worker = queue
        .start_processing(cancel.clone())
        .context("failed to start queue processing")?;

    let watcher = FileWatcher::new(
        config.watch.clone(),
        Arc::new(queue.clone()),
        Arc::new(ChannelWatchObserver::new(server.clone())),
    );
    let targets = args.watch_targets();
    if targets.is_empty() {
        warn!("no download directories configured; only restored entries will be processed");
    } else {
        match watcher.start_watching(targets).await {
            Ok(report) => {
                for (path, reason) in &report.failed {
                    warn!(path = %path.display(), %reason, "directory not watched");
                }
                info!(watching = report.watching.len(), "file watcher started");
            }
            Err(err) => warn!(%err, "file watcher did not start"),
        }
    }

    let relay = {
        let mut queue_events = queue.subscribe();
        let mut watch_events = watcher.subscribe();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = queue_events.recv() => match event {
                        Ok(QueueEvent::FileMoved { entry_id, destination, .. }) => info!(
                            %entry_id,
                            path = %destination.display(),
                            "ready to install"
                        ),
                        Ok(QueueEvent::FilesExtracted { entry_id, archive_name, files }) => info!(
                            %entry_id,
                            archive = %archive_name,
                            files = files.len(),
                            "archive extracted"
                        ),
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "queue events lagged"),
                        Err(RecvError::Closed) => break,
                    },
                    event = watch_events.recv() => match event {
                        Ok(WatcherEvent::FileMoved { source, destination }) => info!(
                            from = %source.display(),
                            to = %destination.display(),
                            "download renamed"
                        ),
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "watch events lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    watcher.shutdown().await;
    cancel.cancel();
    if let Err(err) = worker.await {
        warn!(%err, "queue worker ended abnormally");
    }
    let _ = relay.await;
    if let Err(err) = queue.persist_state().await {
        error!(%err, "failed to persist queue state");
    }
    server.dispose().await;
    Ok(())
}
