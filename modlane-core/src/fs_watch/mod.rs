//! Filesystem watch pipeline feeding the ingestion queue.
//!
//! A thin wrapper around `notify` that debounces raw notifications per path
//! and forwards settled paths to an [`IngestSink`]. Renames skip the
//! debounce so the queue can follow a file before its next processing step
//! reads the old path.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use notify::event::{CreateKind, EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::{Duration, Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::is_supported;
use crate::config::WatchConfig;
use crate::error::{IngestError, Result};
use crate::queue::IngestSink;

mod debounce;

use debounce::Debouncer;

/// A directory to monitor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchTarget {
    pub path: PathBuf,
    pub recursive: bool,
}

impl WatchTarget {
    pub fn recursive(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: true,
        }
    }

    pub fn flat(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: false,
        }
    }
}

/// Outcome of [`FileWatcher::start_watching`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchReport {
    /// Targets now being watched.
    pub watching: Vec<PathBuf>,
    /// Targets that could not be watched, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Notifications published by the watcher itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatcherEvent {
    FileMoved {
        source: PathBuf,
        destination: PathBuf,
    },
}

/// Observer hook for surfacing watcher errors.
pub trait FsWatchObserver: Send + Sync {
    fn on_error(&self, path: &Path, error: &str);
}

/// No-op observer used when nothing needs to hear about errors beyond the
/// log.
pub struct NoopFsWatchObserver;

impl FsWatchObserver for NoopFsWatchObserver {
    fn on_error(&self, _path: &Path, _error: &str) {}
}

impl fmt::Debug for NoopFsWatchObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoopFsWatchObserver")
    }
}

/// Watches download directories and feeds what appears there into the
/// queue.
pub struct FileWatcher<O: FsWatchObserver = NoopFsWatchObserver> {
    config: WatchConfig,
    observer: Arc<O>,
    sink: Arc<dyn IngestSink>,
    events: broadcast::Sender<WatcherEvent>,
    active: Mutex<Option<ActiveWatch>>,
    disposed: AtomicBool,
}

impl<O: FsWatchObserver + 'static> fmt::Debug for FileWatcher<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("FileWatcher");
        debug
            .field("config", &self.config)
            .field("observer_type", &std::any::type_name::<O>())
            .field("disposed", &self.disposed.load(Ordering::Relaxed));

        match self.active.try_lock() {
            Ok(guard) => {
                let watched = guard.as_ref().map_or(0, |active| active.watchers.len());
                debug.field("watched_paths", &watched);
            }
            Err(_) => {
                debug.field("watched_paths", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl<O: FsWatchObserver + 'static> FileWatcher<O> {
    pub fn new(config: WatchConfig, sink: Arc<dyn IngestSink>, observer: Arc<O>) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(16));
        Self {
            config,
            observer,
            sink,
            events,
            active: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.events.subscribe()
    }

    /// Attach notify watchers for `targets`.
    ///
    /// Targets that are already watched are kept as they are. A target that
    /// cannot be watched is reported in [`WatchReport::failed`] and to the
    /// observer; the call only fails when nothing could be watched at all.
    pub async fn start_watching(&self, targets: Vec<WatchTarget>) -> Result<WatchReport> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(IngestError::InvalidState(
                "file watcher has been shut down".into(),
            ));
        }

        let requested = targets.len();
        let mut guard = self.active.lock().await;
        let mut report = WatchReport::default();

        let mut fresh = Vec::with_capacity(requested);
        for target in resolve_targets(targets) {
            let watched = guard.as_ref().is_some_and(|active| {
                active.watchers.iter().any(|(path, _)| path == &target.path)
            });
            if watched {
                report.watching.push(target.path);
            } else {
                fresh.push(target);
            }
        }

        let (tx, rx) = match guard.as_ref() {
            Some(active) => (active.tx.clone(), None),
            None => {
                let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(64));
                (tx, Some(rx))
            }
        };

        let watcher_tx = tx.clone();
        let (built, failed) = spawn_blocking(move || init_watchers(fresh, watcher_tx))
            .await
            .map_err(|err| {
                IngestError::Watch(format!("watcher initialization panicked: {err}"))
            })?;

        for (path, reason) in &failed {
            warn!(path = %path.display(), %reason, "failed to watch directory");
            self.observer.on_error(path, reason);
        }
        report.failed = failed;
        report
            .watching
            .extend(built.iter().map(|(path, _)| path.clone()));

        if report.watching.is_empty() {
            return Err(IngestError::Watch(format!(
                "none of the {requested} watch target(s) could be watched"
            )));
        }

        if let Some(active) = guard.as_mut() {
            active.watchers.extend(built);
        } else if let Some(rx) = rx {
            let cancel = CancellationToken::new();
            let flush_task = spawn_flush_loop(
                rx,
                cancel.clone(),
                Arc::clone(&self.sink),
                Arc::clone(&self.observer),
                self.events.clone(),
                self.config.debounce_window(),
            );
            *guard = Some(ActiveWatch {
                tx,
                watchers: built,
                cancel,
                flush_task,
            });
        }

        info!(
            watching = report.watching.len(),
            failed = report.failed.len(),
            "file watcher started"
        );
        Ok(report)
    }

    /// Stop all watches. A forward already under way is allowed to finish;
    /// nothing is forwarded or published once this returns and further
    /// [`start_watching`](Self::start_watching) calls fail.
    pub async fn shutdown(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            active.shutdown().await;
            info!("file watcher stopped");
        }
    }
}

struct ActiveWatch {
    tx: mpsc::Sender<WatchMessage>,
    watchers: Vec<(PathBuf, RecommendedWatcher)>,
    cancel: CancellationToken,
    flush_task: JoinHandle<()>,
}

impl ActiveWatch {
    async fn shutdown(self) {
        // Dropping the watchers stops the notify streams.
        drop(self.watchers);
        self.cancel.cancel();
        if let Err(err) = self.flush_task.await {
            warn!(%err, "watch flush loop ended abnormally");
        }
    }
}

enum WatchMessage {
    Event(Event),
    Error { root: PathBuf, message: String },
}

impl fmt::Debug for WatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMessage::Event(event) => f
                .debug_struct("WatchMessage::Event")
                .field("kind", &event.kind)
                .field("path_count", &event.paths.len())
                .finish(),
            WatchMessage::Error { root, message } => f
                .debug_struct("WatchMessage::Error")
                .field("root", root)
                .field("message", message)
                .finish(),
        }
    }
}

/// What a single notify event asks the flush loop to do.
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Touch(PathBuf),
    Forget(PathBuf),
    Rename { from: PathBuf, to: PathBuf },
}

/// Pairs the separate `From`/`To` halves some backends emit, and drops the
/// combined `Both` event when its halves were already paired.
#[derive(Debug)]
struct RenameTracker {
    window: Duration,
    last_from: Option<(PathBuf, Instant)>,
    last_pair: Option<(PathBuf, PathBuf)>,
}

impl RenameTracker {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_from: None,
            last_pair: None,
        }
    }

    fn from(&mut self, path: PathBuf, now: Instant) {
        self.last_from = Some((path, now));
    }

    fn to(&mut self, path: PathBuf, now: Instant) -> Action {
        match self.last_from.take() {
            Some((from, seen)) if now.duration_since(seen) <= self.window => {
                self.last_pair = Some((from.clone(), path.clone()));
                Action::Rename { from, to: path }
            }
            _ => Action::Touch(path),
        }
    }

    fn both(&mut self, from: PathBuf, to: PathBuf) -> Option<Action> {
        let pair = (from, to);
        if self.last_pair.as_ref() == Some(&pair) {
            self.last_pair = None;
            return None;
        }
        self.last_from = None;
        let (from, to) = pair;
        Some(Action::Rename { from, to })
    }
}

fn interpret(event: Event, renames: &mut RenameTracker, now: Instant) -> Vec<Action> {
    let mut paths = event.paths.into_iter();
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_)
        | EventKind::Modify(
            ModifyKind::Data(_) | ModifyKind::Metadata(_) | ModifyKind::Any | ModifyKind::Other,
        ) => paths.map(Action::Touch).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => renames.both(from, to).into_iter().collect(),
                (Some(path), None) => vec![Action::Touch(path)],
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            if let Some(path) = paths.next() {
                renames.from(path.clone(), now);
                vec![Action::Forget(path)]
            } else {
                Vec::new()
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .next()
            .map(|path| renames.to(path, now))
            .into_iter()
            .collect(),
        // Backends that cannot tell the halves apart: whichever side still
        // exists is the new name.
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .map(|path| {
                if path.exists() {
                    Action::Touch(path)
                } else {
                    Action::Forget(path)
                }
            })
            .collect(),
        EventKind::Remove(_) => paths.map(Action::Forget).collect(),
        _ => Vec::new(),
    }
}

fn log_action(action: &Action) {
    match action {
        Action::Touch(path) => debug!(path = %path.display(), "fs change"),
        Action::Forget(path) => debug!(path = %path.display(), "fs removal"),
        Action::Rename { from, to } => {
            debug!(from = %from.display(), to = %to.display(), "fs rename")
        }
    }
}

fn spawn_flush_loop<O: FsWatchObserver + 'static>(
    mut rx: mpsc::Receiver<WatchMessage>,
    cancel: CancellationToken,
    sink: Arc<dyn IngestSink>,
    observer: Arc<O>,
    events: broadcast::Sender<WatcherEvent>,
    window: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending = Debouncer::new(window);
        let mut renames = RenameTracker::new(window);

        loop {
            flush_due(&mut pending, sink.as_ref(), observer.as_ref()).await;

            let deadline = pending.next_deadline();
            let received = async {
                match deadline {
                    None => Some(rx.recv().await),
                    Some(deadline) => timeout_at(deadline, rx.recv()).await.ok(),
                }
            };
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = received => match received {
                    Some(msg) => msg,
                    // A debounce deadline passed.
                    None => continue,
                },
            };

            let Some(msg) = msg else {
                break;
            };

            match msg {
                WatchMessage::Event(event) => {
                    let now = Instant::now();
                    for action in interpret(event, &mut renames, now) {
                        log_action(&action);
                        match action {
                            Action::Touch(path) => {
                                if is_supported(&path) {
                                    pending.touch(path, now);
                                }
                            }
                            Action::Forget(path) => {
                                pending.forget(&path);
                            }
                            Action::Rename { from, to } => {
                                dispatch_rename(
                                    from,
                                    to,
                                    &mut pending,
                                    sink.as_ref(),
                                    observer.as_ref(),
                                    &events,
                                )
                                .await;
                            }
                        }
                    }
                }
                WatchMessage::Error { root, message } => {
                    warn!(root = %root.display(), %message, "watcher reported an error");
                    observer.on_error(&root, &message);
                }
            }
        }
    })
}

async fn flush_due<O: FsWatchObserver>(
    pending: &mut Debouncer,
    sink: &dyn IngestSink,
    observer: &O,
) {
    if pending.is_empty() {
        return;
    }
    for path in pending.take_due(Instant::now()) {
        forward(&path, sink, observer).await;
    }
}

async fn forward<O: FsWatchObserver>(path: &Path, sink: &dyn IngestSink, observer: &O) {
    match sink.enqueue_path(path.to_path_buf()).await {
        Ok(()) => {}
        Err(IngestError::UnsupportedInput(_)) => {
            debug!(path = %path.display(), "watcher skipped unsupported file");
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to forward watched file");
            observer.on_error(path, &err.to_string());
        }
    }
}

async fn dispatch_rename<O: FsWatchObserver>(
    from: PathBuf,
    to: PathBuf,
    pending: &mut Debouncer,
    sink: &dyn IngestSink,
    observer: &O,
    events: &broadcast::Sender<WatcherEvent>,
) {
    let was_pending = pending.forget(&from);

    if events
        .send(WatcherEvent::FileMoved {
            source: from.clone(),
            destination: to.clone(),
        })
        .is_err()
    {
        debug!("no subscribers for watcher event");
    }

    match sink.rename_path(&from, &to).await {
        Ok(true) => {}
        Ok(false) if !is_supported(&to) => {}
        Ok(false) if was_pending => pending.touch(to, Instant::now()),
        Ok(false) => forward(&to, sink, observer).await,
        Err(err) => {
            warn!(from = %from.display(), to = %to.display(), %err, "failed to follow rename");
            observer.on_error(&to, &err.to_string());
        }
    }
}

fn resolve_targets(targets: Vec<WatchTarget>) -> Vec<WatchTarget> {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    targets
        .into_iter()
        .map(|target| {
            if target.path.is_absolute() {
                target
            } else {
                WatchTarget {
                    path: cwd.join(&target.path),
                    recursive: target.recursive,
                }
            }
        })
        .collect()
}

type BuiltWatchers = (Vec<(PathBuf, RecommendedWatcher)>, Vec<(PathBuf, String)>);

fn init_watchers(targets: Vec<WatchTarget>, tx: mpsc::Sender<WatchMessage>) -> BuiltWatchers {
    let mut watchers = Vec::with_capacity(targets.len());
    let mut failed = Vec::new();

    for target in targets {
        match init_watcher(&target, tx.clone()) {
            Ok(watcher) => watchers.push((target.path, watcher)),
            Err(reason) => failed.push((target.path, reason)),
        }
    }

    (watchers, failed)
}

fn init_watcher(
    target: &WatchTarget,
    tx: mpsc::Sender<WatchMessage>,
) -> std::result::Result<RecommendedWatcher, String> {
    if !target.path.is_dir() {
        return Err("not a directory".to_string());
    }

    let root = target.path.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            let msg = match res {
                Ok(event) => WatchMessage::Event(event),
                Err(err) => WatchMessage::Error {
                    root: root.clone(),
                    message: err.to_string(),
                },
            };
            if let Err(err) = tx.blocking_send(msg) {
                warn!("fs_watch channel send failed for {}: {}", root.display(), err);
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|err| format!("failed to create watcher: {err}"))?;

    let mode = if target.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher
        .watch(&target.path, mode)
        .map_err(|err| format!("failed to watch: {err}"))?;

    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tempfile::tempdir;
    use tokio::sync::Notify;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Enqueue(PathBuf),
        Rename(PathBuf, PathBuf),
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: StdMutex<Vec<Call>>,
        changed: Notify,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        async fn wait_for(&self, predicate: impl Fn(&[Call]) -> bool) -> bool {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                let notified = self.changed.notified();
                if predicate(&self.calls()) {
                    return true;
                }
                if timeout_at(deadline, notified).await.is_err() {
                    return predicate(&self.calls());
                }
            }
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
            self.changed.notify_waiters();
        }
    }

    #[async_trait]
    impl IngestSink for RecordingSink {
        async fn enqueue_path(&self, path: PathBuf) -> Result<()> {
            self.record(Call::Enqueue(path));
            Ok(())
        }

        async fn rename_path(&self, from: &Path, to: &Path) -> Result<bool> {
            self.record(Call::Rename(from.to_path_buf(), to.to_path_buf()));
            Ok(false)
        }
    }

    fn fast_config() -> WatchConfig {
        WatchConfig {
            debounce_window_ms: 100,
            ..WatchConfig::default()
        }
    }

    fn watcher(sink: &Arc<RecordingSink>) -> FileWatcher {
        let sink: Arc<dyn IngestSink> = Arc::clone(sink) as Arc<dyn IngestSink>;
        FileWatcher::new(fast_config(), sink, Arc::new(NoopFsWatchObserver))
    }

    fn enqueues_of(calls: &[Call], path: &Path) -> usize {
        calls
            .iter()
            .filter(|call| matches!(call, Call::Enqueue(p) if p == path))
            .count()
    }

    #[test]
    fn split_rename_halves_pair_into_one_rename() {
        let start = Instant::now();
        let mut tracker = RenameTracker::new(Duration::from_millis(100));
        let from = PathBuf::from("/dl/a.zip.part");
        let to = PathBuf::from("/dl/a.zip");

        tracker.from(from.clone(), start);
        assert_eq!(
            tracker.to(to.clone(), start + Duration::from_millis(5)),
            Action::Rename {
                from: from.clone(),
                to: to.clone()
            }
        );
        // The combined event that follows on inotify is a duplicate.
        assert_eq!(tracker.both(from.clone(), to.clone()), None);
        // A later, unrelated rename of the same pair is not.
        assert!(tracker.both(from, to).is_some());
    }

    #[test]
    fn lone_to_half_is_a_create() {
        let start = Instant::now();
        let mut tracker = RenameTracker::new(Duration::from_millis(100));
        let to = PathBuf::from("/dl/moved-in.pmp");
        assert_eq!(tracker.to(to.clone(), start), Action::Touch(to.clone()));

        tracker.from(PathBuf::from("/elsewhere/x.pmp"), start);
        assert_eq!(
            tracker.to(to.clone(), start + Duration::from_secs(1)),
            Action::Touch(to)
        );
    }

    #[tokio::test]
    async fn partial_target_failure_still_watches_the_rest() {
        let tmp = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let watcher = watcher(&sink);

        let missing = tmp.path().join("does-not-exist");
        let report = watcher
            .start_watching(vec![
                WatchTarget::recursive(tmp.path()),
                WatchTarget::recursive(&missing),
            ])
            .await
            .unwrap();

        assert_eq!(report.watching, vec![tmp.path().to_path_buf()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, missing);
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn all_targets_failing_is_an_error() {
        let tmp = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let watcher = watcher(&sink);

        let result = watcher
            .start_watching(vec![WatchTarget::flat(tmp.path().join("nope"))])
            .await;
        assert!(matches!(result, Err(IngestError::Watch(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn write_burst_is_forwarded_once() {
        let tmp = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let watcher = watcher(&sink);
        watcher
            .start_watching(vec![WatchTarget::recursive(tmp.path())])
            .await
            .unwrap();

        let file = tmp.path().join("burst.pmp");
        std::fs::write(&file, b"part one").unwrap();
        for chunk in [b"two".as_slice(), b"three".as_slice()] {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut bytes = std::fs::read(&file).unwrap();
            bytes.extend_from_slice(chunk);
            std::fs::write(&file, bytes).unwrap();
        }
        std::fs::write(tmp.path().join("readme.txt"), b"ignored").unwrap();

        assert!(sink.wait_for(|calls| enqueues_of(calls, &file) > 0).await);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let calls = sink.calls();
        assert_eq!(enqueues_of(&calls, &file), 1);
        assert_eq!(enqueues_of(&calls, &tmp.path().join("readme.txt")), 0);
        watcher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn finished_download_rename_is_followed_and_enqueued() {
        let tmp = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let watcher = watcher(&sink);
        let mut events = watcher.subscribe();
        watcher
            .start_watching(vec![WatchTarget::recursive(tmp.path())])
            .await
            .unwrap();

        let partial = tmp.path().join("pack.zip.part");
        let done = tmp.path().join("pack.zip");
        std::fs::write(&partial, b"zip bytes").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::rename(&partial, &done).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            WatcherEvent::FileMoved {
                source: partial.clone(),
                destination: done.clone(),
            }
        );

        assert!(sink.wait_for(|calls| enqueues_of(calls, &done) > 0).await);
        let calls = sink.calls();
        assert!(calls.contains(&Call::Rename(partial.clone(), done.clone())));
        assert_eq!(enqueues_of(&calls, &partial), 0);
        watcher.shutdown().await;
    }

    #[derive(Default)]
    struct SlowSink {
        entered: Notify,
        finished: AtomicBool,
    }

    #[async_trait]
    impl IngestSink for SlowSink {
        async fn enqueue_path(&self, _path: PathBuf) -> Result<()> {
            self.entered.notify_one();
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn rename_path(&self, _from: &Path, _to: &Path) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_lets_an_in_flight_forward_finish() {
        let tmp = tempdir().unwrap();
        let sink = Arc::new(SlowSink::default());
        let watcher = FileWatcher::new(
            fast_config(),
            Arc::clone(&sink) as Arc<dyn IngestSink>,
            Arc::new(NoopFsWatchObserver),
        );
        watcher
            .start_watching(vec![WatchTarget::recursive(tmp.path())])
            .await
            .unwrap();

        std::fs::write(tmp.path().join("slow.pmp"), b"mod").unwrap();
        tokio::time::timeout(Duration::from_secs(5), sink.entered.notified())
            .await
            .expect("forward starts");

        watcher.shutdown().await;
        assert!(sink.finished.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nothing_is_forwarded_after_shutdown() {
        let tmp = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let watcher = watcher(&sink);
        watcher
            .start_watching(vec![WatchTarget::recursive(tmp.path())])
            .await
            .unwrap();
        watcher.shutdown().await;

        std::fs::write(tmp.path().join("late.pmp"), b"late").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(sink.calls().is_empty());

        let restart = watcher
            .start_watching(vec![WatchTarget::recursive(tmp.path())])
            .await;
        assert!(matches!(restart, Err(IngestError::InvalidState(_))));
    }
}
