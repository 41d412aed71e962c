//! Local status channel: a WebSocket hub keyed by endpoint.
//!
//! UIs connect to `ws://127.0.0.1:<port>/<endpoint>`. Messages sent through
//! the server are fanned out to every peer of the endpoint; `/currentTask`
//! additionally remembers its last status and replays it to peers that join
//! later.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::routing::get;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use modlane_contracts::endpoint::{CONVERSION, CURRENT_TASK, caches_last_status, normalize_endpoint};
use modlane_contracts::status::{MessageKind, StatusMessage, TaskStatus};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ChannelError, ChannelResult};
use crate::handlers::websocket_handler;
use crate::infra::config::ChannelConfig;
use crate::infra::websocket::{Connection, ConnectionManager, Outbound, messages};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

enum ListenerState {
    Idle,
    Running {
        addr: SocketAddr,
        task: JoinHandle<()>,
    },
}

struct ServerInner {
    config: ChannelConfig,
    manager: ConnectionManager,
    pending_selections: DashMap<Uuid, oneshot::Sender<Vec<String>>>,
    listener: Mutex<ListenerState>,
    /// Held across the running check and the bind in `start`.
    starting: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

/// Handle to the status channel. Cheap to clone.
#[derive(Clone)]
pub struct StatusChannelServer {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for StatusChannelServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = match &*self.inner.listener.lock() {
            ListenerState::Idle => None,
            ListenerState::Running { addr, .. } => Some(*addr),
        };
        f.debug_struct("StatusChannelServer")
            .field("config", &self.inner.config)
            .field("addr", &addr)
            .field("manager", &self.inner.manager)
            .field("pending_selections", &self.inner.pending_selections.len())
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl StatusChannelServer {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                manager: ConnectionManager::new(),
                pending_selections: DashMap::new(),
                listener: Mutex::new(ListenerState::Idle),
                starting: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Start accepting peers on `127.0.0.1:port` (`0` picks a free port).
    ///
    /// Calling this again while running returns the bound address without
    /// opening a second listener.
    pub async fn start(&self, port: u16) -> ChannelResult<SocketAddr> {
        self.ensure_live()?;
        if !self.inner.config.launch_authorized {
            warn!("refusing to start status channel without launch authorization");
            return Err(ChannelError::Unauthorized);
        }
        let _starting = self.inner.starting.lock().await;
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|source| ChannelError::Bind { port, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ChannelError::Bind { port, source })?;

        let mut state = self.inner.listener.lock();

        let app = self.router();
        let token = self.inner.shutdown.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = served {
                error!(%err, "status channel listener failed");
            }
        });
        *state = ListenerState::Running { addr, task };
        info!(%addr, "status channel listening");
        Ok(addr)
    }

    /// Address of the running listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.inner.listener.lock() {
            ListenerState::Running { addr, .. } => Some(*addr),
            ListenerState::Idle => None,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/{endpoint}", get(websocket_handler))
            .with_state(self.clone())
    }

    /// Whether peers may connect to `endpoint`.
    pub fn accepts(&self, endpoint: &str) -> bool {
        self.inner.config.accepts(endpoint)
    }

    /// Serve one peer until it disconnects or the channel is disposed.
    pub async fn handle_connection(&self, socket: WebSocket, endpoint: &str) {
        let endpoint = normalize_endpoint(endpoint);
        let (mut ws_sender, mut ws_receiver) = socket.split();
        if self.is_disposed() {
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }

        let (tx, mut rx) = mpsc::channel::<Outbound>(self.inner.config.outbound_buffer.max(1));
        let connection = Arc::new(Connection::new(endpoint.clone(), tx));
        let conn_id = connection.id;
        self.inner.manager.add_connection(Arc::clone(&connection));
        info!(%conn_id, %endpoint, "status peer connected");

        let writer = tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                match outbound {
                    Outbound::Frame(frame) => {
                        if ws_sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = ws_sender.close().await;
        });

        let shutdown = self.inner.shutdown.clone();
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = ws_receiver.next() => msg,
            };
            match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(msg)) => match messages::websocket_to_status(&msg) {
                    Ok(Some(status)) => self.handle_inbound(conn_id, &endpoint, status),
                    Ok(None) => {}
                    Err(err) => warn!(%conn_id, %err, "ignoring malformed status frame"),
                },
                Some(Err(err)) => {
                    debug!(%conn_id, %err, "status peer read failed");
                    break;
                }
            }
        }

        self.inner.manager.remove_connection(conn_id);
        connection.close();
        drop(connection);
        let _ = writer.await;
        info!(%conn_id, %endpoint, "status peer disconnected");
    }

    fn handle_inbound(&self, conn_id: Uuid, endpoint: &str, message: StatusMessage) {
        if message.kind == MessageKind::FileSelectionResponse {
            let Some(payload) = message.payload else {
                warn!(%conn_id, "file selection response without payload");
                return;
            };
            match self.inner.pending_selections.remove(&payload.task_id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(payload.files);
                }
                None => debug!(task_id = %payload.task_id, "no pending file selection"),
            }
            return;
        }

        // Peers may publish to their endpoint; everyone else on it hears it.
        match messages::status_to_frame(&message) {
            Ok(frame) => {
                let cache = caches_last_status(endpoint) && message.kind == MessageKind::Status;
                self.inner
                    .manager
                    .broadcast(endpoint, frame, cache, Some(conn_id));
            }
            Err(err) => warn!(%conn_id, %err, "failed to relay status frame"),
        }
    }

    /// Send `message` to every peer on `endpoint`. Returns how many peers
    /// it was queued for; zero peers is not an error.
    pub fn broadcast_to_endpoint(
        &self,
        endpoint: &str,
        message: &StatusMessage,
    ) -> ChannelResult<usize> {
        self.ensure_live()?;
        let endpoint = normalize_endpoint(endpoint);
        if !self.accepts(&endpoint) {
            return Err(ChannelError::UnknownEndpoint(endpoint));
        }
        let frame = messages::status_to_frame(message)?;
        let cache = caches_last_status(&endpoint) && message.kind == MessageKind::Status;
        Ok(self.inner.manager.broadcast(&endpoint, frame, cache, None))
    }

    /// Publish an in-progress task description on `/currentTask`.
    pub fn update_current_task_status(&self, message: &str) -> ChannelResult<usize> {
        self.report_current_task(TaskStatus::InProgress, message)
    }

    pub fn report_current_task(&self, status: TaskStatus, message: &str) -> ChannelResult<usize> {
        self.broadcast_to_endpoint(CURRENT_TASK, &StatusMessage::status(status, message))
    }

    /// Publish a progress update on `/conversion`.
    pub fn broadcast_progress(&self, percent: u8, message: &str) -> ChannelResult<usize> {
        self.broadcast_to_endpoint(CONVERSION, &StatusMessage::progress(percent, message))
    }

    pub fn has_connected_clients(&self) -> bool {
        self.inner.manager.total_connections() > 0
    }

    pub fn connection_count(&self, endpoint: &str) -> usize {
        self.inner
            .manager
            .connection_count(&normalize_endpoint(endpoint))
    }

    /// Ask the peers on `endpoint` to pick from `files` and wait for the
    /// first answer. `None` when nobody is connected, nobody answers in
    /// time, or the channel is disposed while waiting.
    pub async fn request_file_selection(
        &self,
        endpoint: &str,
        message: &str,
        files: Vec<String>,
        timeout: Duration,
    ) -> ChannelResult<Option<Vec<String>>> {
        let task_id = Uuid::now_v7();
        let (tx, rx) = oneshot::channel();
        self.inner.pending_selections.insert(task_id, tx);

        let request = StatusMessage::file_selection(task_id, message, files);
        let delivered = match self.broadcast_to_endpoint(endpoint, &request) {
            Ok(delivered) => delivered,
            Err(err) => {
                self.inner.pending_selections.remove(&task_id);
                return Err(err);
            }
        };
        if delivered == 0 {
            self.inner.pending_selections.remove(&task_id);
            return Ok(None);
        }

        let outcome = tokio::time::timeout(timeout, rx).await;
        self.inner.pending_selections.remove(&task_id);
        match outcome {
            Ok(Ok(selected)) => Ok(Some(selected)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                debug!(%task_id, "file selection timed out");
                Ok(None)
            }
        }
    }

    /// Close every connection and stop listening. Subsequent operations
    /// fail with [`ChannelError::Disposed`].
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.manager.close_all();
        self.inner.pending_selections.clear();
        self.inner.shutdown.cancel();

        let state = std::mem::replace(&mut *self.inner.listener.lock(), ListenerState::Idle);
        if let ListenerState::Running { addr, task } = state {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!(%addr, "status channel listener did not stop in time");
                abort.abort();
            }
        }
        info!("status channel disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> ChannelResult<()> {
        if self.is_disposed() {
            Err(ChannelError::Disposed)
        } else {
            Ok(())
        }
    }
}
