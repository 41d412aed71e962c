use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use modlane_contracts::endpoint::{CONVERSION, CURRENT_TASK, normalize_endpoint};
use modlane_contracts::status::{MessageKind, StatusMessage};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<Socket, Message>;

const EVENT_CAPACITY: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Something that arrived on one of the client's endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Message {
        endpoint: String,
        message: StatusMessage,
    },
    /// The worker wants the user to pick from `files`. Answer with
    /// [`StatusChannelClient::respond_to_file_selection`].
    FileSelectionRequested {
        endpoint: String,
        task_id: Uuid,
        message: String,
        files: Vec<String>,
    },
    /// The connection ended. Sends to this endpoint now fail.
    Closed { endpoint: String },
}

struct EndpointLink {
    id: Uuid,
    writer: Arc<Mutex<Writer>>,
    reader: JoinHandle<()>,
}

/// Connection to the worker's status channel, one socket per endpoint.
///
/// There is no reconnection; a dropped endpoint is reported once as
/// [`ClientEvent::Closed`].
#[derive(Clone)]
pub struct StatusChannelClient {
    links: Arc<DashMap<String, EndpointLink>>,
    events: broadcast::Sender<ClientEvent>,
    /// Receiver created with the client so catch-up frames are not lost.
    first_events: Arc<parking_lot::Mutex<Option<broadcast::Receiver<ClientEvent>>>>,
    port: u16,
}

impl fmt::Debug for StatusChannelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoints: Vec<String> = self.links.iter().map(|l| l.key().clone()).collect();
        f.debug_struct("StatusChannelClient")
            .field("port", &self.port)
            .field("endpoints", &endpoints)
            .finish()
    }
}

impl StatusChannelClient {
    /// Connect to `/currentTask` and `/conversion` on `127.0.0.1:port`.
    pub async fn connect(port: u16) -> ClientResult<Self> {
        Self::connect_endpoints(port, &[CURRENT_TASK, CONVERSION]).await
    }

    /// Connect to a custom set of endpoints. Fails as a whole if any
    /// endpoint refuses.
    pub async fn connect_endpoints(port: u16, endpoints: &[&str]) -> ClientResult<Self> {
        let (events, first) = broadcast::channel(EVENT_CAPACITY);
        let client = Self {
            links: Arc::new(DashMap::new()),
            events,
            first_events: Arc::new(parking_lot::Mutex::new(Some(first))),
            port,
        };

        for endpoint in endpoints {
            if let Err(err) = client.open(&normalize_endpoint(endpoint)).await {
                client.close().await;
                return Err(err);
            }
        }
        Ok(client)
    }

    /// Subscribe to inbound messages.
    ///
    /// The first call also yields everything received since connecting,
    /// such as the `/currentTask` catch-up frame. Later calls only see
    /// events from then on.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.first_events
            .lock()
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }

    pub fn is_connected(&self, endpoint: &str) -> bool {
        self.links.contains_key(&normalize_endpoint(endpoint))
    }

    /// Write one frame to `endpoint`.
    pub async fn send_message(&self, message: &StatusMessage, endpoint: &str) -> ClientResult<()> {
        let endpoint = normalize_endpoint(endpoint);
        let writer = self
            .links
            .get(&endpoint)
            .map(|link| Arc::clone(&link.writer))
            .ok_or_else(|| ClientError::NotConnected(endpoint.clone()))?;
        let frame = message.to_json()?;

        let mut writer = writer.lock().await;
        writer
            .send(Message::Text(frame.into()))
            .await
            .map_err(|source| ClientError::Transport { endpoint, source })
    }

    /// Answer a [`ClientEvent::FileSelectionRequested`].
    pub async fn respond_to_file_selection(
        &self,
        endpoint: &str,
        task_id: Uuid,
        selected: Vec<String>,
    ) -> ClientResult<()> {
        let response = StatusMessage::file_selection_response(task_id, selected);
        self.send_message(&response, endpoint).await
    }

    /// Close every endpoint.
    pub async fn close(&self) {
        let endpoints: Vec<String> = self.links.iter().map(|l| l.key().clone()).collect();
        for endpoint in endpoints {
            let Some((_, link)) = self.links.remove(&endpoint) else {
                continue;
            };
            if let Err(err) = link.writer.lock().await.close().await {
                debug!(%endpoint, %err, "close handshake failed");
            }
            let abort = link.reader.abort_handle();
            if tokio::time::timeout(CLOSE_GRACE, link.reader).await.is_err() {
                abort.abort();
            }
        }
    }

    async fn open(&self, endpoint: &str) -> ClientResult<()> {
        let url = format!("ws://127.0.0.1:{}{endpoint}", self.port);
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|source| ClientError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let (writer, reader) = socket.split();
        let writer = Arc::new(Mutex::new(writer));

        let id = Uuid::now_v7();
        // The loop may end right away; it must not run before its link is
        // registered or the link would outlive the socket.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let links = Arc::clone(&self.links);
        let events = self.events.clone();
        let owned_endpoint = endpoint.to_string();
        let reader = tokio::spawn(async move {
            let _ = registered_rx.await;
            receive_loop(id, owned_endpoint, reader, links, events).await;
        });
        self.links
            .insert(endpoint.to_string(), EndpointLink { id, writer, reader });
        let _ = registered_tx.send(());
        info!(%url, "connected to status channel");
        Ok(())
    }
}

async fn receive_loop(
    id: Uuid,
    endpoint: String,
    mut reader: SplitStream<Socket>,
    links: Arc<DashMap<String, EndpointLink>>,
    events: broadcast::Sender<ClientEvent>,
) {
    while let Some(frame) = reader.next().await {
        let parsed = match frame {
            Ok(Message::Text(text)) => StatusMessage::from_json(text.as_str()),
            Ok(Message::Binary(bytes)) => StatusMessage::from_json_slice(&bytes),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(%endpoint, %err, "status channel read failed");
                break;
            }
        };
        match parsed {
            Ok(message) => {
                let _ = events.send(to_event(&endpoint, message));
            }
            Err(err) => warn!(%endpoint, %err, "ignoring malformed status frame"),
        }
    }

    // A reconnect may already have replaced this link.
    links.remove_if(&endpoint, |_, link| link.id == id);
    info!(%endpoint, "status channel connection closed");
    let _ = events.send(ClientEvent::Closed { endpoint });
}

fn to_event(endpoint: &str, message: StatusMessage) -> ClientEvent {
    match message {
        StatusMessage {
            kind: MessageKind::FileSelection,
            message,
            payload: Some(payload),
            ..
        } => ClientEvent::FileSelectionRequested {
            endpoint: endpoint.to_string(),
            task_id: payload.task_id,
            message,
            files: payload.files,
        },
        message => ClientEvent::Message {
            endpoint: endpoint.to_string(),
            message,
        },
    }
}
