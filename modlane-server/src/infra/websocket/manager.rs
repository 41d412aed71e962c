use std::{fmt, sync::Arc};

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::infra::websocket::connection::Connection;

#[derive(Default)]
struct EndpointState {
    connections: Vec<Uuid>,
    /// Last status frame, replayed to peers that join later.
    last_status: Option<Utf8Bytes>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    /// Active WebSocket connections mapped by connection ID
    connections: Arc<DashMap<Uuid, Arc<Connection>>>,
    /// Endpoint path to its member connections and cached status
    endpoints: Arc<DashMap<String, EndpointState>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.connections.len())
            .field("endpoint_count", &self.endpoints.len())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            endpoints: Arc::new(DashMap::new()),
        }
    }

    /// Register a connection on its endpoint.
    ///
    /// The cached status is queued to the newcomer while the endpoint is
    /// locked, so a concurrent broadcast either reaches it as catch-up or
    /// as a live frame, never both and never neither.
    pub fn add_connection(&self, connection: Arc<Connection>) {
        let conn_id = connection.id;
        self.connections.insert(conn_id, Arc::clone(&connection));

        let mut endpoint = self
            .endpoints
            .entry(connection.endpoint.clone())
            .or_default();
        if let Some(last) = endpoint.last_status.clone()
            && let Err(err) = connection.try_send(last)
        {
            warn!(%conn_id, %err, "failed to replay last status");
        }
        endpoint.connections.push(conn_id);
    }

    /// Remove a connection and clean up endpoint membership
    pub fn remove_connection(&self, conn_id: Uuid) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(&conn_id)?;
        if let Some(mut endpoint) = self.endpoints.get_mut(&connection.endpoint) {
            endpoint.connections.retain(|id| id != &conn_id);
        }
        Some(connection)
    }

    /// Queue `frame` to every connection on `endpoint` except `skip`.
    /// Returns how many peers accepted it. With `cache` set the frame also
    /// becomes the endpoint's replayed status.
    pub fn broadcast(
        &self,
        endpoint: &str,
        frame: Utf8Bytes,
        cache: bool,
        skip: Option<Uuid>,
    ) -> usize {
        let targets: Vec<Arc<Connection>> = {
            let mut state = self.endpoints.entry(endpoint.to_string()).or_default();
            if cache {
                state.last_status = Some(frame.clone());
            }
            state
                .connections
                .iter()
                .filter(|id| Some(**id) != skip)
                .filter_map(|id| self.connections.get(id).map(|c| Arc::clone(c.value())))
                .collect()
        };

        let mut delivered = 0;
        for conn in targets {
            match conn.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => warn!(endpoint, %err, "failed to send status frame"),
            }
        }
        debug!(endpoint, delivered, "broadcast status frame");
        delivered
    }

    /// Get a specific connection
    pub fn get_connection(&self, conn_id: &Uuid) -> Option<Arc<Connection>> {
        self.connections.get(conn_id).map(|c| c.clone())
    }

    pub fn connection_count(&self, endpoint: &str) -> usize {
        self.endpoints
            .get(endpoint)
            .map(|state| state.connections.len())
            .unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }

    /// Ask every connection to close and forget them all.
    pub fn close_all(&self) {
        let ids: Vec<Uuid> = self.connections.iter().map(|c| *c.key()).collect();
        for id in ids {
            if let Some(connection) = self.remove_connection(id) {
                connection.close();
            }
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
