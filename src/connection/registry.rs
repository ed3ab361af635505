//! Live connection tracking

use dashmap::DashMap;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::ws::protocol::ServerMsg;

use super::ConnectionId;

/// Per-connection outbound backlog, about four seconds of state at 60 Hz
pub const OUTBOUND_BUFFER: usize = 256;

/// Slots kept free for lifecycle messages once state snapshots back up
const CONTROL_HEADROOM: usize = 16;

/// Outbound half of a connection: everything pushed here is written to the socket
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub outbound: mpsc::Sender<ServerMsg>,
    pub connected_at: Instant,
}

/// Registry of all connected clients
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Assign a fresh identity and return the receiver the socket writer drains
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMsg>) {
        let id = ConnectionId::new();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

        self.connections.insert(
            id,
            ConnectionHandle {
                id,
                outbound,
                connected_at: Instant::now(),
            },
        );

        debug!(connection_id = %id, "Connection registered");
        (id, outbound_rx)
    }

    /// Forget a connection. Returns false if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some((_, conn)) => {
                debug!(
                    connection_id = %conn.id,
                    session_secs = conn.connected_at.elapsed().as_secs(),
                    "Connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Queue a message for a connection; false if it is gone or its writer has hung up.
    /// A peer that stops reading loses state snapshots first, lifecycle messages last.
    pub fn send(&self, id: ConnectionId, msg: ServerMsg) -> bool {
        let Some(conn) = self.connections.get(&id) else {
            return false;
        };
        if conn.outbound.is_closed() {
            return false;
        }

        if matches!(msg, ServerMsg::UpdateState(_)) && conn.outbound.capacity() <= CONTROL_HEADROOM {
            trace!(connection_id = %id, "Outbound backlog full, dropping state snapshot");
            return true;
        }

        match conn.outbound.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %id, "Outbound backlog full, dropping message");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
