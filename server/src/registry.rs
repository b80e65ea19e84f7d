//! Live connection tracking for the judge server
//!
//! This module owns the server's view of who is connected:
//! - Connections admitted by the accept loop, before they register
//! - The binding from participant identity to the connection it registered on
//! - Unicast and broadcast primitives over each connection's outbound queue
//!
//! Sockets themselves live in per-connection writer tasks. The registry only
//! holds the sending half of each writer's queue, so every operation here is
//! synchronous and never waits on the network.

use crate::error::RegistryError;
use log::{debug, info};
use shared::Message;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Server-assigned id of an accepted connection
pub type ConnectionId = u64;

/// Work items for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(Message),
    /// Flush and shut the socket down
    Close,
}

/// An accepted connection and the queue feeding its writer task
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier assigned by the accept loop
    pub id: ConnectionId,
    /// Remote address, for logging
    pub addr: SocketAddr,
    /// Identity registered on this connection, once any
    pub identity: Option<String>,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    /// Creates an unbound connection feeding the given writer queue
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            addr,
            identity: None,
            sender,
        }
    }

    /// Queues a message for the writer task.
    ///
    /// Fails only when the writer task has gone away, which means the
    /// socket is dead.
    pub fn send(&self, message: &Message) -> bool {
        self.sender.send(Outbound::Message(message.clone())).is_ok()
    }

    fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }
}

/// Tracks every live connection and the identities bound to them
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    /// Ordered so broadcasts reach participants in a stable order
    identities: BTreeMap<String, ConnectionId>,
}

impl ConnectionRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a freshly accepted connection.
    pub fn admit(&mut self, connection: Connection) {
        info!("Connection {} accepted from {}", connection.id, connection.addr);
        self.connections.insert(connection.id, connection);
    }

    /// Whether the connection is still being tracked
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    /// Binds `identity` to an admitted connection.
    pub fn add(&mut self, identity: &str, connection_id: ConnectionId) -> Result<(), RegistryError> {
        if self.identities.contains_key(identity) {
            return Err(RegistryError::DuplicateIdentity(identity.to_string()));
        }

        let connection = self
            .connections
            .get_mut(&connection_id)
            .ok_or_else(|| RegistryError::PeerUnreachable(identity.to_string()))?;

        if connection.identity.is_some() {
            return Err(RegistryError::DuplicateIdentity(identity.to_string()));
        }

        connection.identity = Some(identity.to_string());
        self.identities.insert(identity.to_string(), connection_id);
        debug!("Identity {} bound to connection {}", identity, connection_id);
        Ok(())
    }

    /// Unbinds `identity` and forgets its connection. Removing an unknown
    /// identity is a no-op.
    pub fn remove(&mut self, identity: &str) -> Option<ConnectionId> {
        let connection_id = self.identities.remove(identity)?;
        if let Some(connection) = self.connections.remove(&connection_id) {
            connection.close();
        }
        info!("Identity {} removed", identity);
        Some(connection_id)
    }

    /// Forgets a connection whose socket has closed, returning the identity
    /// it was registered as.
    pub fn drop_connection(&mut self, connection_id: ConnectionId) -> Option<String> {
        let connection = self.connections.remove(&connection_id)?;
        info!("Connection {} from {} closed", connection.id, connection.addr);

        let identity = connection.identity?;
        self.identities.remove(&identity);
        Some(identity)
    }

    /// Identity bound to a connection, if it has registered
    pub fn identity_of(&self, connection_id: ConnectionId) -> Option<&str> {
        self.connections
            .get(&connection_id)
            .and_then(|connection| connection.identity.as_deref())
    }

    /// Sends a message to a single registered identity
    ///
    /// Fails with `PeerUnreachable` when the identity is not bound or its
    /// writer task has gone away. The caller treats that as a disconnect.
    pub fn unicast(&self, identity: &str, message: &Message) -> Result<(), RegistryError> {
        let delivered = self
            .identities
            .get(identity)
            .and_then(|id| self.connections.get(id))
            .map(|connection| connection.send(message))
            .unwrap_or(false);

        if delivered {
            Ok(())
        } else {
            Err(RegistryError::PeerUnreachable(identity.to_string()))
        }
    }

    /// Sends to every registered identity and returns those that could not
    /// be reached.
    pub fn broadcast(&self, message: &Message) -> Vec<String> {
        self.identities
            .keys()
            .filter(|identity| self.unicast(identity, message).is_err())
            .cloned()
            .collect()
    }

    /// Sends to every live connection, registered or not. Returns the
    /// number of connections that could not be reached.
    pub fn broadcast_all(&self, message: &Message) -> usize {
        self.connections
            .values()
            .filter(|connection| !connection.send(message))
            .count()
    }

    /// Asks every writer task to shut its socket down and forgets all
    /// connections.
    pub fn close_all(&mut self) {
        for connection in self.connections.values() {
            connection.close();
        }
        self.connections.clear();
        self.identities.clear();
    }

    /// Identities currently bound, in sorted order
    pub fn identities(&self) -> Vec<String> {
        self.identities.keys().cloned().collect()
    }

    /// Returns the number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true when no connections are tracked
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
