//! Registry of authenticated connections
//!
//! Leaf state container: it stores who is logged in and under which display
//! name. Announcing the headcount after a change is the coordinator's job.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::SessionError;

/// Opaque identifier of one transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used for generated display names
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An authenticated connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub name: String,
    pub joined_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(id: ConnectionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            joined_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection. Identifiers are unique.
    pub fn add(&mut self, connection: Connection) -> Result<(), SessionError> {
        if self.connections.contains_key(&connection.id) {
            return Err(SessionError::AlreadyRegistered(connection.id));
        }
        tracing::debug!(conn_id = %connection.id, name = %connection.name, "Connection registered");
        self.connections.insert(connection.id, connection);
        Ok(())
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(id);
        if removed.is_some() {
            tracing::debug!(conn_id = %id, "Connection unregistered");
        }
        removed
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Change the display name of a registered connection
    pub fn rename(&mut self, id: &ConnectionId, name: impl Into<String>) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                conn.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.connections.keys()
    }

    /// Display name for notifications, with the same fallback clients see
    pub fn display_name(&self, id: &ConnectionId) -> String {
        self.get(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "Unknown User".to_string())
    }
}
