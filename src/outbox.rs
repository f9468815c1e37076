//! Per-connection outbound queues
//!
//! Every transport session gets a bounded queue drained by its WebSocket
//! writer. Delivery is `try_send`: a full or closed queue loses the message
//! for that destination only, and the caller never waits.

use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::protocol::ServerEvent;
use crate::session::ConnectionId;

/// Handle on one connection's outbound queue
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<ServerEvent>,
}

impl ClientSender {
    /// Queue without blocking. Returns `false` if the message was dropped.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(conn_id = %self.id, "Outbound queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!(conn_id = %self.id, "Outbound queue closed");
                false
            }
        }
    }
}

/// All transport sessions, authenticated or not
#[derive(Debug, Default)]
pub struct Outbox {
    clients: HashMap<ConnectionId, ClientSender>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ConnectionId, tx: mpsc::Sender<ServerEvent>) {
        self.clients.insert(id, ClientSender { id, tx });
    }

    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn send_to(&self, id: &ConnectionId, event: ServerEvent) -> bool {
        match self.clients.get(id) {
            Some(sender) => sender.deliver(event),
            None => false,
        }
    }

    /// Send to every id in `recipients` except `skip`.
    /// Returns how many queues accepted the message.
    pub fn send_to_each<'a, I>(
        &self,
        recipients: I,
        skip: Option<&ConnectionId>,
        event: &ServerEvent,
    ) -> usize
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        recipients
            .into_iter()
            .filter(|id| Some(*id) != skip)
            .filter(|id| self.send_to(id, event.clone()))
            .count()
    }
}
