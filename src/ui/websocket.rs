//! Client WebSocket session
//!
//! Each socket gets a reader loop that turns frames into hub commands and a
//! writer task that drains the connection's bounded outbound queue.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::ProtocolError;
use crate::hub::HubHandle;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::ConnectionId;
use crate::ui::server::AppState;

/// What one inbound frame means to the hub
#[derive(Debug)]
pub enum Inbound {
    Event(ClientEvent),
    Invalid(ProtocolError),
    Close,
    /// Transport-level ping/pong, answered by the WebSocket layer
    Skip,
}

impl From<Message> for Inbound {
    fn from(frame: Message) -> Self {
        match frame {
            Message::Text(text) => match ClientEvent::from_text(&text) {
                Ok(event) => Inbound::Event(event),
                Err(error) => Inbound::Invalid(error),
            },
            Message::Binary(data) => Inbound::Event(ClientEvent::from_binary(data)),
            Message::Close(_) => Inbound::Close,
            Message::Ping(_) | Message::Pong(_) => Inbound::Skip,
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.outbox_capacity.max(1));

    let id = match state.hub.connect(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Rejecting socket: {}", e);
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(conn_id = %id, "Failed to encode {:?}: {}", event, e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    read_frames(stream, id, &state.hub).await;

    // The hub drops its sender on disconnect, which ends the writer
    let _ = writer.await;
}

/// Feed frames to the hub until the client closes, the transport fails or
/// the hub goes away, then report the disconnect.
pub async fn read_frames<S, E>(mut stream: S, id: ConnectionId, hub: &HubHandle)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(conn_id = %id, "Socket error: {}", e);
                break;
            }
        };

        let sent = match Inbound::from(frame) {
            Inbound::Event(event) => hub.dispatch(id, event).await,
            Inbound::Invalid(error) => hub.malformed(id, error).await,
            Inbound::Close => break,
            Inbound::Skip => Ok(()),
        };

        if sent.is_err() {
            break;
        }
    }

    let _ = hub.disconnect(id).await;
}
