//! WebSocket event vocabulary
//!
//! Inbound frames are decoded in two steps: a loose `{event, data}` envelope
//! first, then a fixed schema per event name. Nothing untyped reaches the
//! coordinator.
//!
//! Outbound events serialize as `{"event": "<name>", "data": {...}}` with
//! camelCase fields, matching what the browser client listens for.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Events a client may send
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Authenticate {
        name: Option<String>,
        password: String,
    },
    UserJoin,
    StartBroadcast,
    /// Live chunk while holding the lock
    AudioChunk(Bytes),
    /// Whole-recording fallback; relayed exactly like a chunk
    AudioStream(Bytes),
    EndBroadcast,
    GetStatus,
    Ping,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate { .. } => "authenticate",
            ClientEvent::UserJoin => "user_join",
            ClientEvent::StartBroadcast => "start_broadcast",
            ClientEvent::AudioChunk(_) => "audio_chunk",
            ClientEvent::AudioStream(_) => "audio_stream",
            ClientEvent::EndBroadcast => "end_broadcast",
            ClientEvent::GetStatus => "get_status",
            ClientEvent::Ping => "ping",
        }
    }

    /// Decode a JSON text frame
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        match envelope.event.as_str() {
            "authenticate" => {
                let creds: Credentials = payload(&envelope)?;
                Ok(ClientEvent::Authenticate {
                    name: creds.name,
                    password: creds.password,
                })
            }
            "user_join" => Ok(ClientEvent::UserJoin),
            "start_broadcast" => Ok(ClientEvent::StartBroadcast),
            "audio_chunk" => Ok(ClientEvent::AudioChunk(payload(&envelope)?)),
            "audio_stream" => Ok(ClientEvent::AudioStream(payload(&envelope)?)),
            "end_broadcast" => Ok(ClientEvent::EndBroadcast),
            "get_status" => Ok(ClientEvent::GetStatus),
            "ping" => Ok(ClientEvent::Ping),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    /// A binary frame always carries an audio chunk
    pub fn from_binary(data: impl Into<Bytes>) -> Self {
        ClientEvent::AudioChunk(data.into())
    }
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct Credentials {
    #[serde(default)]
    name: Option<String>,
    password: String,
}

fn payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, ProtocolError> {
    T::deserialize(&envelope.data).map_err(|e| ProtocolError::InvalidPayload {
        event: envelope.event.clone(),
        reason: e.to_string(),
    })
}

/// Events the server sends
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    AuthSuccess { user_id: String, name: String },

    AuthFailed { message: String },

    #[serde(rename_all = "camelCase")]
    ConnectionStatus {
        connected: bool,
        user_id: String,
        total_users: usize,
    },

    UsersCount { count: usize },

    #[serde(rename_all = "camelCase")]
    BroadcastStarted {
        broadcaster_id: String,
        broadcaster_name: String,
        start_time: DateTime<Utc>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        system: bool,
    },

    BroadcastBlocked { message: String },

    BroadcastConfirmed { status: &'static str },

    #[serde(rename_all = "camelCase")]
    BroadcastEnded {
        broadcaster_id: String,
        broadcaster_name: String,
        end_time: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        system: bool,
    },

    BroadcastStopped { status: &'static str },

    #[serde(rename_all = "camelCase")]
    ReceiveAudio {
        audio_data: Bytes,
        broadcaster_id: String,
        /// Milliseconds since the Unix epoch
        timestamp: i64,
        size: usize,
    },

    #[serde(rename_all = "camelCase")]
    ServerStatus {
        connected: bool,
        total_users: usize,
        current_broadcaster: Option<String>,
        user_id: String,
    },

    Pong,

    ActionRejected { action: String, message: String },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
