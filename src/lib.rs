//! # PTT Relay
//!
//! Push-to-talk audio relay: many browser clients connect, log in with a
//! shared secret, and take turns broadcasting. At most one client holds the
//! floor at a time; its audio chunks are fanned out to everyone else and,
//! optionally, mirrored into a rolling HLS stream.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        Browser clients (N)                           │
//! │   WebSocket /ws  (JSON events + binary audio)      HTTP /live, /api  │
//! └────────┬──────────────────────────▲──────────────────────┬───────────┘
//!          │ frames                   │ ServerEvent (JSON)   │
//!          ▼                          │                      ▼
//! ┌─────────────────────┐   ┌─────────┴───────────┐   ┌───────────────────┐
//! │ ui::websocket       │   │ per-connection      │   │ ui::handlers      │
//! │ reader loop         │   │ bounded queue +     │   │ tower-http        │
//! │ protocol::from_text │   │ writer task         │   │ ServeDir          │
//! └────────┬────────────┘   └─────────▲───────────┘   └────────┬──────────┘
//!          │ Command                  │ try_send               │ Status
//!          ▼                          │                        ▼
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                         hub (single task)                             │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      coordinator::Coordinator                     │  │
//! │  │  session::AuthGate   session::ConnectionRegistry                 │  │
//! │  │  session::BroadcastLock  relay::AudioRelay  outbox::Outbox       │  │
//! │  └──────────────────────────────────────┬───────────────────────────┘  │
//! └──────────────▲──────────────────────────┼──────────────────────────────┘
//!                │ KeepAliveTick            │ start / push / stop
//!   ┌────────────┴─────────────┐   ┌────────▼─────────────────────────────┐
//!   │ keepalive::Scheduler     │   │ live::HlsBridge                      │
//!   │ jittered idle heartbeat  │   │ ffmpeg stdin ─► index.m3u8 + .ts     │
//!   └──────────────────────────┘   └──────────────────────────────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod keepalive;
pub mod live;
pub mod outbox;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default HTTP/WebSocket port
    pub const DEFAULT_HTTP_PORT: u16 = 3000;

    /// Playlist file written by the live encoder
    pub const PLAYLIST_NAME: &str = "index.m3u8";

    /// Broadcaster id used by keepalive cycles
    pub const SYSTEM_BROADCASTER_ID: &str = "system";

    pub const SYSTEM_BROADCASTER_NAME: &str = "System";

    /// Upper bound on the keepalive silent payload
    pub const MAX_SILENCE_MS: u64 = 10_000;
}
