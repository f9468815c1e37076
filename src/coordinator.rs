//! Session and broadcast coordinator
//!
//! One owned object holds every piece of mutable state: the registry of
//! logged-in connections, the broadcaster lock, the relay, the outbound
//! queues and the live mirror. All methods are synchronous and run to
//! completion; the [`hub`](crate::hub) feeds them one event at a time, which
//! is the only ordering guarantee the lock needs.
//!
//! ```text
//!  ClientEvent ──► handle()
//!                    ├─ authenticate ─► AuthGate ─► ConnectionRegistry ─► users_count (all)
//!                    ├─ start/end ────► BroadcastLock ─► LiveSink start/stop
//!                    │                               └─► broadcast_* (others) + reply
//!                    ├─ audio ────────► AudioRelay ─► receive_audio (others) + LiveSink push
//!                    └─ status/ping ──► reply
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::constants::{SYSTEM_BROADCASTER_ID, SYSTEM_BROADCASTER_NAME};
use crate::error::SessionError;
use crate::keepalive::{silent_wav, SILENCE_SAMPLE_RATE};
use crate::live::LiveSink;
use crate::outbox::Outbox;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::relay::{AudioChunk, AudioRelay, RelayOutcome, RelayStats};
use crate::session::auth::Admission;
use crate::session::{Acquire, AuthGate, BroadcastLock, ConnectionId, ConnectionRegistry};

/// Reason attached to `broadcast_ended` when the holder's transport drops
pub const REASON_DISCONNECTED: &str = "disconnected";

/// Point-in-time view for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub connections: usize,
    pub authenticated_users: usize,
    pub current_broadcaster: Option<String>,
    pub broadcaster_name: Option<String>,
    pub broadcast_started_at: Option<DateTime<Utc>>,
    pub live_stream_running: bool,
    pub relay: RelayStats,
}

pub struct Coordinator {
    auth: AuthGate,
    registry: ConnectionRegistry,
    lock: BroadcastLock,
    relay: AudioRelay,
    outbox: Outbox,
    live: Box<dyn LiveSink>,
    report_rejections: bool,
    silence: Bytes,
    keepalive_pending: bool,
}

impl Coordinator {
    pub fn new(config: &AppConfig, live: Box<dyn LiveSink>) -> Self {
        Self {
            auth: AuthGate::new(config.auth.passwords.iter().cloned(), config.session.max_name_len),
            registry: ConnectionRegistry::new(),
            lock: BroadcastLock::new(),
            relay: AudioRelay::new(),
            outbox: Outbox::new(),
            live,
            report_rejections: config.session.report_rejections,
            silence: silent_wav(
                Duration::from_millis(config.keepalive.silence_ms),
                SILENCE_SAMPLE_RATE,
            ),
            keepalive_pending: false,
        }
    }

    /// A transport session opened. It can talk to us but is not logged in.
    pub fn connect(&mut self, id: ConnectionId, tx: mpsc::Sender<ServerEvent>) {
        self.outbox.register(id, tx);
        tracing::info!(conn_id = %id, "Client connected");
    }

    /// Dispatch one inbound event
    pub fn handle(&mut self, id: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::Authenticate { name, password } => {
                self.authenticate(id, name.as_deref(), &password)
            }
            ClientEvent::UserJoin => self.user_join(id),
            ClientEvent::StartBroadcast => self.request_start(id),
            ClientEvent::AudioChunk(data) | ClientEvent::AudioStream(data) => {
                self.relay_chunk(id, data);
            }
            ClientEvent::EndBroadcast => self.request_end(id),
            ClientEvent::GetStatus => self.send_status(id),
            ClientEvent::Ping => {
                self.outbox.send_to(&id, ServerEvent::Pong);
            }
        }
    }

    pub fn authenticate(&mut self, id: ConnectionId, name: Option<&str>, secret: &str) {
        match self.auth.authenticate(&mut self.registry, id, name, secret) {
            Ok(admission) => {
                let name = self.registry.display_name(&id);
                tracing::info!(conn_id = %id, name = %name, "Authenticated");
                self.outbox.send_to(
                    &id,
                    ServerEvent::AuthSuccess {
                        user_id: id.to_string(),
                        name,
                    },
                );
                if admission == Admission::Admitted {
                    self.broadcast_users_count();
                }
            }
            Err(e) => {
                tracing::warn!(conn_id = %id, name = name.unwrap_or(""), "Authentication failed");
                self.outbox.send_to(
                    &id,
                    ServerEvent::AuthFailed {
                        message: e.to_string(),
                    },
                );
            }
        }
    }

    pub fn user_join(&mut self, id: ConnectionId) {
        if !self.registry.contains(&id) {
            self.reject(id, "user_join", SessionError::NotAuthenticated);
            return;
        }
        self.outbox.send_to(
            &id,
            ServerEvent::ConnectionStatus {
                connected: true,
                user_id: id.to_string(),
                total_users: self.registry.count(),
            },
        );
        self.broadcast_users_count();
    }

    pub fn request_start(&mut self, id: ConnectionId) {
        if !self.registry.contains(&id) {
            self.reject(id, "start_broadcast", SessionError::NotAuthenticated);
            return;
        }

        match self.lock.acquire(id, Utc::now()) {
            Acquire::Granted => {
                let name = self.registry.display_name(&id);
                let started_at = self
                    .lock
                    .session()
                    .map(|s| s.started_at)
                    .unwrap_or_else(Utc::now);
                tracing::info!(conn_id = %id, name = %name, "Broadcast started");

                // Close an open system cycle first so its delayed end cannot
                // land after the real start
                self.finish_keepalive();
                self.live.start();
                self.notify_others(
                    &id,
                    ServerEvent::BroadcastStarted {
                        broadcaster_id: id.to_string(),
                        broadcaster_name: name,
                        start_time: started_at,
                        system: false,
                    },
                );
                self.confirm_start(id);
            }
            Acquire::AlreadyHeld => self.confirm_start(id),
            Acquire::Blocked { holder } => {
                tracing::debug!(conn_id = %id, holder = %holder, "Broadcast blocked");
                self.outbox.send_to(
                    &id,
                    ServerEvent::BroadcastBlocked {
                        message: SessionError::Blocked { holder }.to_string(),
                    },
                );
            }
        }
    }

    pub fn request_end(&mut self, id: ConnectionId) {
        if !self.registry.contains(&id) {
            self.reject(id, "end_broadcast", SessionError::NotAuthenticated);
            return;
        }
        if !self.end_session(id, None) {
            self.reject_message(id, "end_broadcast", "You are not broadcasting");
            return;
        }
        self.outbox
            .send_to(&id, ServerEvent::BroadcastStopped { status: "stopped" });
    }

    pub fn relay_chunk(&mut self, id: ConnectionId, data: Bytes) -> RelayOutcome {
        self.relay.relay(
            AudioChunk::new(id, data),
            self.lock.holder(),
            &self.registry,
            &self.outbox,
            self.live.as_mut(),
        )
    }

    /// Transport closed. A holder loses the lock in this same step.
    pub fn disconnect(&mut self, id: ConnectionId) {
        self.end_session(id, Some(REASON_DISCONNECTED));

        if let Some(conn) = self.registry.remove(&id) {
            tracing::info!(conn_id = %id, name = %conn.name, "User left");
            self.broadcast_users_count();
        }
        self.outbox.unregister(&id);
        tracing::info!(conn_id = %id, "Client disconnected");
    }

    /// Release the lock if `id` holds it, stop the mirror and tell everyone else.
    fn end_session(&mut self, id: ConnectionId, reason: Option<&str>) -> bool {
        let Some(session) = self.lock.release(&id) else {
            return false;
        };
        self.live.stop();

        let name = self.registry.display_name(&id);
        tracing::info!(
            conn_id = %id,
            name = %name,
            reason = reason.unwrap_or("stopped"),
            duration_secs = (Utc::now() - session.started_at).num_seconds(),
            "Broadcast ended"
        );
        self.notify_others(
            &id,
            ServerEvent::BroadcastEnded {
                broadcaster_id: id.to_string(),
                broadcaster_name: name,
                end_time: Utc::now(),
                reason: reason.map(String::from),
                system: false,
            },
        );
        true
    }

    pub fn send_status(&self, id: ConnectionId) {
        self.outbox.send_to(
            &id,
            ServerEvent::ServerStatus {
                connected: true,
                total_users: self.registry.count(),
                current_broadcaster: self.lock.holder().map(|h| h.to_string()),
                user_id: id.to_string(),
            },
        );
    }

    /// Open a synthetic broadcast cycle if the system is idle and somebody is listening.
    ///
    /// Returns whether a cycle started; the caller schedules
    /// [`finish_keepalive`](Self::finish_keepalive).
    pub fn begin_keepalive(&mut self) -> bool {
        if !self.lock.is_idle() || self.registry.is_empty() || self.keepalive_pending {
            tracing::trace!(
                idle = self.lock.is_idle(),
                users = self.registry.count(),
                "Keepalive skipped"
            );
            return false;
        }

        let now = Utc::now();
        self.notify_all(ServerEvent::BroadcastStarted {
            broadcaster_id: SYSTEM_BROADCASTER_ID.into(),
            broadcaster_name: SYSTEM_BROADCASTER_NAME.into(),
            start_time: now,
            system: true,
        });
        self.notify_all(ServerEvent::ReceiveAudio {
            audio_data: self.silence.clone(),
            broadcaster_id: SYSTEM_BROADCASTER_ID.into(),
            timestamp: now.timestamp_millis(),
            size: self.silence.len(),
        });
        self.keepalive_pending = true;
        tracing::debug!(users = self.registry.count(), "Keepalive cycle started");
        true
    }

    pub fn finish_keepalive(&mut self) {
        if !std::mem::take(&mut self.keepalive_pending) {
            return;
        }
        self.notify_all(ServerEvent::BroadcastEnded {
            broadcaster_id: SYSTEM_BROADCASTER_ID.into(),
            broadcaster_name: SYSTEM_BROADCASTER_NAME.into(),
            end_time: Utc::now(),
            reason: None,
            system: true,
        });
        tracing::debug!("Keepalive cycle finished");
    }

    /// Stop the live mirror; used on process shutdown
    pub fn shutdown(&mut self) {
        if let Some(holder) = self.lock.holder() {
            tracing::info!(holder = %holder, "Shutting down during a broadcast");
        }
        self.live.stop();
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let session = self.lock.session();
        StatusSnapshot {
            connections: self.outbox.len(),
            authenticated_users: self.registry.count(),
            current_broadcaster: session.map(|s| s.holder.to_string()),
            broadcaster_name: session.map(|s| self.registry.display_name(&s.holder)),
            broadcast_started_at: session.map(|s| s.started_at),
            live_stream_running: self.live.is_running(),
            relay: self.relay.stats(),
        }
    }

    pub fn holder(&self) -> Option<ConnectionId> {
        self.lock.holder()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Answer a frame that failed validation (only when rejections are reported)
    pub fn reject_invalid(&self, id: ConnectionId, reason: &str) {
        self.reject_message(id, "invalid", reason);
    }

    fn confirm_start(&self, id: ConnectionId) {
        self.outbox
            .send_to(&id, ServerEvent::BroadcastConfirmed { status: "broadcasting" });
    }

    fn broadcast_users_count(&self) {
        self.notify_all(ServerEvent::UsersCount {
            count: self.registry.count(),
        });
    }

    fn notify_all(&self, event: ServerEvent) {
        self.outbox.send_to_each(self.registry.ids(), None, &event);
    }

    fn notify_others(&self, except: &ConnectionId, event: ServerEvent) {
        self.outbox
            .send_to_each(self.registry.ids(), Some(except), &event);
    }

    fn reject(&self, id: ConnectionId, action: &str, error: SessionError) {
        self.reject_message(id, action, &error.to_string());
    }

    fn reject_message(&self, id: ConnectionId, action: &str, message: &str) {
        tracing::debug!(conn_id = %id, action, message, "Action ignored");
        if self.report_rejections {
            self.outbox.send_to(
                &id,
                ServerEvent::ActionRejected {
                    action: action.to_string(),
                    message: message.to_string(),
                },
            );
        }
    }
}
