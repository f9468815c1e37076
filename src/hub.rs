//! Hub task
//!
//! Owns the [`Coordinator`] and drains a single bounded mailbox. WebSocket
//! readers, the HTTP layer and the keepalive timer all hold a cheap
//! [`HubHandle`]; nothing else can touch session state.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::coordinator::{Coordinator, StatusSnapshot};
use crate::error::{ProtocolError, Result, SessionError};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::ConnectionId;

/// Mailbox message
#[derive(Debug)]
pub enum Command {
    Connect {
        id: ConnectionId,
        outbox: mpsc::Sender<ServerEvent>,
    },
    Event {
        id: ConnectionId,
        event: ClientEvent,
    },
    Malformed {
        id: ConnectionId,
        error: ProtocolError,
    },
    Disconnect {
        id: ConnectionId,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    KeepAliveTick,
    KeepAliveEnd,
    Shutdown,
}

/// Cloneable sender side of the hub mailbox
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
}

impl HubHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SessionError::HubClosed.into())
    }

    /// Register a new transport session and return its id
    pub async fn connect(&self, outbox: mpsc::Sender<ServerEvent>) -> Result<ConnectionId> {
        let id = ConnectionId::new();
        self.send(Command::Connect { id, outbox }).await?;
        Ok(id)
    }

    pub async fn dispatch(&self, id: ConnectionId, event: ClientEvent) -> Result<()> {
        self.send(Command::Event { id, event }).await
    }

    pub async fn malformed(&self, id: ConnectionId, error: ProtocolError) -> Result<()> {
        self.send(Command::Malformed { id, error }).await
    }

    pub async fn disconnect(&self, id: ConnectionId) -> Result<()> {
        self.send(Command::Disconnect { id }).await
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        rx.await.map_err(|_| SessionError::HubClosed.into())
    }

    pub async fn keepalive_tick(&self) -> Result<()> {
        self.send(Command::KeepAliveTick).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

pub struct Hub {
    coordinator: Coordinator,
    rx: mpsc::Receiver<Command>,
    weak: mpsc::WeakSender<Command>,
    end_delay: Duration,
}

impl Hub {
    /// Start the hub task.
    ///
    /// The task exits on [`Command::Shutdown`] or once every handle is gone;
    /// either way the live mirror is stopped on the way out.
    pub fn spawn(
        coordinator: Coordinator,
        mailbox_capacity: usize,
        end_delay: Duration,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let hub = Hub {
            coordinator,
            rx,
            weak: tx.downgrade(),
            end_delay,
        };
        let task = tokio::spawn(hub.run());
        (HubHandle { tx }, task)
    }

    async fn run(mut self) {
        tracing::info!("Hub started");

        while let Some(command) = self.rx.recv().await {
            if !self.apply(command) {
                break;
            }
        }

        self.coordinator.shutdown();
        tracing::info!("Hub stopped");
    }

    /// Returns false when the hub should stop
    fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { id, outbox } => self.coordinator.connect(id, outbox),
            Command::Event { id, event } => {
                tracing::trace!(conn_id = %id, event = event.name(), "Event");
                self.coordinator.handle(id, event);
            }
            Command::Malformed { id, error } => {
                tracing::warn!(conn_id = %id, error = %error, "Invalid frame");
                self.coordinator.reject_invalid(id, &error.to_string());
            }
            Command::Disconnect { id } => self.coordinator.disconnect(id),
            Command::Status { reply } => {
                let _ = reply.send(self.coordinator.snapshot());
            }
            Command::KeepAliveTick => {
                if self.coordinator.begin_keepalive() {
                    self.schedule_keepalive_end();
                }
            }
            Command::KeepAliveEnd => self.coordinator.finish_keepalive(),
            Command::Shutdown => {
                tracing::info!("Hub shutdown requested");
                return false;
            }
        }
        true
    }

    fn schedule_keepalive_end(&self) {
        let weak = self.weak.clone();
        let delay = self.end_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Command::KeepAliveEnd).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, KeepAliveConfig};
    use crate::constants::SYSTEM_BROADCASTER_ID;
    use crate::keepalive::KeepAliveScheduler;
    use crate::live::DisabledSink;
    use tokio::time::Instant;

    const END_DELAY: Duration = Duration::from_millis(700);

    fn start_hub() -> (HubHandle, JoinHandle<()>) {
        let coordinator = Coordinator::new(&AppConfig::default(), Box::new(DisabledSink));
        Hub::spawn(coordinator, 64, END_DELAY)
    }

    async fn login(hub: &HubHandle, name: &str) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let id = hub.connect(tx).await.unwrap();
        hub.dispatch(
            id,
            ClientEvent::Authenticate {
                name: Some(name.into()),
                password: "password123".into(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(rx.recv().await, Some(ServerEvent::AuthSuccess { .. })));
        (id, rx)
    }

    async fn next_non_count(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        loop {
            match rx.recv().await.expect("queue closed") {
                ServerEvent::UsersCount { .. } => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn concurrent_starts_grant_exactly_one() {
        let (hub, _task) = start_hub();
        let (a, mut rx_a) = login(&hub, "Alice").await;
        let (b, mut rx_b) = login(&hub, "Bob").await;

        let (ra, rb) = tokio::join!(
            hub.dispatch(a, ClientEvent::StartBroadcast),
            hub.dispatch(b, ClientEvent::StartBroadcast),
        );
        ra.unwrap();
        rb.unwrap();

        let ea = next_non_count(&mut rx_a).await;
        let eb = next_non_count(&mut rx_b).await;
        let confirmed = [&ea, &eb]
            .iter()
            .filter(|e| matches!(e, ServerEvent::BroadcastConfirmed { .. }))
            .count();
        assert_eq!(confirmed, 1, "{ea:?} / {eb:?}");

        let status = hub.status().await.unwrap();
        assert!(status.current_broadcaster.is_some());
    }

    #[tokio::test]
    async fn malformed_frames_do_not_disturb_state() {
        let (hub, _task) = start_hub();
        let (a, mut rx_a) = login(&hub, "Alice").await;

        hub.malformed(a, ProtocolError::UnknownEvent("dance".into()))
            .await
            .unwrap();
        hub.dispatch(a, ClientEvent::Ping).await.unwrap();

        assert_eq!(next_non_count(&mut rx_a).await, ServerEvent::Pong);
        assert_eq!(hub.status().await.unwrap().authenticated_users, 1);
    }

    #[tokio::test]
    async fn disconnect_updates_status() {
        let (hub, _task) = start_hub();
        let (a, _rx_a) = login(&hub, "Alice").await;
        let (_b, _rx_b) = login(&hub, "Bob").await;
        hub.dispatch(a, ClientEvent::StartBroadcast).await.unwrap();

        hub.disconnect(a).await.unwrap();

        let status = hub.status().await.unwrap();
        assert_eq!(status.authenticated_users, 1);
        assert_eq!(status.connections, 1);
        assert!(status.current_broadcaster.is_none());
    }

    #[tokio::test]
    async fn shutdown_closes_mailbox() {
        let (hub, task) = start_hub();
        hub.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(hub.status().await.is_err());
        assert!(hub.keepalive_tick().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_end_follows_after_delay() {
        let (hub, _task) = start_hub();
        let (_a, mut rx_a) = login(&hub, "Alice").await;

        hub.keepalive_tick().await.unwrap();
        let began = Instant::now();

        assert!(matches!(
            next_non_count(&mut rx_a).await,
            ServerEvent::BroadcastStarted { system: true, .. }
        ));
        assert!(matches!(
            next_non_count(&mut rx_a).await,
            ServerEvent::ReceiveAudio { .. }
        ));
        match next_non_count(&mut rx_a).await {
            ServerEvent::BroadcastEnded { broadcaster_id, system: true, .. } => {
                assert_eq!(broadcaster_id, SYSTEM_BROADCASTER_ID);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(began.elapsed() >= END_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_heartbeat_then_real_broadcast() {
        let (hub, _task) = start_hub();
        let (a, mut rx_a) = login(&hub, "Alice").await;
        let (_b, mut rx_b) = login(&hub, "Bob").await;

        let config = KeepAliveConfig {
            interval_secs: 60,
            jitter_secs: 5,
            ..KeepAliveConfig::default()
        };
        let _timer = KeepAliveScheduler::new(config).spawn(hub.clone());
        let began = Instant::now();

        let first = next_non_count(&mut rx_b).await;
        assert!(matches!(first, ServerEvent::BroadcastStarted { system: true, .. }));
        assert!(began.elapsed() >= Duration::from_secs(55));
        assert!(began.elapsed() <= Duration::from_secs(65));
        assert!(matches!(next_non_count(&mut rx_b).await, ServerEvent::ReceiveAudio { .. }));
        assert!(matches!(
            next_non_count(&mut rx_b).await,
            ServerEvent::BroadcastEnded { system: true, .. }
        ));

        // Drain Alice's copy of the cycle
        for _ in 0..3 {
            next_non_count(&mut rx_a).await;
        }

        hub.dispatch(a, ClientEvent::StartBroadcast).await.unwrap();
        assert_eq!(
            next_non_count(&mut rx_a).await,
            ServerEvent::BroadcastConfirmed { status: "broadcasting" }
        );
    }
}
