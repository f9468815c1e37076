//! Audio fan-out
//!
//! A chunk from the current holder goes to every other authenticated
//! connection as `receive_audio` and to the live mirror. Anything else is
//! dropped without a word. Delivery is at-most-once per destination: no
//! retry, no buffering beyond each connection's outbound queue.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::live::LiveSink;
use crate::outbox::Outbox;
use crate::protocol::ServerEvent;
use crate::session::{ConnectionId, ConnectionRegistry};

/// One inbound chunk, alive only for the duration of its fan-out
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub source: ConnectionId,
    pub data: Bytes,
    pub received_at: DateTime<Utc>,
}

impl AudioChunk {
    pub fn new(source: ConnectionId, data: Bytes) -> Self {
        Self {
            source,
            data,
            received_at: Utc::now(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotAuthenticated,
    NotHolder,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Accepted; `recipients` queues took the chunk
    Delivered { recipients: usize },
    Dropped(DropReason),
}

/// Relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub chunks_relayed: u64,
    pub chunks_dropped: u64,
    pub bytes_relayed: u64,
}

#[derive(Debug, Default)]
pub struct AudioRelay {
    stats: RelayStats,
}

impl AudioRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Fan `chunk` out if its source is authenticated and holds the lock.
    pub fn relay(
        &mut self,
        chunk: AudioChunk,
        holder: Option<ConnectionId>,
        registry: &ConnectionRegistry,
        outbox: &Outbox,
        live: &mut dyn LiveSink,
    ) -> RelayOutcome {
        let verdict = if !registry.contains(&chunk.source) {
            Some(DropReason::NotAuthenticated)
        } else if holder != Some(chunk.source) {
            Some(DropReason::NotHolder)
        } else if chunk.data.is_empty() {
            Some(DropReason::Empty)
        } else {
            None
        };

        if let Some(reason) = verdict {
            self.stats.chunks_dropped += 1;
            tracing::trace!(conn_id = %chunk.source, ?reason, "Audio chunk dropped");
            return RelayOutcome::Dropped(reason);
        }

        let size = chunk.size();
        let event = ServerEvent::ReceiveAudio {
            audio_data: chunk.data.clone(),
            broadcaster_id: chunk.source.to_string(),
            timestamp: chunk.received_at.timestamp_millis(),
            size,
        };
        let recipients = outbox.send_to_each(registry.ids(), Some(&chunk.source), &event);

        // No ordering promise between the fan-out above and this write
        live.push(&chunk.data);

        self.stats.chunks_relayed += 1;
        self.stats.bytes_relayed += size as u64;
        tracing::trace!(conn_id = %chunk.source, size, recipients, "Audio chunk relayed");

        RelayOutcome::Delivered { recipients }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::DisabledSink;
    use crate::session::Connection;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: ConnectionRegistry,
        outbox: Outbox,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: ConnectionRegistry::new(),
                outbox: Outbox::new(),
            }
        }

        fn member(&mut self, name: &str) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
            let (id, rx) = self.guest();
            self.registry.add(Connection::new(id, name)).unwrap();
            (id, rx)
        }

        fn guest(&mut self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
            let id = ConnectionId::new();
            let (tx, rx) = mpsc::channel(8);
            self.outbox.register(id, tx);
            (id, rx)
        }
    }

    #[test]
    fn holder_chunk_reaches_everyone_else() {
        let mut fx = Fixture::new();
        let (a, mut rx_a) = fx.member("Alice");
        let (_b, mut rx_b) = fx.member("Bob");
        let (_c, mut rx_c) = fx.member("Carol");
        let mut relay = AudioRelay::new();

        let outcome = relay.relay(
            AudioChunk::new(a, Bytes::from_static(&[1, 2, 3])),
            Some(a),
            &fx.registry,
            &fx.outbox,
            &mut DisabledSink,
        );

        assert_eq!(outcome, RelayOutcome::Delivered { recipients: 2 });
        assert!(rx_a.try_recv().is_err());
        for rx in [&mut rx_b, &mut rx_c] {
            match rx.try_recv().unwrap() {
                ServerEvent::ReceiveAudio { audio_data, broadcaster_id, size, .. } => {
                    assert_eq!(&audio_data[..], &[1, 2, 3]);
                    assert_eq!(broadcaster_id, a.to_string());
                    assert_eq!(size, 3);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(relay.stats().chunks_relayed, 1);
        assert_eq!(relay.stats().bytes_relayed, 3);
    }

    #[test]
    fn non_holder_chunk_goes_nowhere() {
        let mut fx = Fixture::new();
        let (a, _rx_a) = fx.member("Alice");
        let (b, _rx_b) = fx.member("Bob");
        let (_c, mut rx_c) = fx.member("Carol");
        let mut relay = AudioRelay::new();

        let outcome = relay.relay(
            AudioChunk::new(b, Bytes::from_static(&[7])),
            Some(a),
            &fx.registry,
            &fx.outbox,
            &mut DisabledSink,
        );

        assert_eq!(outcome, RelayOutcome::Dropped(DropReason::NotHolder));
        assert!(rx_c.try_recv().is_err());
        assert_eq!(relay.stats().chunks_dropped, 1);
    }

    #[test]
    fn unauthenticated_and_empty_chunks_are_dropped() {
        let mut fx = Fixture::new();
        let (a, _rx_a) = fx.member("Alice");
        let (guest, _rx_g) = fx.guest();
        let (_b, mut rx_b) = fx.member("Bob");
        let mut relay = AudioRelay::new();

        let from_guest = relay.relay(
            AudioChunk::new(guest, Bytes::from_static(&[1])),
            Some(guest),
            &fx.registry,
            &fx.outbox,
            &mut DisabledSink,
        );
        let empty = relay.relay(
            AudioChunk::new(a, Bytes::new()),
            Some(a),
            &fx.registry,
            &fx.outbox,
            &mut DisabledSink,
        );

        assert_eq!(from_guest, RelayOutcome::Dropped(DropReason::NotAuthenticated));
        assert_eq!(empty, RelayOutcome::Dropped(DropReason::Empty));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn guests_never_hear_audio() {
        let mut fx = Fixture::new();
        let (a, _rx_a) = fx.member("Alice");
        let (_guest, mut rx_g) = fx.guest();
        let mut relay = AudioRelay::new();

        let outcome = relay.relay(
            AudioChunk::new(a, Bytes::from_static(&[1])),
            Some(a),
            &fx.registry,
            &fx.outbox,
            &mut DisabledSink,
        );

        assert_eq!(outcome, RelayOutcome::Delivered { recipients: 0 });
        assert!(rx_g.try_recv().is_err());
    }
}
