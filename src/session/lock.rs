//! The exclusive broadcaster lock
//!
//! Two states, `Idle` and `Broadcasting`, with the holder carried inside the
//! `Broadcasting` state so "broadcasting without a holder" cannot be built.

use chrono::{DateTime, Utc};

use crate::session::registry::ConnectionId;

/// The currently held transmit right
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSession {
    pub holder: ConnectionId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum LockState {
    #[default]
    Idle,
    Broadcasting(BroadcastSession),
}

/// Outcome of a start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    /// Lock was free and now belongs to the requester
    Granted,
    /// Requester already holds it
    AlreadyHeld,
    /// Someone else holds it; nothing changed
    Blocked { holder: ConnectionId },
}

#[derive(Debug, Default)]
pub struct BroadcastLock {
    state: LockState,
}

impl BroadcastLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, id: ConnectionId, now: DateTime<Utc>) -> Acquire {
        match &self.state {
            LockState::Idle => {
                self.state = LockState::Broadcasting(BroadcastSession {
                    holder: id,
                    started_at: now,
                });
                Acquire::Granted
            }
            LockState::Broadcasting(session) if session.holder == id => Acquire::AlreadyHeld,
            LockState::Broadcasting(session) => Acquire::Blocked {
                holder: session.holder,
            },
        }
    }

    /// Release the lock if `id` holds it. Any other caller is a no-op.
    pub fn release(&mut self, id: &ConnectionId) -> Option<BroadcastSession> {
        if !self.is_held_by(id) {
            return None;
        }
        match std::mem::take(&mut self.state) {
            LockState::Broadcasting(session) => Some(session),
            LockState::Idle => None,
        }
    }

    pub fn holder(&self) -> Option<ConnectionId> {
        self.session().map(|s| s.holder)
    }

    pub fn session(&self) -> Option<&BroadcastSession> {
        match &self.state {
            LockState::Broadcasting(session) => Some(session),
            LockState::Idle => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, LockState::Idle)
    }

    pub fn is_held_by(&self, id: &ConnectionId) -> bool {
        self.holder().as_ref() == Some(id)
    }
}
