//! Shared-secret login gate

use std::collections::HashSet;

use crate::error::SessionError;
use crate::session::registry::{Connection, ConnectionId, ConnectionRegistry};

/// Validates presented secrets against a static allow-set.
///
/// No lockout and no rate limiting: a connection may retry as often as it likes.
#[derive(Debug, Clone)]
pub struct AuthGate {
    secrets: HashSet<String>,
    max_name_len: usize,
}

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// First login on this connection; it is now in the registry
    Admitted,
    /// Already logged in; only the display name was refreshed
    Renamed,
}

impl AuthGate {
    pub fn new<I, S>(secrets: I, max_name_len: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            secrets: secrets
                .into_iter()
                .map(Into::into)
                .filter(|s| !s.is_empty())
                .collect(),
            max_name_len: max_name_len.max(1),
        }
    }

    fn verify(&self, secret: &str) -> bool {
        self.secrets.contains(secret)
    }

    /// Check `secret` and admit `id` into the registry under `name`.
    ///
    /// Any display name is accepted, duplicates included. A missing or
    /// blank name becomes `user-<short id>`.
    pub fn authenticate(
        &self,
        registry: &mut ConnectionRegistry,
        id: ConnectionId,
        name: Option<&str>,
        secret: &str,
    ) -> Result<Admission, SessionError> {
        if !self.verify(secret) {
            return Err(SessionError::AuthFailed);
        }

        let name = self.display_name(id, name);
        if registry.rename(&id, name.clone()) {
            return Ok(Admission::Renamed);
        }
        registry.add(Connection::new(id, name))?;
        Ok(Admission::Admitted)
    }

    fn display_name(&self, id: ConnectionId, requested: Option<&str>) -> String {
        match requested.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.chars().take(self.max_name_len).collect(),
            None => format!("user-{}", id.short()),
        }
    }
}
