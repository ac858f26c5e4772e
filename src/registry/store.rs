//! Session registry implementation
//!
//! The authoritative table of live sessions. Removing a session from the
//! table and tearing it down are one operation, so a session never lingers
//! half-released after it has left the registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::key::ConnectionId;
use crate::protocol::OutboundMessage;
use crate::session::Session;

/// Table of live sessions
///
/// Thread-safe via `RwLock`. Lookups and broadcasts share the read lock;
/// register and unregister take the write lock only for the map update,
/// never while a session is being torn down.
pub struct SessionRegistry {
    /// Live sessions by connection identity
    sessions: RwLock<HashMap<ConnectionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a session
    ///
    /// Returns `false`, leaving the existing entry untouched, if the key is
    /// already registered.
    pub async fn register(&self, key: ConnectionId, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            tracing::warn!(session = %key, "Duplicate session registration rejected");
            return false;
        }
        sessions.insert(key, session);

        tracing::info!(session = %key, sessions = sessions.len(), "Session registered");
        true
    }

    /// Remove a session and tear it down
    ///
    /// Returns `false` if the key was not registered.
    pub async fn unregister(&self, key: ConnectionId) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(&key);
            if removed.is_some() {
                tracing::info!(session = %key, sessions = sessions.len(), "Session unregistered");
            }
            removed
        };

        match removed {
            Some(session) => {
                session.teardown().await;
                true
            }
            None => false,
        }
    }

    /// Find a live session
    pub async fn lookup(&self, key: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&key).cloned()
    }

    /// Identities of every live session, in ascending order
    pub async fn keys(&self) -> Vec<ConnectionId> {
        let mut keys: Vec<_> = self.sessions.read().await.keys().copied().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Send a message to every live session's viewer
    ///
    /// Returns how many viewers it was handed to.
    pub async fn broadcast(&self, message: &OutboundMessage) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|session| session.send(message.clone()))
            .count()
    }

    /// Unregister and tear down every session
    pub async fn drain(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        let count = drained.len();

        for (_, session) in drained {
            session.teardown().await;
        }
        if count > 0 {
            tracing::info!(sessions = count, "Registry drained");
        }
        count
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
