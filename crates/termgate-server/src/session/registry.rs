//! Registry of live SSH sessions, keyed by session id.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::ssh::SshSession;

/// Concurrency-safe map of session id to session. All handlers share one
/// registry behind an `Arc`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SshSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh idle session under `id`, replacing nothing: if the id
    /// is already present the existing session is returned unchanged.
    pub async fn create(&self, id: &str) -> Arc<SshSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(SshSession::new(id.to_string())))
            .clone();
        debug!(session_id = %id, total = sessions.len(), "session registered");
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<SshSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Disconnect and drop the session under `id`. A missing id is a no-op.
    pub async fn remove(&self, id: &str) {
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = removed {
            session.disconnect().await;
            info!(session_id = %id, "session removed");
        }
    }

    /// Disconnect every session, then clear the map. Each session is torn
    /// down independently; one failing teardown never skips the rest.
    pub async fn disconnect_all(&self) {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().collect()
        };
        let count = drained.len();
        for (_, session) in drained {
            session.disconnect().await;
        }
        if count > 0 {
            info!(count, "all sessions disconnected");
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
