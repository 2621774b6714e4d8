use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::PoolError;
use crate::id::ServerId;
use crate::session::MCPSession;
use crate::spec::ServerSpec;

/// Thread-safe map from `ServerId` to `MCPSession`, plus the `auto_started`
/// membership set. `start` reuses an existing session idempotently and
/// resolves concurrent-start races with a double-checked insert, so two
/// concurrent `start(i, spec)` calls create at most one session; `sessions`
/// and `auto_started` are two independently-locked maps rather than one, so
/// Monitor's periodic scan of `auto_started` never has to wait behind an
/// in-flight session spawn.
///
/// `stop` on an id the pool does not hold is a no-op success, per this
/// daemon's idempotence invariant.
pub struct Pool {
    sessions: Mutex<HashMap<ServerId, Arc<MCPSession>>>,
    auto_started: Mutex<HashSet<ServerId>>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            auto_started: Mutex::new(HashSet::new()),
        }
    }

    /// Idempotent start: if `id` is already present, returns the existing
    /// session without touching the child process. Otherwise spawns a new
    /// session (outside any lock, since spawning blocks on a handshake) and
    /// inserts it, re-checking under the lock in case another caller won a
    /// concurrent race — the loser's freshly-spawned session is stopped
    /// rather than leaked.
    pub async fn start(
        &self,
        id: ServerId,
        spec: ServerSpec,
        auto: bool,
    ) -> Result<Arc<MCPSession>, PoolError> {
        if let Some(existing) = self.sessions.lock().await.get(&id) {
            return Ok(existing.clone());
        }

        let session = Arc::new(MCPSession::start(id.clone(), spec).await?);

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&id) {
            let existing = existing.clone();
            drop(sessions);
            session.stop().await;
            return Ok(existing);
        }
        sessions.insert(id.clone(), session.clone());
        drop(sessions);

        if auto {
            self.auto_started.lock().await.insert(id);
        }
        Ok(session)
    }

    /// Removes `id` from both maps, then stops the session. A no-op success
    /// if `id` was not present.
    pub async fn stop(&self, id: &ServerId) {
        let removed = self.sessions.lock().await.remove(id);
        self.auto_started.lock().await.remove(id);
        if let Some(session) = removed {
            session.stop().await;
        }
    }

    pub async fn get(&self, id: &ServerId) -> Option<Arc<MCPSession>> {
        self.sessions.lock().await.get(id).cloned()
    }

    pub async fn list_ids(&self) -> Vec<ServerId> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    pub async fn is_auto_started(&self, id: &ServerId) -> bool {
        self.auto_started.lock().await.contains(id)
    }

    pub async fn auto_started_ids(&self) -> Vec<ServerId> {
        self.auto_started.lock().await.iter().cloned().collect()
    }

    /// Re-asserts `id`'s `auto_started` membership without touching
    /// `sessions`. Used by Monitor when a restart attempt fails: the dead
    /// session has already been removed via `stop`, but the id must stay in
    /// `auto_started` so the next health-check tick retries it.
    pub async fn mark_auto_started(&self, id: ServerId) {
        self.auto_started.lock().await.insert(id);
    }

    /// Snapshots all ids, clears both maps, then stops every session in
    /// parallel. There is nothing to report: `MCPSession`'s own `stop()`
    /// cannot fail observably, it only logs.
    pub async fn stop_all(&self) {
        let to_stop: Vec<Arc<MCPSession>> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        self.auto_started.lock().await.clear();

        let count = to_stop.len();
        join_all(to_stop.iter().map(|s| s.stop())).await;
        warn!(count, "pool stop_all complete");
    }
}
