use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::Mutex;

use crate::session::{Session, SessionId};

/// The set of live sessions.
///
/// Membership is what keeps an idle session alive. Broadcasts never iterate
/// the map itself; they take a [`snapshot`](Registry::snapshot) and release
/// the lock first, so a removal triggered mid-broadcast cannot invalidate the
/// iteration or deadlock on the lock.
#[derive(Clone, Default)]
pub struct Registry {
    sessions: Arc<Mutex<BTreeMap<SessionId, Arc<Session>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `Connecting` session and moves it to `Active`.
    ///
    /// Returns `false` and leaves the registry untouched if the session has
    /// already left `Connecting`.
    pub async fn add(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.lock().await;
        if !session.activate() {
            return false;
        }
        sessions.insert(session.id(), session);
        true
    }

    /// Removes a session. Removing an absent id is a no-op.
    pub async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().await.remove(&id)
    }

    /// Current members in ascending id order.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().await.contains_key(&id)
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
