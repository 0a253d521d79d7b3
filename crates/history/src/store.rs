//! In-memory session store.
//!
//! Sessions are owned exclusively by their id; callers clone a session
//! out, mutate it through a turn, and save it back. The cache is bounded
//! by capacity, not by age; sessions are never expired automatically.

use lru::LruCache;
use queryflow_common::{Session, SessionId};
use std::num::NonZeroUsize;
use tokio::sync::Mutex;
use tracing::debug;

pub struct SessionStore {
    sessions: Mutex<LruCache<SessionId, Session>>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch the session for `id`, or create a fresh one when the id is
    /// unknown or absent.
    pub async fn get_or_create(&self, id: Option<SessionId>) -> Session {
        let mut sessions = self.sessions.lock().await;
        match id {
            Some(id) => match sessions.get(&id) {
                Some(session) => session.clone(),
                None => {
                    debug!("Creating session {}", id);
                    let session = Session::new(id.clone());
                    sessions.put(id, session.clone());
                    session
                }
            },
            None => {
                let session = Session::new(SessionId::new());
                debug!("Creating session {}", session.id);
                sessions.put(session.id.clone(), session.clone());
                session
            }
        }
    }

    pub async fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.lock().await.get(id).cloned()
    }

    pub async fn save(&self, session: Session) {
        self.sessions.lock().await.put(session.id.clone(), session);
    }

    /// Drop the pending plan for `id`, the terminal effect of a rejected
    /// review.
    pub async fn clear_plan(&self, id: &SessionId) {
        if let Some(session) = self.sessions.lock().await.get_mut(id) {
            session.current_plan = None;
        }
    }
}
