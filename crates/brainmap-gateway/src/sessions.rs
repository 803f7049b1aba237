//! Connected viewer sessions.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub id: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its id.
    pub fn register(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.insert(
            id.clone(),
            SessionInfo {
                id: id.clone(),
                connected_at: Utc::now(),
            },
        );
        id
    }

    pub fn remove(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.remove(id).map(|(_, info)| info)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.sort_by_key(|s| s.connected_at);
        sessions
    }
}
