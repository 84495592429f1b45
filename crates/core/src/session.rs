//! Session tracking: goals and activity per conversation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Identifier of a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct SessionState {
    goal: Option<String>,
    last_activity: DateTime<Utc>,
}

/// Known sessions, their stated goals and last activity.
///
/// Passed explicitly to the components that need it; there is no global
/// session table.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity for a session, creating it if needed.
    pub async fn touch(&self, session_id: &SessionId, at: DateTime<Utc>) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.clone())
            .and_modify(|s| s.last_activity = s.last_activity.max(at))
            .or_insert(SessionState {
                goal: None,
                last_activity: at,
            });
    }

    /// Set the stated objective for a session.
    pub async fn set_goal(&self, session_id: &SessionId, goal: impl Into<String>) {
        let goal = goal.into();
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        sessions
            .entry(session_id.clone())
            .and_modify(|s| s.goal = Some(goal.clone()))
            .or_insert(SessionState {
                goal: Some(goal),
                last_activity: now,
            });
    }

    pub async fn goal(&self, session_id: &SessionId) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .and_then(|s| s.goal.clone())
    }

    /// Sessions with activity inside `window` before `now`.
    pub async fn active_sessions(&self, now: DateTime<Utc>, window: Duration) -> Vec<SessionId> {
        let sessions = self.sessions.read().await;
        let mut active: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, s)| now - s.last_activity <= window)
            .map(|(id, _)| id.clone())
            .collect();
        active.sort();
        active
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
