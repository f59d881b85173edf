// 🔑 Session Context - who is driving the wizard
//
// Loaded once from a session token at wizard entry and passed to every
// step explicitly.

use crate::db::{self, Session};
use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub token: String,
    pub user_id: String,
    /// Parent's ID number
    pub parent_id: String,
    /// Cached display name
    pub parent_name: String,
}

impl From<Session> for SessionContext {
    fn from(s: Session) -> Self {
        SessionContext {
            token: s.token,
            user_id: s.user_id,
            parent_id: s.parent_id,
            parent_name: s.parent_name,
        }
    }
}

impl SessionContext {
    /// Resolve a bearer token; `Ok(None)` when the token is unknown
    pub fn load(conn: &Connection, token: &str) -> Result<Option<Self>> {
        let token = token.trim().trim_start_matches("Bearer ").trim();
        if token.is_empty() {
            return Ok(None);
        }
        Ok(db::get_session(conn, token)?.map(SessionContext::from))
    }
}

// ============================================================================
// RECENT QUERIES
// ============================================================================

/// Most-recent-first list of assistant questions, without duplicates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecentQueries(Vec<String>);

impl RecentQueries {
    pub const MAX: usize = 15;

    /// Build from stored entries, enforcing order rules and the cap
    pub fn from_stored(stored: Vec<String>) -> Self {
        let mut recent = RecentQueries::default();
        for q in stored.into_iter().rev() {
            recent.push(&q);
        }
        recent
    }

    pub fn push(&mut self, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            return;
        }
        self.0.retain(|q| q != query);
        self.0.insert(0, query.to_string());
        self.0.truncate(Self::MAX);
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::seeded_family;

    #[test]
    fn test_load_session_from_token() {
        let (conn, parent, _) = seeded_family();
        let session = db::create_session(&conn, &parent).unwrap();

        let ctx = SessionContext::load(&conn, &format!("Bearer {}", session.token))
            .unwrap()
            .unwrap();
        assert_eq!(ctx.parent_id, parent.id_number);
        assert_eq!(ctx.parent_name, "Sarah Johnson");

        assert!(SessionContext::load(&conn, "not-a-token").unwrap().is_none());
        assert!(SessionContext::load(&conn, "").unwrap().is_none());
    }

    #[test]
    fn test_recent_queries_newest_first_and_deduplicated() {
        let mut recent = RecentQueries::default();
        recent.push("What do I owe?");
        recent.push("When is my next payment?");
        recent.push("What do I owe?");

        assert_eq!(
            recent.as_slice(),
            &["What do I owe?".to_string(), "When is my next payment?".to_string()]
        );
    }

    #[test]
    fn test_recent_queries_capped() {
        let mut recent = RecentQueries::default();
        for i in 0..20 {
            recent.push(&format!("question {}", i));
        }
        assert_eq!(recent.len(), RecentQueries::MAX);
        assert_eq!(recent.as_slice()[0], "question 19");
        assert_eq!(recent.as_slice()[14], "question 5");
    }

    #[test]
    fn test_from_stored_keeps_order() {
        let stored: Vec<String> = (0..18).map(|i| format!("q{}", i)).collect();
        let recent = RecentQueries::from_stored(stored);
        assert_eq!(recent.len(), 15);
        assert_eq!(recent.as_slice()[0], "q0");
        assert_eq!(recent.as_slice()[14], "q14");
    }
}
