//! Run sessions.
//!
//! A session binds one pipeline run to one context store. The id tags logs
//! and reports; the store is the single source of truth for everything the
//! run has seen or done.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::ContextStore;

/// One pipeline run's identity and its shared context.
pub struct Session {
    /// Unique id for this run.
    pub id: Uuid,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// The append-only event log shared by all stages.
    pub store: ContextStore,
}

impl Session {
    /// Create a fresh session with an empty context store.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            store: ContextStore::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sessions_are_distinct() {
        let a = Session::new();
        let b = Session::new();
        assert_ne!(a.id, b.id);
        assert!(a.store.is_empty());
    }
}
