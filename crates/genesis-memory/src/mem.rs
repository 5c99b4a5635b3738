//! In-memory backends
//!
//! Same contracts as the SQLite backends, no durability. Suitable for tests
//! and ephemeral single-process runs; everything is lost on restart, which
//! is the documented trade-off for that deployment.

use std::collections::HashMap;
use std::sync::Mutex;

use genesis_core::{ContextStore, SessionState, SessionStore, NO_PRIOR_MEMORY};
use uuid::Uuid;

struct Record {
    content: String,
    #[allow(dead_code)]
    metadata: serde_json::Value,
}

/// Volatile append-only context store
#[derive(Default)]
pub struct InMemoryContextStore {
    records: Mutex<Vec<Record>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextStore for InMemoryContextStore {
    fn save(&self, text: &str, metadata: &serde_json::Value) -> Result<String, String> {
        let id = Uuid::new_v4().to_string();
        self.records
            .lock()
            .map_err(|e| e.to_string())?
            .push(Record {
                content: text.to_string(),
                metadata: metadata.clone(),
            });
        Ok(id)
    }

    fn retrieve(&self, query: &str, k: usize) -> Vec<String> {
        let records = match self.records.lock() {
            Ok(records) => records,
            Err(_) => return vec![NO_PRIOR_MEMORY.to_string()],
        };
        // Newest first, then rank like the SQLite backend
        let candidates: Vec<String> = records.iter().rev().map(|r| r.content.clone()).collect();
        drop(records);

        let ranked = crate::sqlite::rank_by_overlap(query, candidates, k);
        if ranked.is_empty() {
            vec![NO_PRIOR_MEMORY.to_string()]
        } else {
            ranked
        }
    }
}

/// Volatile keyed session store
#[derive(Default)]
pub struct InMemorySessionStore {
    states: Mutex<HashMap<String, SessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, session_id: &str) -> Option<SessionState> {
        self.states.lock().ok()?.get(session_id).cloned()
    }

    fn put(&self, session_id: &str, state: &SessionState) -> Result<(), String> {
        self.states
            .lock()
            .map_err(|e| e.to_string())?
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }
}
