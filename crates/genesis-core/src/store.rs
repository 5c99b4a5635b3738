//! Storage traits: context memory and session persistence
//!
//! The kernel is storage-agnostic. Backends (SQLite, in-memory) live in
//! `genesis-memory` and implement these traits. Backend failures never
//! propagate: context retrieval degrades to the sentinel, and the kernel
//! treats a failed session write as a logged error, not a crash.

use crate::session::SessionState;

/// What `retrieve` yields when the store is empty or unavailable. The
/// planner feeds this straight into the directive so the model knows there
/// is no prior context rather than silently getting nothing.
pub const NO_PRIOR_MEMORY: &str = "No prior memory.";

/// Append-only store of text facts with open metadata, queryable by
/// relevance.
pub trait ContextStore: Send + Sync {
    /// Append a record and return its generated id. Duplicate text is
    /// permitted; dedup is the caller's problem if they want it.
    fn save(&self, text: &str, metadata: &serde_json::Value) -> Result<String, String>;

    /// Up to `k` record texts ranked by relevance to `query`. Never fails:
    /// an empty or broken store yields `vec![NO_PRIOR_MEMORY]`. Read-only.
    fn retrieve(&self, query: &str, k: usize) -> Vec<String>;
}

/// Keyed session persistence, last-write-wins. One writer per session id
/// (the kernel serializes calls per key).
pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &str) -> Option<SessionState>;

    fn put(&self, session_id: &str, state: &SessionState) -> Result<(), String>;
}
