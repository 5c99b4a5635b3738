//! SQLite backends for context memory and session persistence
//!
//! Direct rusqlite behind a mutex. WAL mode so independent sessions can
//! read while one writes. Schemas are created on open; a missing database
//! file is not an error.

use std::path::PathBuf;
use std::sync::Mutex;

use genesis_core::{ContextStore, SessionState, SessionStore, NO_PRIOR_MEMORY};
use rusqlite::{params, Connection};
use uuid::Uuid;

/// Rows scanned per retrieval before ranking. Retrieval is token-overlap
/// scoring in process, so the candidate window is bounded.
const CANDIDATE_WINDOW: usize = 256;

fn open_connection(path: &PathBuf) -> Result<Connection, String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create data dir: {}", e))?;
    }
    let conn =
        Connection::open(path).map_err(|e| format!("failed to open database: {}", e))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| format!("failed to set pragmas: {}", e))?;
    Ok(conn)
}

/// One stored memory, as surfaced by [`SqliteContextStore::list_recent`]
#[derive(Debug, Clone)]
pub struct MemoryRow {
    pub content: String,
    pub metadata: String,
    pub created_at: String,
}

/// Append-only memory of text facts, ranked at query time by word overlap.
///
/// No deletion path: records are only ever inserted or read.
pub struct SqliteContextStore {
    conn: Mutex<Connection>,
}

impl SqliteContextStore {
    /// Open or create the memory database
    pub fn open(path: PathBuf) -> Result<Self, String> {
        let conn = open_connection(&path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at DESC);",
        )
        .map_err(|e| format!("failed to create memories table: {}", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open using the default path (~/.genesis/memory.db)
    pub fn open_default() -> Result<Self, String> {
        let path = dirs::home_dir()
            .ok_or_else(|| "no home directory".to_string())?
            .join(".genesis")
            .join("memory.db");
        Self::open(path)
    }

    /// Recent records for inspection (`genesis memory list`)
    pub fn list_recent(&self, limit: usize) -> Result<Vec<MemoryRow>, String> {
        let conn = self.conn.lock().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare(
                "SELECT content, metadata, created_at FROM memories
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(MemoryRow {
                    content: row.get(0)?,
                    metadata: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .map_err(|e| e.to_string())?;
        Ok(rows.flatten().collect())
    }

    fn recent_contents(&self) -> Result<Vec<String>, String> {
        let conn = self.conn.lock().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare("SELECT content FROM memories ORDER BY created_at DESC, rowid DESC LIMIT ?1")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![CANDIDATE_WINDOW as i64], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;
        Ok(rows.flatten().collect())
    }
}

impl ContextStore for SqliteContextStore {
    fn save(&self, text: &str, metadata: &serde_json::Value) -> Result<String, String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO memories (id, content, metadata) VALUES (?1, ?2, ?3)",
            params![id, text, metadata.to_string()],
        )
        .map_err(|e| format!("failed to store memory: {}", e))?;
        Ok(id)
    }

    fn retrieve(&self, query: &str, k: usize) -> Vec<String> {
        let candidates = match self.recent_contents() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "context retrieval degraded to sentinel");
                return vec![NO_PRIOR_MEMORY.to_string()];
            }
        };

        let ranked = rank_by_overlap(query, candidates, k);
        if ranked.is_empty() {
            vec![NO_PRIOR_MEMORY.to_string()]
        } else {
            ranked
        }
    }
}

/// Score candidates by shared lowercase words with the query; ties keep
/// recency order (candidates arrive newest first). Zero-overlap rows are
/// dropped unless nothing overlaps at all, in which case the newest rows
/// stand in as generic context.
pub(crate) fn rank_by_overlap(query: &str, candidates: Vec<String>, k: usize) -> Vec<String> {
    let query_words: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect();

    let mut scored: Vec<(usize, String)> = candidates
        .iter()
        .map(|c| {
            let lowered = c.to_lowercase();
            let score = query_words.iter().filter(|w| lowered.contains(*w)).count();
            (score, c.clone())
        })
        .collect();

    if scored.iter().all(|(score, _)| *score == 0) {
        return candidates.into_iter().take(k).collect();
    }

    scored.retain(|(score, _)| *score > 0);
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(k).map(|(_, c)| c).collect()
}

/// Keyed session persistence, last-write-wins
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    pub fn open(path: PathBuf) -> Result<Self, String> {
        let conn = open_connection(&path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .map_err(|e| format!("failed to create sessions table: {}", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open using the default path (~/.genesis/sessions.db)
    pub fn open_default() -> Result<Self, String> {
        let path = dirs::home_dir()
            .ok_or_else(|| "no home directory".to_string())?
            .join(".genesis")
            .join("sessions.db");
        Self::open(path)
    }
}

impl SessionStore for SqliteSessionStore {
    fn get(&self, session_id: &str) -> Option<SessionState> {
        let conn = self.conn.lock().ok()?;
        let json: String = conn
            .query_row(
                "SELECT state FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .ok()?;
        match serde_json::from_str(&json) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::error!(session_id, error = %e, "corrupt session state, starting fresh");
                None
            }
        }
    }

    fn put(&self, session_id: &str, state: &SessionState) -> Result<(), String> {
        let json = serde_json::to_string(state).map_err(|e| e.to_string())?;
        let conn = self.conn.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (session_id, state, updated_at)
             VALUES (?1, ?2, datetime('now'))",
            params![session_id, json],
        )
        .map_err(|e| format!("failed to persist session: {}", e))?;
        Ok(())
    }
}
