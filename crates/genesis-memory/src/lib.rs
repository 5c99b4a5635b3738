//! Genesis Memory - storage backends for the kernel
//!
//! Implements `genesis-core`'s [`ContextStore`](genesis_core::ContextStore)
//! and [`SessionStore`](genesis_core::SessionStore) traits: durable SQLite
//! backends and volatile in-memory ones.

mod mem;
mod sqlite;

pub use mem::{InMemoryContextStore, InMemorySessionStore};
pub use sqlite::{MemoryRow, SqliteContextStore, SqliteSessionStore};
