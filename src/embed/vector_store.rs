//! Tier-2 on-disk vector cache.
//!
//! A single SQLite file: a `meta` header table carrying the vector dimension
//! and schema version, and a `vectors` table mapping hex content hashes to
//! little-endian f32 blobs. Eviction is LRU by `last_used`, bounded by
//! `disk_cap`. A dimension or schema mismatch (model swap, format bump)
//! clears the table instead of serving stale vectors.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::core::errors::PinpointError;

const SCHEMA_VERSION: i64 = 1;

pub struct VectorStore {
    conn: Mutex<Connection>,
    dim: usize,
    cap: u64,
}

impl VectorStore {
    /// Open (or create) the store at `path`. Unreadable files surface as
    /// `StoreCorrupt`; the caller decides whether to continue without Tier 2.
    pub fn open(path: &Path, dim: usize, cap: u64) -> Result<Self, PinpointError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PinpointError::StoreCorrupt(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| PinpointError::StoreCorrupt(format!("{}: {}", path.display(), e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| PinpointError::StoreCorrupt(e.to_string()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta(
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS vectors(
                 content_hash TEXT PRIMARY KEY,
                 vec          BLOB NOT NULL,
                 last_used    INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS vectors_last_used ON vectors(last_used);",
        )
        .map_err(|e| PinpointError::StoreCorrupt(e.to_string()))?;

        let store = Self { conn: Mutex::new(conn), dim, cap };
        store.check_header()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory(dim: usize, cap: u64) -> Result<Self, PinpointError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PinpointError::StoreCorrupt(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE meta(key TEXT PRIMARY KEY, value TEXT NOT NULL);
             CREATE TABLE vectors(
                 content_hash TEXT PRIMARY KEY,
                 vec          BLOB NOT NULL,
                 last_used    INTEGER NOT NULL
             );
             CREATE INDEX vectors_last_used ON vectors(last_used);",
        )
        .map_err(|e| PinpointError::StoreCorrupt(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn), dim, cap };
        store.check_header()?;
        Ok(store)
    }

    fn check_header(&self) -> Result<(), PinpointError> {
        let conn = self.conn.lock().expect("vector store lock");
        let read = |key: &str| -> Option<String> {
            conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |r| r.get(0))
                .optional()
                .ok()
                .flatten()
        };

        let stored_dim: Option<usize> = read("dim").and_then(|v| v.parse().ok());
        let stored_version: Option<i64> = read("schema_version").and_then(|v| v.parse().ok());

        let mismatch = matches!(stored_dim, Some(d) if d != self.dim)
            || matches!(stored_version, Some(v) if v != SCHEMA_VERSION);
        if mismatch {
            warn!(
                stored_dim, stored_version,
                dim = self.dim,
                "vector store header mismatch — clearing cached vectors"
            );
            conn.execute("DELETE FROM vectors", [])
                .map_err(|e| PinpointError::StoreCorrupt(e.to_string()))?;
        }
        if stored_dim.is_none() || mismatch {
            conn.execute(
                "INSERT OR REPLACE INTO meta(key, value) VALUES
                 ('dim', ?1), ('schema_version', ?2)",
                params![self.dim.to_string(), SCHEMA_VERSION.to_string()],
            )
            .map_err(|e| PinpointError::StoreCorrupt(e.to_string()))?;
            info!(dim = self.dim, "vector store header written");
        }
        Ok(())
    }

    pub fn get(&self, content_hash: &str) -> Option<Vec<f32>> {
        let conn = self.conn.lock().expect("vector store lock");
        let blob: Vec<u8> = conn
            .query_row(
                "SELECT vec FROM vectors WHERE content_hash = ?1",
                params![content_hash],
                |r| r.get(0),
            )
            .optional()
            .ok()
            .flatten()?;
        let _ = conn.execute(
            "UPDATE vectors SET last_used = ?2 WHERE content_hash = ?1",
            params![content_hash, Utc::now().timestamp_millis()],
        );
        let vec = decode(&blob);
        if vec.len() == self.dim {
            Some(vec)
        } else {
            None
        }
    }

    pub fn put(&self, content_hash: &str, vector: &[f32]) {
        if vector.len() != self.dim {
            warn!(
                got = vector.len(),
                want = self.dim,
                "refusing to store vector with wrong dimension"
            );
            return;
        }
        let conn = self.conn.lock().expect("vector store lock");
        if let Err(e) = conn.execute(
            "INSERT OR REPLACE INTO vectors(content_hash, vec, last_used) VALUES (?1, ?2, ?3)",
            params![content_hash, encode(vector), Utc::now().timestamp_millis()],
        ) {
            warn!("vector store write failed: {}", e);
            return;
        }

        // Opportunistic LRU eviction; failures only cost disk space.
        let count: u64 = conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))
            .unwrap_or(0);
        if count > self.cap {
            let excess = count - self.cap;
            let _ = conn.execute(
                "DELETE FROM vectors WHERE content_hash IN (
                     SELECT content_hash FROM vectors ORDER BY last_used ASC LIMIT ?1
                 )",
                params![excess],
            );
        }
    }

    pub fn len(&self) -> u64 {
        let conn = self.conn.lock().expect("vector store lock");
        conn.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0)).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn encode(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
