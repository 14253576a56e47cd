//! Durable promotion store.
//!
//! One SQLite file shared across processes. A row records how often a
//! selector worked for a `(origin, normalized query)` pair, namespaced by
//! `mode_key` so semantic and non-semantic histories never mix. Confidence
//! is success rate with small-sample shrinkage toward 0.5 below ten trials,
//! which keeps a single lucky hit from dominating ranking.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::core::errors::PinpointError;

/// Trials below this count shrink toward 0.5.
const SHRINKAGE_TRIALS: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct PromotionEntry {
    pub selector: String,
    pub success: u32,
    pub failure: u32,
    pub confidence: f32,
}

/// Shrunk confidence: plain success rate once ≥10 trials exist, otherwise
/// padded with neutral 0.5 pseudo-trials. Monotone non-decreasing in
/// successes, non-increasing in failures.
pub fn shrunk_confidence(success: u32, failure: u32) -> f32 {
    let n = success + failure;
    if n == 0 {
        return 0.5;
    }
    if n >= SHRINKAGE_TRIALS {
        success as f32 / n as f32
    } else {
        let pad = (SHRINKAGE_TRIALS - n) as f32;
        (success as f32 + 0.5 * pad) / SHRINKAGE_TRIALS as f32
    }
}

/// Normalized query form used as the store key.
pub fn normalize_query(phrase: &str) -> String {
    phrase.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Origin (`scheme://host[:port]`) extracted from a URL, or the input itself
/// when it does not parse (file fixtures, about:blank).
pub fn origin_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => u.origin().ascii_serialization(),
        Err(_) => url.to_string(),
    }
}

pub struct PromotionStore {
    conn: Mutex<Connection>,
    ttl_days: i64,
}

impl PromotionStore {
    pub fn open(path: &Path, ttl_days: i64) -> Result<Self, PinpointError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PinpointError::StoreCorrupt(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| PinpointError::StoreCorrupt(format!("{}: {}", path.display(), e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| PinpointError::StoreCorrupt(e.to_string()))?;
        // Cross-process writers contend on the file; wait instead of erroring.
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| PinpointError::StoreCorrupt(e.to_string()))?;
        Self::init_schema(&conn)?;
        let store = Self { conn: Mutex::new(conn), ttl_days };
        store.prune();
        Ok(store)
    }

    pub fn open_in_memory(ttl_days: i64) -> Result<Self, PinpointError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PinpointError::StoreCorrupt(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn), ttl_days })
    }

    fn init_schema(conn: &Connection) -> Result<(), PinpointError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS promotions(
                 origin     TEXT NOT NULL,
                 query_norm TEXT NOT NULL,
                 selector   TEXT NOT NULL,
                 mode_key   TEXT NOT NULL,
                 success    INTEGER NOT NULL DEFAULT 0,
                 failure    INTEGER NOT NULL DEFAULT 0,
                 last_used  INTEGER NOT NULL,
                 PRIMARY KEY (origin, query_norm, selector, mode_key)
             );
             CREATE INDEX IF NOT EXISTS promotions_lookup
                 ON promotions(origin, query_norm, mode_key);",
        )
        .map_err(|e| PinpointError::StoreCorrupt(e.to_string()))
    }

    pub fn record_success(&self, origin: &str, query: &str, selector: &str, mode_key: &str) {
        self.bump(origin, query, selector, mode_key, 1, 0);
    }

    pub fn record_failure(&self, origin: &str, query: &str, selector: &str, mode_key: &str) {
        self.bump(origin, query, selector, mode_key, 0, 1);
    }

    fn bump(&self, origin: &str, query: &str, selector: &str, mode_key: &str, s: u32, f: u32) {
        let query_norm = normalize_query(query);
        let conn = self.conn.lock().expect("promotion store lock");
        let result = conn.execute(
            "INSERT INTO promotions(origin, query_norm, selector, mode_key, success, failure, last_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(origin, query_norm, selector, mode_key) DO UPDATE SET
                 success = success + ?5,
                 failure = failure + ?6,
                 last_used = ?7",
            params![origin, query_norm, selector, mode_key, s, f, Utc::now().timestamp_millis()],
        );
        if let Err(e) = result {
            warn!("promotion write failed: {}", e);
        }
    }

    /// Promoted selectors for `(origin, query)` above `conf_min`, highest
    /// confidence first.
    pub fn lookup(
        &self,
        origin: &str,
        query: &str,
        mode_key: &str,
        conf_min: f32,
    ) -> Vec<PromotionEntry> {
        let query_norm = normalize_query(query);
        let conn = self.conn.lock().expect("promotion store lock");
        let mut stmt = match conn.prepare(
            "SELECT selector, success, failure FROM promotions
             WHERE origin = ?1 AND query_norm = ?2 AND mode_key = ?3",
        ) {
            Ok(s) => s,
            Err(e) => {
                warn!("promotion lookup failed: {}", e);
                return Vec::new();
            }
        };

        let rows = stmt.query_map(params![origin, query_norm, mode_key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?, row.get::<_, u32>(2)?))
        });
        let mut out: Vec<PromotionEntry> = match rows {
            Ok(rows) => rows
                .filter_map(|r| r.ok())
                .map(|(selector, success, failure)| PromotionEntry {
                    confidence: shrunk_confidence(success, failure),
                    selector,
                    success,
                    failure,
                })
                .filter(|e| e.confidence >= conf_min)
                .collect(),
            Err(e) => {
                warn!("promotion lookup failed: {}", e);
                return Vec::new();
            }
        };
        out.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.selector.cmp(&b.selector))
        });
        out
    }

    /// Drop used entries idle past the TTL. Runs opportunistically on open.
    pub fn prune(&self) {
        let cutoff = Utc::now().timestamp_millis() - self.ttl_days * 24 * 3600 * 1000;
        let conn = self.conn.lock().expect("promotion store lock");
        match conn.execute(
            "DELETE FROM promotions WHERE success + failure > 0 AND last_used < ?1",
            params![cutoff],
        ) {
            Ok(0) => {}
            Ok(n) => debug!(pruned = n, "promotion store pruned"),
            Err(e) => warn!("promotion prune failed: {}", e),
        }
    }

    pub fn len(&self) -> u64 {
        let conn = self.conn.lock().expect("promotion store lock");
        conn.query_row("SELECT COUNT(*) FROM promotions", [], |r| r.get(0)).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
