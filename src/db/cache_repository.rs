//! Persistence for diagnostic result cache entries.
//!
//! One row per perceptual image hash. The cache layer on top of this
//! module decides expiry, similarity matching, and eviction policy; this
//! module only executes the queries those policies need.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::DatabaseError;
use crate::pipeline::types::DiagnosticReport;

/// One cached diagnostic result, keyed by perceptual image hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub image_hash: String,
    pub report: DiagnosticReport,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: i64,
    pub last_accessed_at: DateTime<Utc>,
}

/// Raw row before the report JSON is deserialized. Kept separate so serde
/// failures surface as `DatabaseError`, not `rusqlite::Error`.
struct RawEntry {
    image_hash: String,
    report_json: String,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    access_count: i64,
    last_accessed_at: DateTime<Utc>,
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        image_hash: row.get(0)?,
        report_json: row.get(1)?,
        cached_at: row.get(2)?,
        expires_at: row.get(3)?,
        access_count: row.get(4)?,
        last_accessed_at: row.get(5)?,
    })
}

fn finish_entry(raw: RawEntry) -> Result<CacheEntry, DatabaseError> {
    let report: DiagnosticReport = serde_json::from_str(&raw.report_json)?;
    Ok(CacheEntry {
        image_hash: raw.image_hash,
        report,
        cached_at: raw.cached_at,
        expires_at: raw.expires_at,
        access_count: raw.access_count,
        last_accessed_at: raw.last_accessed_at,
    })
}

const SELECT_COLUMNS: &str =
    "image_hash, report_json, cached_at, expires_at, access_count, last_accessed_at";

/// Fetch the non-expired entry with this exact hash, if any.
pub fn get_by_hash(
    conn: &Connection,
    image_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<CacheEntry>, DatabaseError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM cache_entries
         WHERE image_hash = ?1 AND expires_at > ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![image_hash, now], entry_from_row)?;

    match rows.next() {
        Some(row) => Ok(Some(finish_entry(row?)?)),
        None => Ok(None),
    }
}

/// Fetch every non-expired entry (for the similarity scan).
pub fn get_all_valid(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<CacheEntry>, DatabaseError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM cache_entries WHERE expires_at > ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![now], entry_from_row)?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(finish_entry(row?)?);
    }
    Ok(entries)
}

/// Insert or overwrite the entry for this hash.
/// At most one live entry per exact hash — the primary key enforces it.
pub fn upsert(conn: &Connection, entry: &CacheEntry) -> Result<(), DatabaseError> {
    let report_json = serde_json::to_string(&entry.report)?;
    conn.execute(
        "INSERT OR REPLACE INTO cache_entries
         (image_hash, report_json, cached_at, expires_at, access_count, last_accessed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.image_hash,
            report_json,
            entry.cached_at,
            entry.expires_at,
            entry.access_count,
            entry.last_accessed_at,
        ],
    )?;
    Ok(())
}

/// Write back access bookkeeping after a cache hit.
///
/// Takes the new values explicitly — the caller reads the entry, computes
/// the bump, and writes it back as a separate statement. Two concurrent
/// hits on the same hash can lose one increment; the fields are advisory
/// (eviction ordering only), so that race is accepted.
pub fn update_access(
    conn: &Connection,
    image_hash: &str,
    access_count: i64,
    last_accessed_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE cache_entries SET access_count = ?2, last_accessed_at = ?3
         WHERE image_hash = ?1",
        params![image_hash, access_count, last_accessed_at],
    )?;
    Ok(())
}

/// Delete the entry with this hash. No-op if absent.
pub fn delete_by_hash(conn: &Connection, image_hash: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM cache_entries WHERE image_hash = ?1",
        params![image_hash],
    )?;
    Ok(())
}

/// Delete every entry cached before the cutoff, regardless of its own
/// expiry. Returns the number of deleted rows.
pub fn delete_cached_before(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM cache_entries WHERE cached_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

/// Total number of entries, expired ones included.
pub fn count(conn: &Connection) -> Result<usize, DatabaseError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
    Ok(n as usize)
}

/// Evict least-recently-used entries until at most `max_entries` remain.
///
/// Ordering is `last_accessed_at` ascending, ties broken by `cached_at`
/// ascending (oldest first) — a true LRU, not FIFO. Returns the number
/// of evicted rows.
pub fn enforce_capacity(conn: &Connection, max_entries: usize) -> Result<usize, DatabaseError> {
    let total = count(conn)?;
    if total <= max_entries {
        return Ok(0);
    }

    let excess = (total - max_entries) as i64;
    let evicted = conn.execute(
        "DELETE FROM cache_entries WHERE image_hash IN (
             SELECT image_hash FROM cache_entries
             ORDER BY last_accessed_at ASC, cached_at ASC
             LIMIT ?1
         )",
        params![excess],
    )?;
    Ok(evicted)
}
