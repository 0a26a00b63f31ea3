//! Result cache over perceptual image hashes.
//!
//! Policy lives here (expiry, similarity matching, eviction); the SQL
//! lives in `db::cache_repository`. The cache is strictly advisory: every
//! error on the read or write path is logged and absorbed, so a broken
//! database degrades to "analyze every image fresh", never to a failed
//! analysis.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::hash;
use super::types::DiagnosticReport;
use crate::config::{CACHE_TTL_DAYS, HASH_SIMILARITY_THRESHOLD, MAX_CACHE_ENTRIES};
use crate::db::{cache_repository, CacheEntry};

/// Diagnostic result cache keyed by perceptual image hash.
pub struct ResultCache {
    conn: Arc<Mutex<Connection>>,
    ttl_days: i64,
    max_entries: usize,
    similarity_threshold: f64,
}

impl ResultCache {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self::with_config(
            conn,
            CACHE_TTL_DAYS,
            MAX_CACHE_ENTRIES,
            HASH_SIMILARITY_THRESHOLD,
        )
    }

    /// Construct with explicit policy values (tests tighten them).
    pub fn with_config(
        conn: Arc<Mutex<Connection>>,
        ttl_days: i64,
        max_entries: usize,
        similarity_threshold: f64,
    ) -> Self {
        Self {
            conn,
            ttl_days,
            max_entries,
            similarity_threshold,
        }
    }

    /// Look up a cached report for this image hash.
    ///
    /// Tries an exact hash match first, then a linear similarity scan over
    /// all live entries, taking the best match at or above the threshold.
    /// A hit bumps the entry's access bookkeeping (advisory, best effort).
    pub fn get_cached_result(&self, image_hash: &str) -> Option<DiagnosticReport> {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(_) => {
                warn!("Cache connection lock poisoned, treating as miss");
                return None;
            }
        };
        let now = Utc::now();

        let exact = match cache_repository::get_by_hash(&conn, image_hash, now) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, treating as miss");
                return None;
            }
        };

        let entry = match exact {
            Some(entry) => {
                debug!(hash = %image_hash, "Exact cache hit");
                entry
            }
            None => {
                let candidates = match cache_repository::get_all_valid(&conn, now) {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(error = %e, "Cache scan failed, treating as miss");
                        return None;
                    }
                };
                let best = candidates
                    .into_iter()
                    .filter_map(|entry| {
                        hash::hash_similarity(image_hash, &entry.image_hash)
                            .filter(|s| *s >= self.similarity_threshold)
                            .map(|s| (s, entry))
                    })
                    .max_by(|(a, _), (b, _)| a.total_cmp(b));

                match best {
                    Some((similarity, entry)) => {
                        debug!(
                            hash = %image_hash,
                            matched = %entry.image_hash,
                            similarity,
                            "Similarity cache hit"
                        );
                        entry
                    }
                    None => return None,
                }
            }
        };

        // Read-then-write bump; a concurrent hit on the same entry may
        // lose one increment, which the eviction ordering tolerates.
        if let Err(e) = cache_repository::update_access(
            &conn,
            &entry.image_hash,
            entry.access_count + 1,
            now,
        ) {
            warn!(error = %e, "Failed to update cache access bookkeeping");
        }

        Some(entry.report)
    }

    /// Store a report under this image hash, then enforce the capacity
    /// bound. Failures are logged and absorbed.
    pub fn cache_result(&self, image_hash: &str, report: &DiagnosticReport) {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(_) => {
                warn!("Cache connection lock poisoned, skipping cache write");
                return;
            }
        };
        let now = Utc::now();

        let entry = CacheEntry {
            image_hash: image_hash.to_string(),
            report: report.clone(),
            cached_at: now,
            expires_at: now + Duration::days(self.ttl_days),
            access_count: 1,
            last_accessed_at: now,
        };

        if let Err(e) = cache_repository::upsert(&conn, &entry) {
            warn!(error = %e, "Failed to write cache entry");
            return;
        }

        match cache_repository::enforce_capacity(&conn, self.max_entries) {
            Ok(0) => {}
            Ok(evicted) => info!(evicted, "Evicted least-recently-used cache entries"),
            Err(e) => warn!(error = %e, "Cache eviction failed"),
        }
    }

    /// Delete entries cached before the given number of days ago,
    /// regardless of their own expiry. Returns how many were removed.
    pub fn clear_old_cache(&self, days: i64) -> usize {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(_) => {
                warn!("Cache connection lock poisoned, skipping maintenance");
                return 0;
            }
        };
        let cutoff = Utc::now() - Duration::days(days);
        match cache_repository::delete_cached_before(&conn, cutoff) {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted, days, "Cleared old cache entries");
                }
                deleted
            }
            Err(e) => {
                warn!(error = %e, "Cache maintenance failed");
                0
            }
        }
    }

    /// Total stored entries, expired ones included.
    pub fn entry_count(&self) -> usize {
        let Ok(conn) = self.conn.lock() else {
            return 0;
        };
        cache_repository::count(&conn).unwrap_or(0)
    }
}
