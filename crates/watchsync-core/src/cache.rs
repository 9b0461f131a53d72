use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

use watchsync_config::CacheConfig;
use watchsync_models::{IdNamespace, MediaType};

/// Identity mappings are immutable facts; ten years is "never" in practice
/// while still letting a stale mapping age out eventually.
const ID_MAPPING_TTL_SECS: i64 = 10 * 365 * 24 * 3600;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS id_mappings (
    external_type TEXT NOT NULL,
    external_id TEXT NOT NULL,
    media_type TEXT NOT NULL,
    trakt_id INTEGER,
    data TEXT,
    created_at INTEGER NOT NULL,
    expires_at INTEGER,
    PRIMARY KEY (external_type, external_id, media_type)
);

CREATE TABLE IF NOT EXISTS watched_cache (
    trakt_id INTEGER PRIMARY KEY,
    media_type TEXT NOT NULL,
    data TEXT,
    updated_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ratings_cache (
    trakt_id INTEGER PRIMARY KEY,
    media_type TEXT NOT NULL,
    rating INTEGER NOT NULL,
    rated_at INTEGER,
    updated_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT,
    updated_at INTEGER NOT NULL
);
";

/// Per-table row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub id_mappings: u64,
    pub watched: u64,
    pub ratings: u64,
    pub sync_state: u64,
}

/// Durable cross-run cache: identifier mappings, short-lived watched/rating
/// snapshots and arbitrary sync state, all in one SQLite file.
///
/// Schema creation is idempotent and runs on every open. Bulk writes are
/// transactional: a batch either fully applies or leaves no trace.
pub struct SyncCache {
    conn: Connection,
    watched_ttl: i64,
    ratings_ttl: i64,
}

impl SyncCache {
    pub fn open(path: &Path, config: &CacheConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening cache database at {:?}", path);
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open cache database at {:?}", path))?;
        Self::from_connection(conn, config)
    }

    /// In-memory cache for tests and throwaway runs.
    pub fn open_in_memory(config: &CacheConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, config)
    }

    fn from_connection(conn: Connection, config: &CacheConfig) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create cache schema")?;
        Ok(Self {
            conn,
            watched_ttl: config.watched_ttl_secs,
            ratings_ttl: config.ratings_ttl_secs,
        })
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    // Identifier mappings: external id -> canonical trakt id. Long TTL.

    pub fn get_canonical_id(
        &self,
        namespace: IdNamespace,
        external_id: &str,
        media_type: &MediaType,
    ) -> Result<Option<u64>> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT trakt_id FROM id_mappings
                 WHERE external_type = ?1 AND external_id = ?2 AND media_type = ?3
                 AND (expires_at IS NULL OR expires_at > ?4)",
                params![
                    namespace.as_str(),
                    external_id,
                    media_type.as_cache_key(),
                    Self::now()
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.map(|id| id as u64))
    }

    pub fn put_canonical_id(
        &mut self,
        namespace: IdNamespace,
        external_id: &str,
        media_type: &MediaType,
        trakt_id: u64,
        payload: Option<&Value>,
    ) -> Result<()> {
        let now = Self::now();
        self.conn.execute(
            "INSERT OR REPLACE INTO id_mappings
             (external_type, external_id, media_type, trakt_id, data, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                namespace.as_str(),
                external_id,
                media_type.as_cache_key(),
                trakt_id as i64,
                payload.map(|p| p.to_string()),
                now,
                now + ID_MAPPING_TTL_SECS
            ],
        )?;
        Ok(())
    }

    pub fn bulk_put_canonical_ids(
        &mut self,
        rows: &[(IdNamespace, String, MediaType, u64)],
    ) -> Result<()> {
        let now = Self::now();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO id_mappings
                 (external_type, external_id, media_type, trakt_id, data, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
            )?;
            for (namespace, external_id, media_type, trakt_id) in rows {
                stmt.execute(params![
                    namespace.as_str(),
                    external_id,
                    media_type.as_cache_key(),
                    *trakt_id as i64,
                    now,
                    now + ID_MAPPING_TTL_SECS
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The auxiliary payload of a mapping, served regardless of expiration:
    /// enrichment data is best-effort, not identity truth.
    pub fn get_cached_payload(
        &self,
        namespace: IdNamespace,
        external_id: &str,
        media_type: &MediaType,
    ) -> Result<Option<Value>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT data FROM id_mappings
                 WHERE external_type = ?1 AND external_id = ?2 AND media_type = ?3",
                params![namespace.as_str(), external_id, media_type.as_cache_key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw
            .flatten()
            .and_then(|text| serde_json::from_str(&text).ok()))
    }

    // Watched snapshots. Short TTL; an expired row reads as a miss so the
    // caller refetches from the remote.

    pub fn get_watched_status(&self, trakt_id: u64) -> Result<Option<Value>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT data FROM watched_cache WHERE trakt_id = ?1 AND expires_at > ?2",
                params![trakt_id as i64, Self::now()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw
            .flatten()
            .and_then(|text| serde_json::from_str(&text).ok()))
    }

    pub fn put_watched_status(
        &mut self,
        trakt_id: u64,
        media_type: &MediaType,
        payload: &Value,
    ) -> Result<()> {
        let now = Self::now();
        self.conn.execute(
            "INSERT OR REPLACE INTO watched_cache
             (trakt_id, media_type, data, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                trakt_id as i64,
                media_type.as_cache_key(),
                payload.to_string(),
                now,
                now + self.watched_ttl
            ],
        )?;
        Ok(())
    }

    pub fn bulk_put_watched(&mut self, rows: &[(u64, MediaType, Value)]) -> Result<()> {
        let now = Self::now();
        let expires_at = now + self.watched_ttl;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO watched_cache
                 (trakt_id, media_type, data, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (trakt_id, media_type, payload) in rows {
                stmt.execute(params![
                    *trakt_id as i64,
                    media_type.as_cache_key(),
                    payload.to_string(),
                    now,
                    expires_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // Rating snapshots. Same short-TTL semantics.

    pub fn get_rating(&self, trakt_id: u64) -> Result<Option<(u8, Option<i64>)>> {
        let row: Option<(i64, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT rating, rated_at FROM ratings_cache
                 WHERE trakt_id = ?1 AND expires_at > ?2",
                params![trakt_id as i64, Self::now()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(rating, rated_at)| (rating as u8, rated_at)))
    }

    pub fn put_rating(
        &mut self,
        trakt_id: u64,
        media_type: &MediaType,
        rating: u8,
        rated_at: Option<i64>,
    ) -> Result<()> {
        let now = Self::now();
        self.conn.execute(
            "INSERT OR REPLACE INTO ratings_cache
             (trakt_id, media_type, rating, rated_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                trakt_id as i64,
                media_type.as_cache_key(),
                rating as i64,
                rated_at,
                now,
                now + self.ratings_ttl
            ],
        )?;
        Ok(())
    }

    pub fn bulk_put_ratings(&mut self, rows: &[(u64, MediaType, u8, Option<i64>)]) -> Result<()> {
        let now = Self::now();
        let expires_at = now + self.ratings_ttl;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO ratings_cache
                 (trakt_id, media_type, rating, rated_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (trakt_id, media_type, rating, rated_at) in rows {
                stmt.execute(params![
                    *trakt_id as i64,
                    media_type.as_cache_key(),
                    *rating as i64,
                    rated_at,
                    now,
                    expires_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // Sync state: arbitrary key/value rows for resumable cross-run state.
    // Never expires; cleared only on demand.

    pub fn get_sync_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn put_sync_state(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Self::now()],
        )?;
        Ok(())
    }

    pub fn clear_sync_state(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM sync_state", [])?;
        Ok(())
    }

    // Maintenance

    /// Delete expired rows across the TTL-bearing tables; returns the count.
    pub fn prune_expired(&mut self) -> Result<usize> {
        let now = Self::now();
        let mut removed = 0;
        removed += self.conn.execute(
            "DELETE FROM id_mappings WHERE expires_at IS NOT NULL AND expires_at < ?1",
            params![now],
        )?;
        removed += self
            .conn
            .execute("DELETE FROM watched_cache WHERE expires_at < ?1", params![now])?;
        removed += self
            .conn
            .execute("DELETE FROM ratings_cache WHERE expires_at < ?1", params![now])?;
        info!("Pruned {} expired cache rows", removed);
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let count = |table: &str| -> Result<u64> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
            Ok(n as u64)
        };
        Ok(CacheStats {
            id_mappings: count("id_mappings")?,
            watched: count("watched_cache")?,
            ratings: count("ratings_cache")?,
            sync_state: count("sync_state")?,
        })
    }
}
