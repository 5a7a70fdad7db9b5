//! Local snapshot cache for API payloads, keyed by dataset and filter key.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::AppPaths;

pub const DATASET_TRANSACTIONS: &str = "transactions";
pub const DATASET_PRICES: &str = "price-history";
pub const DATASET_MATCHES: &str = "matches";

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub fetched_at: DateTime<Utc>,
    pub payload_json: String,
}

pub struct SnapshotCache {
    conn: Connection,
}

impl SnapshotCache {
    pub fn open(paths: &AppPaths) -> Result<(Self, PathBuf)> {
        fs::create_dir_all(&paths.data_dir)
            .with_context(|| format!("Failed to create data dir {}", paths.data_dir.display()))?;

        let db_path = paths.data_dir.join("snapshots.sqlite3");
        let cache = Self::open_at(&db_path)?;
        Ok((cache, db_path))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open cache {}", path.display()))?;
        let cache = Self { conn };
        cache.migrate()?;
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self> {
        let cache = Self {
            conn: Connection::open_in_memory()?,
        };
        cache.migrate()?;
        Ok(cache)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                dataset TEXT NOT NULL,
                filter_key TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (dataset, filter_key)
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_dataset ON snapshots(dataset);
            "#,
        )?;
        Ok(())
    }

    /// Returns the snapshot only if it was fetched within `ttl` of `now`.
    pub fn get(
        &self,
        dataset: &str,
        filter_key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT fetched_at, payload_json
            FROM snapshots
            WHERE dataset = ?1
              AND filter_key = ?2
            "#,
        )?;

        let mut rows = stmt.query(params![dataset, filter_key])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let fetched_raw: String = row.get(0)?;
        let payload_json: String = row.get(1)?;
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_raw)
            .context("Invalid fetched_at in snapshots table")?
            .with_timezone(&Utc);

        if now - fetched_at > ttl {
            tracing::debug!(dataset, filter_key, "snapshot expired");
            return Ok(None);
        }

        Ok(Some(Snapshot {
            fetched_at,
            payload_json,
        }))
    }

    pub fn put(
        &self,
        dataset: &str,
        filter_key: &str,
        payload_json: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO snapshots (dataset, filter_key, fetched_at, payload_json)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(dataset, filter_key) DO UPDATE SET
                fetched_at = excluded.fetched_at,
                payload_json = excluded.payload_json
            "#,
            params![dataset, filter_key, fetched_at.to_rfc3339(), payload_json],
        )?;
        Ok(())
    }

    /// Drops every snapshot of `dataset`. Returns the number removed.
    pub fn invalidate(&self, dataset: &str) -> Result<usize> {
        let n = self
            .conn
            .execute("DELETE FROM snapshots WHERE dataset = ?1", params![dataset])?;
        tracing::debug!(dataset, removed = n, "snapshots invalidated");
        Ok(n)
    }

    pub fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM snapshots", [])?)
    }

    pub fn list(&self) -> Result<Vec<(String, String, DateTime<Utc>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT dataset, filter_key, fetched_at FROM snapshots ORDER BY dataset ASC, filter_key ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let dataset: String = row.get(0)?;
            let filter_key: String = row.get(1)?;
            let fetched_at: String = row.get(2)?;
            Ok((dataset, filter_key, fetched_at))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (dataset, filter_key, fetched_raw) = row?;
            let fetched_at = DateTime::parse_from_rfc3339(&fetched_raw)
                .context("Invalid fetched_at in snapshots table")?
                .with_timezone(&Utc);
            out.push((dataset, filter_key, fetched_at));
        }
        Ok(out)
    }
}
