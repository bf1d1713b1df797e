//! SQLite backend over an r2d2 connection pool.
//!
//! ## Tables
//!
//! - `entries` - one row per stored entry (sealed or pending)
//! - `blocks` - block headers
//! - `block_entries` - ordered junction between blocks and entries
//! - `pending_entries` - ordered pending set
//! - `chain_state` - singleton row with tail hash and height
//! - `validation_records` - append-only log of every validation outcome
//!
//! Every multi-statement write runs in a single transaction. A full chain
//! rewrite first fills shadow tables, checks them, then swaps them in before
//! committing, so a failure at any point rolls back to the old chain.

pub mod schema;

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{BackendInfo, BackendKind, CrashPoint, StorageBackend};
use crate::error::StorageError;
use crate::types::{AuditEntry, Block, Entry, ValidationStatus};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Connection checkout counters.
#[derive(Debug, Default)]
pub struct PoolStats {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    pub acquired: u64,
    pub released: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }

    /// Connections currently checked out.
    pub fn outstanding(&self) -> u64 {
        let s = self.snapshot();
        s.acquired.saturating_sub(s.released)
    }
}

/// A pooled connection that counts its own release.
///
/// Returned to the pool on drop, which covers early returns and `?`.
pub struct TrackedConn {
    conn: PooledConnection<SqliteConnectionManager>,
    stats: Arc<PoolStats>,
}

impl Deref for TrackedConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for TrackedConn {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Drop for TrackedConn {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct SqliteInner {
    pool: DbPool,
    stats: Arc<PoolStats>,
    location: String,
    crash_point: StdMutex<Option<CrashPoint>>,
    closed: AtomicBool,
}

/// Relational backend.
#[derive(Clone)]
pub struct SqliteBackend {
    inner: Arc<SqliteInner>,
}

impl SqliteBackend {
    /// Open or create a database file.
    pub fn open(path: &Path, pool_size: u32) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!(path = %path.display(), pool_size, "Opening SQLite ledger");

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")
        });
        Self::from_manager(manager, pool_size.max(1), path.display().to_string())
    }

    /// In-memory database (for testing); a single shared connection.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite ledger");
        Self::from_manager(SqliteConnectionManager::memory(), 1, ":memory:".to_string())
    }

    fn from_manager(
        manager: SqliteConnectionManager,
        pool_size: u32,
        location: String,
    ) -> Result<Self, StorageError> {
        let pool = Pool::builder().max_size(pool_size).build(manager)?;
        let backend = Self {
            inner: Arc::new(SqliteInner {
                pool,
                stats: Arc::new(PoolStats::default()),
                location,
                crash_point: StdMutex::new(None),
                closed: AtomicBool::new(false),
            }),
        };

        let conn = backend.inner.checkout()?;
        schema::init_schema(&conn)?;
        Ok(backend)
    }

    pub fn pool_stats(&self) -> PoolStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Make the next full rewrite fail at `point`.
    #[doc(hidden)]
    pub fn inject_crash(&self, point: CrashPoint) {
        if let Ok(mut guard) = self.inner.crash_point.lock() {
            *guard = Some(point);
        }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteInner) -> Result<T, StorageError> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

impl SqliteInner {
    fn checkout(&self) -> Result<TrackedConn, StorageError> {
        let conn = self.pool.get()?;
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(TrackedConn {
            conn,
            stats: self.stats.clone(),
        })
    }

    fn take_crash_point(&self) -> Option<CrashPoint> {
        self.crash_point.lock().ok().and_then(|mut g| g.take())
    }

    fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        let conn = self.checkout()?;
        let mut stmt = conn.prepare(
            "SELECT block_index, timestamp, previous_hash, nonce, hash
             FROM blocks ORDER BY block_index",
        )?;
        let headers = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut chain = Vec::with_capacity(headers.len());
        for (index, timestamp, previous_hash, nonce, hash) in headers {
            let entries = load_block_entries(&conn, index)?;
            chain.push(Block {
                index: index as u64,
                timestamp: parse_timestamp(&timestamp)?,
                entries,
                previous_hash,
                nonce: nonce as u64,
                hash,
            });
        }
        Ok(chain)
    }

    fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut conn = self.checkout()?;
        let tx = conn.transaction()?;

        let tail: Option<(i64, String)> = tx
            .query_row(
                "SELECT block_index, hash FROM blocks ORDER BY block_index DESC LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let extends = match &tail {
            None => block.is_genesis(),
            Some((index, hash)) => *index as u64 + 1 == block.index && *hash == block.previous_hash,
        };
        if !extends {
            return Err(StorageError::TailMismatch {
                height: block.index,
                expected: block.previous_hash.clone(),
                actual: tail.map(|(_, h)| h).unwrap_or_else(|| "<empty>".to_string()),
            });
        }

        insert_block(&tx, "blocks", "block_entries", block)?;
        upsert_chain_state(&tx, &block.hash, block.index)?;
        tx.commit()?;

        debug!(index = block.index, hash = %block.hash, "Block appended");
        Ok(())
    }

    fn save_chain(&self, chain: &[Block]) -> Result<(), StorageError> {
        let crash = self.take_crash_point();
        let mut conn = self.checkout()?;
        let tx = conn.transaction()?;

        tx.execute_batch(
            "DROP TABLE IF EXISTS blocks_shadow;
             DROP TABLE IF EXISTS block_entries_shadow;
             CREATE TABLE blocks_shadow AS SELECT * FROM blocks WHERE 0;
             CREATE TABLE block_entries_shadow AS SELECT * FROM block_entries WHERE 0;",
        )?;

        for block in chain {
            insert_block(&tx, "blocks_shadow", "block_entries_shadow", block)?;
        }

        let (count, tail_hash): (i64, Option<String>) = tx.query_row(
            "SELECT COUNT(*), (SELECT hash FROM blocks_shadow ORDER BY block_index DESC LIMIT 1)
             FROM blocks_shadow",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let expected_tail = chain.last().map(|b| b.hash.clone());
        if count as usize != chain.len() || tail_hash != expected_tail {
            return Err(StorageError::Internal(format!(
                "shadow chain check failed: {} rows for {} blocks",
                count,
                chain.len()
            )));
        }

        tx.execute_batch("DELETE FROM block_entries; DELETE FROM blocks;")?;

        if crash == Some(CrashPoint::AfterClear) {
            warn!("Simulated crash between clear and copy");
            // tx drops here and rolls back
            return Err(StorageError::SimulatedCrash("after clear".into()));
        }

        tx.execute_batch(
            "INSERT INTO blocks SELECT * FROM blocks_shadow;
             INSERT INTO block_entries SELECT * FROM block_entries_shadow;
             DROP TABLE blocks_shadow;
             DROP TABLE block_entries_shadow;",
        )?;
        delete_orphan_entries(&tx)?;

        match chain.last() {
            Some(tail) => upsert_chain_state(&tx, &tail.hash, tail.index)?,
            None => {
                tx.execute("DELETE FROM chain_state", [])?;
            }
        }
        tx.commit()?;

        info!(blocks = chain.len(), "Chain rewritten");
        Ok(())
    }

    fn load_pending(&self) -> Result<Vec<Entry>, StorageError> {
        let conn = self.checkout()?;
        let mut stmt = conn.prepare(
            "SELECT e.content, e.author, e.intent, e.metadata, e.timestamp,
                    e.validation_status, e.validation_record
             FROM pending_entries p JOIN entries e ON e.entry_id = p.entry_id
             ORDER BY p.position",
        )?;
        let rows = stmt.query_map([], EntryRow::from_row)?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    fn save_all_pending(&self, entries: &[Entry]) -> Result<(), StorageError> {
        let mut conn = self.checkout()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM pending_entries", [])?;
        delete_orphan_entries(&tx)?;
        for (position, entry) in entries.iter().enumerate() {
            let entry_id = insert_entry(&tx, entry)?;
            tx.execute(
                "INSERT INTO pending_entries (position, entry_id) VALUES (?1, ?2)",
                params![position as i64, entry_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn append_validation(&self, record: &AuditEntry) -> Result<(), StorageError> {
        let conn = self.checkout()?;
        conn.execute(
            "INSERT INTO validation_records
                (audit_id, kind, fingerprint, author, decision, record, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.audit_id,
                record.kind.as_str(),
                record.fingerprint,
                record.author,
                record.decision.as_str(),
                serde_json::to_string(record)?,
                format_timestamp(&record.recorded_at),
            ],
        )?;
        Ok(())
    }

    fn load_validations(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        let conn = self.checkout()?;
        let mut stmt =
            conn.prepare("SELECT record FROM validation_records ORDER BY seq DESC LIMIT ?1")?;
        let rows = stmt
            .query_map([limit.min(i64::MAX as usize) as i64], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|raw| serde_json::from_str(raw).map_err(StorageError::from))
            .collect()
    }

    fn info(&self) -> Result<BackendInfo, StorageError> {
        let (height, pending) = {
            let conn = self.checkout()?;
            let height: Option<i64> = conn
                .query_row("SELECT height FROM chain_state WHERE id = 1", [], |r| r.get(0))
                .optional()?;
            let pending: i64 =
                conn.query_row("SELECT COUNT(*) FROM pending_entries", [], |r| r.get(0))?;
            (height, pending)
        };
        let stats = self.stats.snapshot();
        Ok(BackendInfo {
            kind: BackendKind::Sqlite,
            location: Some(self.location.clone()),
            height: height.unwrap_or(0) as u64,
            pending: pending as usize,
            connections_acquired: Some(stats.acquired),
            connections_released: Some(stats.released),
        })
    }
}

struct EntryRow {
    content: String,
    author: String,
    intent: String,
    metadata: String,
    timestamp: String,
    status: String,
    record: Option<String>,
}

impl EntryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            content: row.get(0)?,
            author: row.get(1)?,
            intent: row.get(2)?,
            metadata: row.get(3)?,
            timestamp: row.get(4)?,
            status: row.get(5)?,
            record: row.get(6)?,
        })
    }

    fn into_entry(self) -> Result<Entry, StorageError> {
        let validation_status = ValidationStatus::parse(&self.status).ok_or_else(|| {
            StorageError::Database(format!("unknown validation status '{}'", self.status))
        })?;
        let validation_record = match self.record {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Entry {
            content: self.content,
            author: self.author,
            intent: self.intent,
            metadata: serde_json::from_str(&self.metadata)?,
            timestamp: parse_timestamp(&self.timestamp)?,
            validation_status,
            validation_record,
        })
    }
}

fn load_block_entries(conn: &Connection, block_index: i64) -> Result<Vec<Entry>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT e.content, e.author, e.intent, e.metadata, e.timestamp,
                e.validation_status, e.validation_record
         FROM block_entries be JOIN entries e ON e.entry_id = be.entry_id
         WHERE be.block_index = ?1
         ORDER BY be.position",
    )?;
    let rows = stmt.query_map([block_index], EntryRow::from_row)?;
    let rows = rows.collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(EntryRow::into_entry).collect()
}

fn insert_entry(conn: &Connection, entry: &Entry) -> Result<i64, StorageError> {
    let record = match &entry.validation_record {
        Some(r) => Some(serde_json::to_string(r)?),
        None => None,
    };
    conn.execute(
        "INSERT INTO entries
            (fingerprint, content, author, intent, metadata, timestamp, validation_status, validation_record)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.fingerprint(),
            entry.content,
            entry.author,
            entry.intent,
            serde_json::to_string(&entry.metadata)?,
            format_timestamp(&entry.timestamp),
            entry.validation_status.as_str(),
            record,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_block(
    conn: &Connection,
    blocks_table: &str,
    junction_table: &str,
    block: &Block,
) -> Result<(), StorageError> {
    conn.execute(
        &format!(
            "INSERT INTO {} (block_index, timestamp, previous_hash, nonce, hash)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            blocks_table
        ),
        params![
            block.index as i64,
            format_timestamp(&block.timestamp),
            block.previous_hash,
            block.nonce as i64,
            block.hash,
        ],
    )?;
    for (position, entry) in block.entries.iter().enumerate() {
        let entry_id = insert_entry(conn, entry)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (block_index, position, entry_id) VALUES (?1, ?2, ?3)",
                junction_table
            ),
            params![block.index as i64, position as i64, entry_id],
        )?;
    }
    Ok(())
}

fn upsert_chain_state(conn: &Connection, tail_hash: &str, height: u64) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO chain_state (id, tail_hash, height, updated_at) VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            tail_hash = excluded.tail_hash,
            height = excluded.height,
            updated_at = excluded.updated_at",
        params![tail_hash, height as i64, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn delete_orphan_entries(conn: &Connection) -> Result<(), StorageError> {
    conn.execute(
        "DELETE FROM entries
         WHERE entry_id NOT IN (SELECT entry_id FROM block_entries)
           AND entry_id NOT IN (SELECT entry_id FROM pending_entries)",
        [],
    )?;
    Ok(())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Database(format!("bad timestamp '{}': {}", raw, e)))
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        self.run(|inner| inner.load_chain()).await
    }

    async fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        let block = block.clone();
        self.run(move |inner| inner.append_block(&block)).await
    }

    async fn save_chain(&self, chain: &[Block]) -> Result<(), StorageError> {
        let chain = chain.to_vec();
        self.run(move |inner| inner.save_chain(&chain)).await
    }

    async fn load_pending(&self) -> Result<Vec<Entry>, StorageError> {
        self.run(|inner| inner.load_pending()).await
    }

    async fn save_all_pending(&self, entries: &[Entry]) -> Result<(), StorageError> {
        let entries = entries.to_vec();
        self.run(move |inner| inner.save_all_pending(&entries)).await
    }

    async fn append_validation(&self, record: &AuditEntry) -> Result<(), StorageError> {
        let record = record.clone();
        self.run(move |inner| inner.append_validation(&record)).await
    }

    async fn load_validations(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        self.run(move |inner| inner.load_validations(limit)).await
    }

    async fn info(&self) -> Result<BackendInfo, StorageError> {
        self.run(|inner| inner.info()).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        let stats = self.inner.stats.snapshot();
        info!(
            acquired = stats.acquired,
            released = stats.released,
            "SQLite ledger closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValidationStatus;

    fn valid_entry(content: &str) -> Entry {
        let mut e = Entry::new(content, "alice", "note");
        e.validation_status = ValidationStatus::Valid;
        e
    }

    #[tokio::test]
    async fn test_append_and_reload() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let genesis = Block::genesis();
        backend.append_block(&genesis).await.unwrap();

        let block = Block::new(1, Utc::now(), vec![valid_entry("Alice pays Bob $10")], genesis.hash.clone(), 3);
        backend.append_block(&block).await.unwrap();

        let chain = backend.load_chain().await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1], block);
        assert_eq!(chain[1].compute_hash(), block.hash);
    }

    #[tokio::test]
    async fn test_pending_replaced_atomically() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .save_all_pending(&[valid_entry("one"), valid_entry("two")])
            .await
            .unwrap();
        backend.save_all_pending(&[valid_entry("three")]).await.unwrap();

        let pending = backend.load_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content, "three");
    }

    #[tokio::test]
    async fn test_mismatched_append_releases_connection() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.append_block(&Block::genesis()).await.unwrap();

        let stray = Block::new(1, Utc::now(), vec![valid_entry("x")], "bogus", 0);
        assert!(backend.append_block(&stray).await.is_err());

        let stats = backend.pool_stats();
        assert!(stats.acquired >= 3);
        assert_eq!(stats.acquired, stats.released);
    }
}
