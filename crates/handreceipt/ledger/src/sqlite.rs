//! SQLite entry store.
//!
//! Writes go through a single-connection pool so appends are serialized
//! within the process; reads use a separate pool. In-memory databases are
//! per-connection, so they share one pinned connection for both.

use crate::hash::GENESIS_HASH;
use crate::model::{EntryDraft, LedgerEntry, NewLedgerEntry};
use crate::sql::{map_insert_error, map_sqlx_error, to_i64, to_u64};
use crate::store::EntryStore;
use crate::{LedgerError, LedgerResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Executor, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT NOT NULL UNIQUE,
        event_type TEXT NOT NULL,
        event_data TEXT NOT NULL,
        hash TEXT NOT NULL,
        prev_hash TEXT NOT NULL,
        nonce INTEGER,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
        created_by INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_event_type ON ledger_entries(event_type)",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_created_at ON ledger_entries(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_created_by ON ledger_entries(created_by)",
    r#"
    CREATE TRIGGER IF NOT EXISTS prevent_ledger_update
    BEFORE UPDATE ON ledger_entries
    BEGIN
        SELECT RAISE(ABORT, 'Ledger entries are immutable and cannot be modified or deleted');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS prevent_ledger_delete
    BEFORE DELETE ON ledger_entries
    BEGIN
        SELECT RAISE(ABORT, 'Ledger entries are immutable and cannot be modified or deleted');
    END
    "#,
];

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed [`EntryStore`].
#[derive(Clone, Debug)]
pub struct SqliteEntryStore {
    read_pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqliteEntryStore {
    pub async fn connect(database_url: &str) -> LedgerResult<Self> {
        Self::connect_with_options(database_url, 4).await
    }

    /// Open the database, creating the file if missing.
    ///
    /// `max_connections` bounds the read pool; the write pool always has one
    /// connection.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
    ) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| LedgerError::Config(format!("invalid sqlite url {database_url}: {e}")))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        if is_in_memory(database_url) {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .map_err(|e| LedgerError::backend("connect sqlite", e))?;
            return Ok(Self::from_pool(pool));
        }

        let options = options.journal_mode(SqliteJournalMode::Wal);
        let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .map_err(|e| LedgerError::backend("connect sqlite write pool", e))?;
        let read_pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::backend("connect sqlite read pool", e))?;

        debug!(
            url = database_url,
            read_connections = max_connections,
            "sqlite ledger pools opened"
        );
        Ok(Self {
            read_pool,
            write_pool,
        })
    }

    /// Use one existing pool for reads and writes.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            read_pool: pool.clone(),
            write_pool: pool,
        }
    }

    pub fn write_pool(&self) -> &SqlitePool {
        &self.write_pool
    }

    pub fn read_pool(&self) -> &SqlitePool {
        &self.read_pool
    }

    async fn fetch_all<'q>(
        &self,
        operation: &str,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        query
            .fetch_all(&self.read_pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .iter()
            .map(decode_entry)
            .collect()
    }

    async fn fetch_optional<'q>(
        &self,
        operation: &str,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> LedgerResult<Option<LedgerEntry>> {
        query
            .fetch_optional(&self.read_pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .as_ref()
            .map(decode_entry)
            .transpose()
    }
}

#[async_trait]
impl EntryStore for SqliteEntryStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn migrate(&self) -> LedgerResult<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.write_pool)
                .await
                .map_err(|e| LedgerError::backend("sqlite schema init failed", e))?;
        }
        Ok(())
    }

    async fn tail_hash(&self) -> LedgerResult<String> {
        select_tail_hash(&self.read_pool).await
    }

    async fn insert(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        insert_entry(&self.write_pool, &entry).await
    }

    async fn append_serialized(&self, draft: EntryDraft, nonce: i64) -> LedgerResult<LedgerEntry> {
        let mut tx = self
            .write_pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin append", e))?;
        let prev_hash = select_tail_hash(&mut *tx).await?;
        let stored = insert_entry(&mut *tx, &draft.seal(&prev_hash, nonce)).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit append", e))?;
        Ok(stored)
    }

    async fn find_by_event_id(&self, event_id: &str) -> LedgerResult<Option<LedgerEntry>> {
        self.fetch_optional(
            "find ledger entry",
            sqlx::query(
                r#"
                SELECT id, event_id, event_type, event_data, hash, prev_hash, nonce, created_at, created_by
                  FROM ledger_entries
                 WHERE event_id = ?
                "#,
            )
            .bind(event_id),
        )
        .await
    }

    async fn find_predecessor(&self, id: i64) -> LedgerResult<Option<LedgerEntry>> {
        self.fetch_optional(
            "find predecessor",
            sqlx::query(
                r#"
                SELECT id, event_id, event_type, event_data, hash, prev_hash, nonce, created_at, created_by
                  FROM ledger_entries
                 WHERE id < ?
                 ORDER BY id DESC
                 LIMIT 1
                "#,
            )
            .bind(id),
        )
        .await
    }

    async fn scan(&self) -> LedgerResult<Vec<LedgerEntry>> {
        self.fetch_all(
            "scan ledger",
            sqlx::query(
                r#"
                SELECT id, event_id, event_type, event_data, hash, prev_hash, nonce, created_at, created_by
                  FROM ledger_entries
                 ORDER BY id ASC
                "#,
            ),
        )
        .await
    }

    async fn entries_for_item(&self, item_id: u64) -> LedgerResult<Vec<LedgerEntry>> {
        self.fetch_all(
            "property history",
            sqlx::query(
                r#"
                SELECT id, event_id, event_type, event_data, hash, prev_hash, nonce, created_at, created_by
                  FROM ledger_entries
                 WHERE (CASE WHEN json_valid(event_data) THEN json_extract(event_data, '$.item_id') END) = ?1
                    OR (CASE WHEN json_valid(event_data) THEN json_extract(event_data, '$.property_id') END) = ?1
                 ORDER BY id ASC
                "#,
            )
            .bind(to_i64(item_id)?),
        )
        .await
    }

    async fn by_event_type(&self, event_type: &str) -> LedgerResult<Vec<LedgerEntry>> {
        self.fetch_all(
            "entries by type",
            sqlx::query(
                r#"
                SELECT id, event_id, event_type, event_data, hash, prev_hash, nonce, created_at, created_by
                  FROM ledger_entries
                 WHERE event_type = ?
                 ORDER BY id ASC
                "#,
            )
            .bind(event_type),
        )
        .await
    }

    async fn recent(&self, limit: usize) -> LedgerResult<Vec<LedgerEntry>> {
        self.fetch_all(
            "recent entries",
            sqlx::query(
                r#"
                SELECT id, event_id, event_type, event_data, hash, prev_hash, nonce, created_at, created_by
                  FROM ledger_entries
                 ORDER BY id DESC
                 LIMIT ?
                "#,
            )
            .bind(to_i64(limit)?),
        )
        .await
    }

    async fn close(&self) -> LedgerResult<()> {
        self.write_pool.close().await;
        self.read_pool.close().await;
        Ok(())
    }
}

async fn select_tail_hash<'e, E>(executor: E) -> LedgerResult<String>
where
    E: Executor<'e, Database = Sqlite>,
{
    let tail: Option<String> =
        sqlx::query_scalar("SELECT hash FROM ledger_entries ORDER BY id DESC LIMIT 1")
            .fetch_optional(executor)
            .await
            .map_err(|e| map_sqlx_error("read tail hash", e))?;
    Ok(tail.unwrap_or_else(|| GENESIS_HASH.to_string()))
}

async fn insert_entry<'e, E>(executor: E, entry: &NewLedgerEntry) -> LedgerResult<LedgerEntry>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO ledger_entries
            (event_id, event_type, event_data, hash, prev_hash, nonce, created_by)
        VALUES
            (?, ?, ?, ?, ?, ?, ?)
        RETURNING id, event_id, event_type, event_data, hash, prev_hash, nonce, created_at, created_by
        "#,
    )
    .bind(entry.event_id.as_str())
    .bind(entry.event_type.as_str())
    .bind(entry.event_data.as_str())
    .bind(entry.hash.as_str())
    .bind(entry.prev_hash.as_str())
    .bind(entry.nonce)
    .bind(to_i64(entry.created_by)?)
    .fetch_one(executor)
    .await
    .map_err(|e| map_insert_error(&entry.event_id, e))?;
    decode_entry(&row)
}

fn decode_entry(row: &SqliteRow) -> LedgerResult<LedgerEntry> {
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let created_by: i64 = row.try_get("created_by").map_err(decode_error)?;
    Ok(LedgerEntry {
        id: row.try_get("id").map_err(decode_error)?,
        event_id: row.try_get("event_id").map_err(decode_error)?,
        event_type: row.try_get("event_type").map_err(decode_error)?,
        event_data: row.try_get("event_data").map_err(decode_error)?,
        hash: row.try_get("hash").map_err(decode_error)?,
        prev_hash: row.try_get("prev_hash").map_err(decode_error)?,
        nonce: row.try_get("nonce").map_err(decode_error)?,
        created_at: parse_timestamp(&created_at)?,
        created_by: to_u64(created_by)?,
    })
}

fn decode_error(err: sqlx::Error) -> LedgerError {
    LedgerError::backend("decode ledger row", err)
}

fn parse_timestamp(raw: &str) -> LedgerResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| LedgerError::Serialization(format!("invalid created_at {raw:?}: {e}")))
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteEntryStore {
        let store = SqliteEntryStore::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn draft(event_id: &str) -> EntryDraft {
        EntryDraft {
            event_id: event_id.to_string(),
            event_type: "StatusChange".to_string(),
            event_data: r#"{"event_type":"StatusChange","item_id":3,"user_id":8}"#.to_string(),
            created_by: 8,
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = store().await;
        store.migrate().await.unwrap();
        assert_eq!(store.tail_hash().await.unwrap(), GENESIS_HASH);
    }

    #[tokio::test]
    async fn serialized_append_links_to_tail() {
        let store = store().await;
        let first = store.append_serialized(draft("a"), 1).await.unwrap();
        let second = store.append_serialized(draft("b"), 2).await.unwrap();

        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.hash);
        assert!(second.id > first.id);
        assert_eq!(second.nonce, Some(2));
        assert_eq!(second.created_by, 8);
        assert_eq!(store.tail_hash().await.unwrap(), second.hash);

        let prev = store.find_predecessor(second.id).await.unwrap().unwrap();
        assert_eq!(prev.event_id, "a");
        assert!(store.find_predecessor(first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_event_id_is_rejected() {
        let store = store().await;
        store.append_serialized(draft("dup"), 1).await.unwrap();
        let err = store.append_serialized(draft("dup"), 2).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEvent(ref id) if id == "dup"));
        assert_eq!(store.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn triggers_reject_update_and_delete() {
        let store = store().await;
        store.append_serialized(draft("locked"), 1).await.unwrap();

        let err = sqlx::query("UPDATE ledger_entries SET event_data = '{}'")
            .execute(store.write_pool())
            .await
            .unwrap_err();
        assert!(matches!(
            map_sqlx_error("update", err),
            LedgerError::ImmutableEntry(_)
        ));

        let err = sqlx::query("DELETE FROM ledger_entries")
            .execute(store.write_pool())
            .await
            .unwrap_err();
        assert!(matches!(
            map_sqlx_error("delete", err),
            LedgerError::ImmutableEntry(_)
        ));
        assert_eq!(store.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn item_filter_matches_item_and_property_ids() {
        let store = store().await;
        store.append_serialized(draft("by-item"), 1).await.unwrap();
        let mut by_property = draft("by-property");
        by_property.event_data = r#"{"property_id":3}"#.to_string();
        store.append_serialized(by_property, 2).await.unwrap();
        let mut other = draft("other");
        other.event_data = r#"{"item_id":33}"#.to_string();
        store.append_serialized(other, 3).await.unwrap();

        let ids: Vec<_> = store
            .entries_for_item(3)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.event_id)
            .collect();
        assert_eq!(ids, vec!["by-item".to_string(), "by-property".to_string()]);
    }

    #[tokio::test]
    async fn on_disk_database_uses_separate_pools() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
        let store = SqliteEntryStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();
        store.append_serialized(draft("disk"), 1).await.unwrap();
        assert!(store.find_by_event_id("disk").await.unwrap().is_some());
        assert_eq!(store.recent(10).await.unwrap().len(), 1);
        store.close().await.unwrap();
    }

    #[test]
    fn parses_sqlite_timestamps() {
        let parsed = parse_timestamp("2026-10-19 08:30:15.250").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-10-19T08:30:15.250+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
