//! PostgreSQL entry store.
//!
//! The production backend. `event_data` is kept as TEXT so the stored bytes
//! are exactly the bytes that were hashed; JSON lookups cast to `jsonb`.

use crate::hash::GENESIS_HASH;
use crate::model::{EntryDraft, LedgerEntry, NewLedgerEntry};
use crate::sql::{map_insert_error, map_sqlx_error, to_i64, to_u64};
use crate::store::EntryStore;
use crate::{LedgerError, LedgerResult};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Executor, Postgres, Row};
use std::time::Duration;
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id BIGSERIAL PRIMARY KEY,
        event_id TEXT NOT NULL UNIQUE,
        event_type TEXT NOT NULL,
        event_data TEXT NOT NULL,
        hash TEXT NOT NULL,
        prev_hash TEXT NOT NULL,
        nonce BIGINT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        created_by BIGINT NOT NULL DEFAULT 0
    )
"#;

const EVENT_DATA_TYPE: &str = r#"
    SELECT data_type::text
      FROM information_schema.columns
     WHERE table_schema = current_schema()
       AND table_name = 'ledger_entries'
       AND column_name = 'event_data'
"#;

const SCHEMA: [&str; 10] = [
    // Tables created before the nonce was persisted.
    "ALTER TABLE ledger_entries ADD COLUMN IF NOT EXISTS nonce BIGINT",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_event_type ON ledger_entries(event_type)",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_created_at ON ledger_entries(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_created_by ON ledger_entries(created_by)",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_event_data ON ledger_entries USING gin ((event_data::jsonb))",
    r#"
    CREATE OR REPLACE FUNCTION prevent_ledger_modification()
    RETURNS TRIGGER AS $$
    BEGIN
        RAISE EXCEPTION 'Ledger entries are immutable and cannot be modified or deleted';
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS prevent_ledger_update ON ledger_entries",
    r#"
    CREATE TRIGGER prevent_ledger_update
    BEFORE UPDATE ON ledger_entries
    FOR EACH ROW
    EXECUTE FUNCTION prevent_ledger_modification()
    "#,
    "DROP TRIGGER IF EXISTS prevent_ledger_delete ON ledger_entries",
    r#"
    CREATE TRIGGER prevent_ledger_delete
    BEFORE DELETE ON ledger_entries
    FOR EACH ROW
    EXECUTE FUNCTION prevent_ledger_modification()
    "#,
];

const ITEM_HISTORY: &str = r#"
    SELECT id, event_id, event_type, event_data::text AS event_data, hash, prev_hash, nonce, created_at, created_by
      FROM ledger_entries
     WHERE event_data::jsonb @> jsonb_build_object('item_id', $1::bigint)
        OR event_data::jsonb @> jsonb_build_object('property_id', $1::bigint)
     ORDER BY id ASC
"#;

/// PostgreSQL-backed [`EntryStore`].
#[derive(Clone)]
pub struct PostgresEntryStore {
    pool: PgPool,
}

impl PostgresEntryStore {
    pub async fn connect(database_url: &str) -> LedgerResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::backend("connect postgres", e))?;
        debug!(max_connections, "postgres ledger pool opened");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_all<'q>(
        &self,
        operation: &str,
        query: Query<'q, Postgres, PgArguments>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .iter()
            .map(decode_entry)
            .collect()
    }

    async fn fetch_optional<'q>(
        &self,
        operation: &str,
        query: Query<'q, Postgres, PgArguments>,
    ) -> LedgerResult<Option<LedgerEntry>> {
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .as_ref()
            .map(decode_entry)
            .transpose()
    }
}

#[async_trait]
impl EntryStore for PostgresEntryStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn migrate(&self) -> LedgerResult<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::backend("postgres schema init failed", e))?;

        let data_type: Option<String> = sqlx::query_scalar(EVENT_DATA_TYPE)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("inspect ledger schema", e))?;
        if let Some(data_type) = data_type {
            check_event_data_type(&data_type)?;
        }

        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::backend("postgres schema init failed", e))?;
        }
        Ok(())
    }

    async fn tail_hash(&self) -> LedgerResult<String> {
        select_tail_hash(&self.pool).await
    }

    async fn insert(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        insert_entry(&self.pool, &entry).await
    }

    async fn append_serialized(&self, draft: EntryDraft, nonce: i64) -> LedgerResult<LedgerEntry> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin append", e))?;
        sqlx::query("LOCK TABLE ledger_entries IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock ledger", e))?;

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
                SELECT id, event_id, event_type, event_data::text AS event_data, hash, prev_hash, nonce, created_at, created_by
                  FROM ledger_entries
                 WHERE event_id = $1
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
                SELECT id, event_id, event_type, event_data::text AS event_data, hash, prev_hash, nonce, created_at, created_by
                  FROM ledger_entries
                 WHERE id < $1
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
                SELECT id, event_id, event_type, event_data::text AS event_data, hash, prev_hash, nonce, created_at, created_by
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
            sqlx::query(ITEM_HISTORY).bind(to_i64(item_id)?),
        )
        .await
    }

    async fn by_event_type(&self, event_type: &str) -> LedgerResult<Vec<LedgerEntry>> {
        self.fetch_all(
            "entries by type",
            sqlx::query(
                r#"
                SELECT id, event_id, event_type, event_data::text AS event_data, hash, prev_hash, nonce, created_at, created_by
                  FROM ledger_entries
                 WHERE event_type = $1
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
                SELECT id, event_id, event_type, event_data::text AS event_data, hash, prev_hash, nonce, created_at, created_by
                  FROM ledger_entries
                 ORDER BY id DESC
                 LIMIT $1
                "#,
            )
            .bind(to_i64(limit)?),
        )
        .await
    }

    async fn close(&self) -> LedgerResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

async fn select_tail_hash<'e, E>(executor: E) -> LedgerResult<String>
where
    E: Executor<'e, Database = Postgres>,
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
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO ledger_entries
            (event_id, event_type, event_data, hash, prev_hash, nonce, created_by)
        VALUES
            ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, event_id, event_type, event_data::text AS event_data, hash, prev_hash, nonce, created_at, created_by
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

/// `event_data` must keep the exact bytes that were hashed; `json` and `jsonb`
/// columns re-render the payload and reject text binds.
fn check_event_data_type(data_type: &str) -> LedgerResult<()> {
    match data_type {
        "text" | "character varying" => Ok(()),
        other => Err(LedgerError::Config(format!(
            "ledger_entries.event_data is {other}; it must be TEXT so entry hashes can be recomputed"
        ))),
    }
}

fn decode_entry(row: &PgRow) -> LedgerResult<LedgerEntry> {
    let created_by: i64 = row
        .try_get("created_by")
        .map_err(|e| LedgerError::backend("decode ledger row", e))?;
    Ok(LedgerEntry {
        id: row
            .try_get("id")
            .map_err(|e| LedgerError::backend("decode ledger row", e))?,
        event_id: row
            .try_get("event_id")
            .map_err(|e| LedgerError::backend("decode ledger row", e))?,
        event_type: row
            .try_get("event_type")
            .map_err(|e| LedgerError::backend("decode ledger row", e))?,
        event_data: row
            .try_get("event_data")
            .map_err(|e| LedgerError::backend("decode ledger row", e))?,
        hash: row
            .try_get("hash")
            .map_err(|e| LedgerError::backend("decode ledger row", e))?,
        prev_hash: row
            .try_get("prev_hash")
            .map_err(|e| LedgerError::backend("decode ledger row", e))?,
        nonce: row
            .try_get("nonce")
            .map_err(|e| LedgerError::backend("decode ledger row", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| LedgerError::backend("decode ledger row", e))?,
        created_by: to_u64(created_by)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_guards_updates_and_deletes() {
        let ddl = format!("{CREATE_TABLE}\n{}", SCHEMA.join("\n"));
        assert!(ddl.contains("BEFORE UPDATE ON ledger_entries"));
        assert!(ddl.contains("BEFORE DELETE ON ledger_entries"));
        assert!(ddl.contains("RAISE EXCEPTION 'Ledger entries are immutable"));
        assert!(ddl.contains("event_id TEXT NOT NULL UNIQUE"));
    }

    #[test]
    fn trigger_function_precedes_triggers() {
        let position = |needle: &str| SCHEMA.iter().position(|stmt| stmt.contains(needle));
        let function = position("CREATE OR REPLACE FUNCTION").unwrap();
        let update = position("CREATE TRIGGER prevent_ledger_update").unwrap();
        let delete = position("CREATE TRIGGER prevent_ledger_delete").unwrap();
        assert!(function < update && function < delete);
    }

    #[test]
    fn item_history_matches_both_id_fields() {
        assert!(ITEM_HISTORY.contains("jsonb_build_object('item_id', $1::bigint)"));
        assert!(ITEM_HISTORY.contains("jsonb_build_object('property_id', $1::bigint)"));
        assert!(ITEM_HISTORY.contains("ORDER BY id ASC"));
    }

    #[test]
    fn jsonb_event_data_column_is_rejected() {
        assert!(check_event_data_type("text").is_ok());
        assert!(check_event_data_type("character varying").is_ok());

        let err = check_event_data_type("jsonb").unwrap_err();
        assert!(matches!(err, LedgerError::Config(ref msg) if msg.contains("must be TEXT")));
        assert!(matches!(
            check_event_data_type("json"),
            Err(LedgerError::Config(_))
        ));
    }

    #[test]
    fn schema_inspection_targets_event_data_column() {
        assert!(EVENT_DATA_TYPE.contains("information_schema.columns"));
        assert!(EVENT_DATA_TYPE.contains("column_name = 'event_data'"));
        assert!(CREATE_TABLE.contains("event_data TEXT NOT NULL"));
    }
}
