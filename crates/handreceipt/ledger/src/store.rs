use crate::model::{EntryDraft, LedgerEntry, NewLedgerEntry};
use crate::LedgerResult;
use async_trait::async_trait;

/// Row-level persistence for the relational hash-chain engine.
///
/// Stores only move rows; hashing, verification and projection live in
/// [`ChainedLedger`](crate::ChainedLedger). Every listing is in chain order
/// (`id` ascending) unless stated otherwise.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Short backend label (`"postgres"`, `"sqlite"`).
    fn name(&self) -> &'static str;

    /// Create the table, indexes and immutability triggers if missing.
    async fn migrate(&self) -> LedgerResult<()>;

    /// Hash of the highest-id row, or `GENESIS` for an empty table.
    async fn tail_hash(&self) -> LedgerResult<String>;

    /// Insert an already-sealed entry.
    async fn insert(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry>;

    /// Read the tail, seal `draft` against it and insert, holding the write
    /// lock for the whole sequence.
    async fn append_serialized(&self, draft: EntryDraft, nonce: i64) -> LedgerResult<LedgerEntry>;

    async fn find_by_event_id(&self, event_id: &str) -> LedgerResult<Option<LedgerEntry>>;

    /// The highest-id row below `id`.
    async fn find_predecessor(&self, id: i64) -> LedgerResult<Option<LedgerEntry>>;

    /// Every row.
    async fn scan(&self) -> LedgerResult<Vec<LedgerEntry>>;

    /// Candidate rows whose payload may reference `item_id` through
    /// `item_id` or `property_id`. Callers confirm the match on the decoded
    /// payload.
    async fn entries_for_item(&self, item_id: u64) -> LedgerResult<Vec<LedgerEntry>>;

    async fn by_event_type(&self, event_type: &str) -> LedgerResult<Vec<LedgerEntry>>;

    /// Newest `limit` rows, newest first.
    async fn recent(&self, limit: usize) -> LedgerResult<Vec<LedgerEntry>>;

    async fn close(&self) -> LedgerResult<()>;
}
