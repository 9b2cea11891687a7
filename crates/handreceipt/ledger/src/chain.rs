//! Relational hash-chain engine.
//!
//! [`ChainedLedger`] implements [`LedgerService`] over any [`EntryStore`]:
//! it serializes events, links them to the current tail, and walks the
//! stored chain to verify it. The tail is always read from the store.

use crate::event::{extract_created_by, kind, LedgerEvent};
use crate::hash::{write_nonce, GENESIS_HASH};
use crate::model::{
    ChainReport, CorrectionEvent, EntryDraft, GeneralLedgerEvent, HistoryRecord, LedgerEntry,
};
use crate::projection;
use crate::store::EntryStore;
use crate::traits::LedgerService;
use crate::{LedgerError, LedgerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on `get_general_history`.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// How the tail read and the insert of an append are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppendMode {
    /// Tail read, hash and insert run in one write transaction.
    #[default]
    Serialized,
    /// Tail read and insert are separate statements. Concurrent appenders may
    /// fork the chain; verification reports the fork.
    Unserialized,
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub append_mode: AppendMode,
    pub history_limit: usize,
    pub operation_timeout: Option<Duration>,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            append_mode: AppendMode::Serialized,
            history_limit: DEFAULT_HISTORY_LIMIT,
            operation_timeout: None,
        }
    }
}

/// Hash-chained ledger over a relational [`EntryStore`].
pub struct ChainedLedger<S> {
    store: S,
    settings: ChainSettings,
}

impl<S: EntryStore> ChainedLedger<S> {
    pub fn new(store: S) -> Self {
        Self::with_settings(store, ChainSettings::default())
    }

    pub fn with_settings(store: S, settings: ChainSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    /// Raw stored entry for `event_id`.
    pub async fn entry(&self, event_id: &str) -> LedgerResult<Option<LedgerEntry>> {
        self.bounded("find_by_event_id", self.store.find_by_event_id(event_id))
            .await
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> LedgerResult<T>
    where
        F: Future<Output = LedgerResult<T>> + Send,
    {
        match self.settings.operation_timeout {
            None => fut.await,
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                LedgerError::Timeout {
                    operation,
                    millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
            })?,
        }
    }

    fn draft(event: &LedgerEvent, nonce: i64) -> LedgerResult<EntryDraft> {
        let payload = event.payload()?;
        let event_data = serde_json::to_string(&payload)?;
        Ok(EntryDraft {
            event_id: event.event_id_at(nonce),
            event_type: event.event_type().to_string(),
            event_data,
            created_by: extract_created_by(&payload),
        })
    }
}

#[async_trait]
impl<S: EntryStore> LedgerService for ChainedLedger<S> {
    fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    async fn initialize(&self) -> LedgerResult<()> {
        self.bounded("migrate", self.store.migrate()).await?;
        info!(backend = self.store.name(), append_mode = ?self.settings.append_mode, "ledger initialized");
        Ok(())
    }

    async fn close(&self) -> LedgerResult<()> {
        self.store.close().await?;
        info!(backend = self.store.name(), "ledger closed");
        Ok(())
    }

    async fn append(&self, event: LedgerEvent) -> LedgerResult<String> {
        let nonce = write_nonce();
        let draft = Self::draft(&event, nonce)?;

        let entry = match self.settings.append_mode {
            AppendMode::Serialized => {
                self.bounded("append", self.store.append_serialized(draft, nonce))
                    .await?
            }
            AppendMode::Unserialized => {
                let prev_hash = self.bounded("tail_hash", self.store.tail_hash()).await?;
                self.bounded("insert", self.store.insert(draft.seal(&prev_hash, nonce)))
                    .await?
            }
        };

        debug!(
            entry_id = entry.id,
            event_id = %entry.event_id,
            event_type = %entry.event_type,
            "ledger entry appended"
        );
        Ok(entry.event_id)
    }

    async fn get_property_history(&self, item_id: u64) -> LedgerResult<Vec<HistoryRecord>> {
        let entries = self
            .bounded("entries_for_item", self.store.entries_for_item(item_id))
            .await?;
        Ok(entries
            .iter()
            .filter_map(|entry| {
                let record = projection::history_record(entry)?;
                projection::mentions_item(&record, item_id).then_some(record)
            })
            .collect())
    }

    async fn verify_document(&self, event_id: &str, _table_hint: &str) -> LedgerResult<bool> {
        let Some(entry) = self.entry(event_id).await? else {
            return Ok(false);
        };
        let prev_hash = self
            .bounded("find_predecessor", self.store.find_predecessor(entry.id))
            .await?
            .map(|prev| prev.hash)
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        match entry.recompute_hash(&prev_hash) {
            Some(expected) if expected == entry.hash => Ok(true),
            Some(expected) => {
                warn!(event_id, expected = %expected, stored = %entry.hash, "document hash mismatch");
                Ok(false)
            }
            None => Ok(entry.prev_hash == prev_hash),
        }
    }

    async fn verify_chain_integrity(&self) -> LedgerResult<ChainReport> {
        let entries = self.bounded("scan", self.store.scan()).await?;
        let mut report = ChainReport::default();
        let mut expected_prev = GENESIS_HASH.to_string();

        for entry in &entries {
            report.entries_checked += 1;
            if let Some(recomputed) = entry.recompute_hash(&expected_prev) {
                if recomputed != entry.hash {
                    report.hash_mismatch(entry.id);
                }
            }
            if entry.prev_hash != expected_prev {
                report.prev_hash_mismatch(entry.id);
            }
            expected_prev.clone_from(&entry.hash);
        }

        if report.is_valid() {
            info!(entries = report.entries_checked, "ledger chain verified");
        } else {
            warn!(
                entries = report.entries_checked,
                failures = report.errors.len(),
                "ledger chain verification failed"
            );
        }
        Ok(report)
    }

    async fn get_all_correction_events(&self) -> LedgerResult<Vec<CorrectionEvent>> {
        let entries = self
            .bounded("by_event_type", self.store.by_event_type(kind::CORRECTION))
            .await?;
        Ok(entries.iter().filter_map(projection::correction_event).collect())
    }

    async fn get_correction_events_by_original_id(
        &self,
        original_event_id: &str,
    ) -> LedgerResult<Vec<CorrectionEvent>> {
        Ok(self
            .get_all_correction_events()
            .await?
            .into_iter()
            .filter(|event| event.original_event_id == original_event_id)
            .collect())
    }

    async fn get_correction_event_by_id(&self, event_id: &str) -> LedgerResult<CorrectionEvent> {
        let entry = self
            .entry(event_id)
            .await?
            .filter(|entry| entry.event_type == kind::CORRECTION)
            .ok_or_else(|| LedgerError::NotFound(format!("correction event {event_id}")))?;
        projection::correction_event(&entry).ok_or_else(|| {
            LedgerError::Serialization(format!("correction event {event_id} has a malformed payload"))
        })
    }

    async fn get_general_history(&self) -> LedgerResult<Vec<GeneralLedgerEvent>> {
        let entries = self
            .bounded("recent", self.store.recent(self.settings.history_limit))
            .await?;
        Ok(entries.iter().filter_map(projection::general_event).collect())
    }
}
