//! In-memory ledger for tests.
//!
//! Records every appended event in order so callers can assert on what was
//! logged. There is no hash chain: stored entries carry empty hashes and
//! chain verification always succeeds.

use crate::event::{extract_created_by, kind, LedgerEvent};
use crate::model::{ChainReport, CorrectionEvent, GeneralLedgerEvent, HistoryRecord, LedgerEntry};
use crate::projection;
use crate::traits::LedgerService;
use crate::{LedgerError, LedgerResult, DEFAULT_HISTORY_LIMIT};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{RwLock, RwLockReadGuard};

/// In-memory [`LedgerService`].
pub struct InMemoryLedgerService {
    entries: RwLock<Vec<LedgerEntry>>,
    history_limit: usize,
}

impl Default for InMemoryLedgerService {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl InMemoryLedgerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound `get_general_history` to `limit` entries.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            history_limit: limit,
        }
    }

    /// Snapshot of every recorded entry, oldest first.
    pub fn events(&self) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.read()?.clone())
    }

    /// Whether an event of `event_type` has been recorded.
    pub fn has_event(&self, event_type: &str) -> LedgerResult<bool> {
        Ok(self
            .read()?
            .iter()
            .any(|entry| entry.event_type == event_type))
    }

    pub fn len(&self) -> LedgerResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> LedgerResult<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, Vec<LedgerEntry>>> {
        self.entries
            .read()
            .map_err(|_| LedgerError::Backend("ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerService for InMemoryLedgerService {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn initialize(&self) -> LedgerResult<()> {
        Ok(())
    }

    async fn close(&self) -> LedgerResult<()> {
        Ok(())
    }

    async fn append(&self, event: LedgerEvent) -> LedgerResult<String> {
        let payload = event.payload()?;
        let event_data = serde_json::to_string(&payload)?;
        let event_id = event.event_id();

        let mut guard = self
            .entries
            .write()
            .map_err(|_| LedgerError::Backend("ledger lock poisoned".to_string()))?;
        if guard.iter().any(|entry| entry.event_id == event_id) {
            return Err(LedgerError::DuplicateEvent(event_id));
        }
        let id = i64::try_from(guard.len()).unwrap_or(i64::MAX - 1) + 1;
        guard.push(LedgerEntry {
            id,
            event_id: event_id.clone(),
            event_type: event.event_type().to_string(),
            event_data,
            hash: String::new(),
            prev_hash: String::new(),
            nonce: None,
            created_at: Utc::now(),
            created_by: extract_created_by(&payload),
        });
        Ok(event_id)
    }

    async fn get_property_history(&self, item_id: u64) -> LedgerResult<Vec<HistoryRecord>> {
        Ok(self
            .read()?
            .iter()
            .filter_map(projection::history_record)
            .filter(|record| projection::mentions_item(record, item_id))
            .collect())
    }

    async fn verify_document(&self, event_id: &str, _table_hint: &str) -> LedgerResult<bool> {
        Ok(self.read()?.iter().any(|entry| entry.event_id == event_id))
    }

    async fn verify_chain_integrity(&self) -> LedgerResult<ChainReport> {
        Ok(ChainReport {
            entries_checked: self.read()?.len() as u64,
            errors: Vec::new(),
        })
    }

    async fn get_all_correction_events(&self) -> LedgerResult<Vec<CorrectionEvent>> {
        Ok(self
            .read()?
            .iter()
            .filter_map(projection::correction_event)
            .collect())
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
        self.read()?
            .iter()
            .filter(|entry| entry.event_type == kind::CORRECTION && entry.event_id == event_id)
            .find_map(projection::correction_event)
            .ok_or_else(|| LedgerError::NotFound(format!("correction event {event_id}")))
    }

    async fn get_general_history(&self) -> LedgerResult<Vec<GeneralLedgerEvent>> {
        Ok(self
            .read()?
            .iter()
            .rev()
            .take(self.history_limit)
            .filter_map(projection::general_event)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MaintenanceRecord, Transfer};

    #[tokio::test]
    async fn records_events_in_order() {
        let ledger = InMemoryLedgerService::new();
        assert!(ledger.is_empty().unwrap());

        ledger
            .log_status_change(3, "SN-3", "Operational", "Lost", 1)
            .await
            .unwrap();
        ledger
            .log_maintenance_event(&MaintenanceRecord {
                record_id: "mr-1".to_string(),
                item_id: 3,
                initiating_user_id: 42,
                performing_user_id: None,
                event_type: "Scheduled".to_string(),
                maintenance_type: Some("PMCS".to_string()),
                description: "quarterly service".to_string(),
            })
            .await
            .unwrap();

        let events = ledger.events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "StatusChange");
        assert_eq!(events[1].created_by, 42);
        assert!(ledger.has_event("MaintenanceEvent").unwrap());
        assert!(!ledger.has_event("TransferEvent").unwrap());
    }

    #[tokio::test]
    async fn general_history_honours_configured_limit() {
        let ledger = InMemoryLedgerService::with_history_limit(2);
        for item in 1..=4 {
            ledger
                .log_verification_event(item, "SN", 1, "cyclic")
                .await
                .unwrap();
        }
        let items: Vec<_> = ledger
            .get_general_history()
            .await
            .unwrap()
            .iter()
            .map(|event| event.item_id)
            .collect();
        assert_eq!(items, vec![Some(4), Some(3)]);
    }

    #[tokio::test]
    async fn history_and_corrections_read_back() {
        let ledger = InMemoryLedgerService::new();
        ledger
            .log_transfer_event(
                &Transfer {
                    id: 1,
                    property_id: 17,
                    from_user_id: 1,
                    to_user_id: 2,
                    status: "Requested".to_string(),
                    request_date: Utc::now(),
                    notes: None,
                },
                "SN-17",
            )
            .await
            .unwrap();
        let correction = ledger
            .log_correction_event("transfer_1_1", "TransferEvent", "wrong unit", 9)
            .await
            .unwrap();

        let history = ledger.get_property_history(17).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["event_type"], "TransferEvent");

        let found = ledger.get_correction_event_by_id(&correction).await.unwrap();
        assert_eq!(found.correcting_user_id, 9);
        assert!(ledger
            .get_correction_event_by_id("does-not-exist")
            .await
            .unwrap_err()
            .is_not_found());

        assert!(ledger.verify_document(&correction, "").await.unwrap());
        assert!(ledger.verify_chain_integrity().await.unwrap().is_valid());
        assert_eq!(ledger.get_general_history().await.unwrap()[0].event_id, correction);
    }
}
