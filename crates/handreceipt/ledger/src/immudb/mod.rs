//! Ledger engine over an immutable key-value store (immudb).
//!
//! Each event is written under its event id with the JSON payload as value.
//! Integrity is the store's responsibility: document verification is a
//! verified read, and chain verification reports success without walking
//! anything. History and correction projections are not served by this
//! backend and return empty results.

mod client;

pub use client::{ImmudbRestClient, ImmudbSettings};

use crate::event::LedgerEvent;
use crate::model::{ChainReport, CorrectionEvent, GeneralLedgerEvent, HistoryRecord};
use crate::traits::LedgerService;
use crate::{LedgerError, LedgerResult};
use async_trait::async_trait;
use tracing::{debug, info};

/// Minimal surface of an immutable, verifiable key-value store.
#[async_trait]
pub trait ImmutableKv: Send + Sync {
    async fn open_session(&self) -> LedgerResult<()>;

    /// Write `value` under `key` and return the committing transaction id.
    async fn set(&self, key: &str, value: &[u8]) -> LedgerResult<u64>;

    /// Read `key` with server-side proof verification. `None` when absent.
    async fn verified_get(&self, key: &str) -> LedgerResult<Option<Vec<u8>>>;

    async fn close_session(&self) -> LedgerResult<()>;
}

/// [`LedgerService`] backed by an [`ImmutableKv`].
pub struct ImmudbLedgerService<K> {
    kv: K,
}

impl<K: ImmutableKv> ImmudbLedgerService<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }
}

#[async_trait]
impl<K: ImmutableKv> LedgerService for ImmudbLedgerService<K> {
    fn backend_name(&self) -> &'static str {
        "immudb"
    }

    async fn initialize(&self) -> LedgerResult<()> {
        self.kv.open_session().await?;
        info!("immudb ledger session opened");
        Ok(())
    }

    async fn close(&self) -> LedgerResult<()> {
        self.kv.close_session().await?;
        info!("immudb ledger session closed");
        Ok(())
    }

    async fn append(&self, event: LedgerEvent) -> LedgerResult<String> {
        let payload = event.payload()?;
        let value = serde_json::to_vec(&payload)?;
        let event_id = event.event_id();
        let tx_id = self.kv.set(&event_id, &value).await?;
        debug!(event_id = %event_id, event_type = event.event_type(), tx_id, "event stored in immudb");
        Ok(event_id)
    }

    async fn get_property_history(&self, _item_id: u64) -> LedgerResult<Vec<HistoryRecord>> {
        Ok(Vec::new())
    }

    async fn verify_document(&self, event_id: &str, _table_hint: &str) -> LedgerResult<bool> {
        Ok(self.kv.verified_get(event_id).await?.is_some())
    }

    async fn verify_chain_integrity(&self) -> LedgerResult<ChainReport> {
        info!("chain integrity is enforced by immudb");
        Ok(ChainReport::default())
    }

    async fn get_all_correction_events(&self) -> LedgerResult<Vec<CorrectionEvent>> {
        Ok(Vec::new())
    }

    async fn get_correction_events_by_original_id(
        &self,
        _original_event_id: &str,
    ) -> LedgerResult<Vec<CorrectionEvent>> {
        Ok(Vec::new())
    }

    async fn get_correction_event_by_id(&self, event_id: &str) -> LedgerResult<CorrectionEvent> {
        Err(LedgerError::NotFound(format!("correction event {event_id}")))
    }

    async fn get_general_history(&self) -> LedgerResult<Vec<GeneralLedgerEvent>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryKv {
        values: Mutex<HashMap<String, Vec<u8>>>,
        sessions: Mutex<u32>,
    }

    #[async_trait]
    impl ImmutableKv for MemoryKv {
        async fn open_session(&self) -> LedgerResult<()> {
            *self.sessions.lock().unwrap() += 1;
            Ok(())
        }

        async fn set(&self, key: &str, value: &[u8]) -> LedgerResult<u64> {
            let mut values = self.values.lock().unwrap();
            values.insert(key.to_string(), value.to_vec());
            Ok(values.len() as u64)
        }

        async fn verified_get(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn close_session(&self) -> LedgerResult<()> {
            *self.sessions.lock().unwrap() -= 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_are_keyed_by_event_id() {
        let ledger = ImmudbLedgerService::new(MemoryKv::default());
        ledger.initialize().await.unwrap();
        let event_id = ledger
            .log_da2062_export(4, 12, "email", Some("s4@unit.mil"))
            .await
            .unwrap();

        let stored = ledger.kv().verified_get(&event_id).await.unwrap().unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(payload["event_type"], "DA2062Export");
        assert_eq!(payload["recipients"], "s4@unit.mil");

        assert!(ledger.verify_document(&event_id, "").await.unwrap());
        assert!(!ledger.verify_document("missing", "").await.unwrap());
        ledger.close().await.unwrap();
        assert_eq!(*ledger.kv().sessions.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn projections_are_not_served() {
        let ledger = ImmudbLedgerService::new(MemoryKv::default());
        ledger
            .log_correction_event("transfer_1_1", "TransferEvent", "typo", 2)
            .await
            .unwrap();
        assert!(ledger.get_all_correction_events().await.unwrap().is_empty());
        assert!(ledger.get_property_history(1).await.unwrap().is_empty());
        assert!(ledger.get_general_history().await.unwrap().is_empty());
        assert!(ledger
            .get_correction_event_by_id("transfer_1_1")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(ledger.verify_chain_integrity().await.unwrap().is_valid());
    }
}
