use crate::hash::calculate_hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One persisted, hash-linked ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub event_id: String,
    pub event_type: String,
    /// Payload exactly as it was hashed.
    pub event_data: String,
    pub hash: String,
    pub prev_hash: String,
    /// `None` for rows written before the nonce was persisted.
    pub nonce: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub created_by: u64,
}

impl LedgerEntry {
    /// Recompute this entry's hash against `prev_hash`.
    ///
    /// Returns `None` when the nonce was never recorded.
    pub fn recompute_hash(&self, prev_hash: &str) -> Option<String> {
        self.nonce
            .map(|nonce| calculate_hash(&self.event_data, prev_hash, nonce))
    }
}

/// A serialized event that has not yet been linked into the chain.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub event_id: String,
    pub event_type: String,
    pub event_data: String,
    pub created_by: u64,
}

impl EntryDraft {
    /// Link the draft to `prev_hash` and compute its hash.
    pub fn seal(self, prev_hash: &str, nonce: i64) -> NewLedgerEntry {
        let hash = calculate_hash(&self.event_data, prev_hash, nonce);
        NewLedgerEntry {
            event_id: self.event_id,
            event_type: self.event_type,
            event_data: self.event_data,
            hash,
            prev_hash: prev_hash.to_string(),
            nonce,
            created_by: self.created_by,
        }
    }
}

/// Insert payload. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub event_id: String,
    pub event_type: String,
    pub event_data: String,
    pub hash: String,
    pub prev_hash: String,
    pub nonce: i64,
    pub created_by: u64,
}

/// Decoded payload annotated with `ledger_id`, `ledger_hash` and
/// `ledger_created_at`.
pub type HistoryRecord = Map<String, Value>;

/// Read-side view of a `CorrectionEvent` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionEvent {
    pub event_id: String,
    pub original_event_id: String,
    pub original_event_type: String,
    pub reason: String,
    pub correcting_user_id: u64,
    pub correction_timestamp: DateTime<Utc>,
}

/// One row of the consolidated, newest-first ledger view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralLedgerEvent {
    pub event_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<u64>,
    pub details: Map<String, Value>,
}

/// Outcome of a full-chain walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub entries_checked: u64,
    pub errors: Vec<String>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn hash_mismatch(&mut self, id: i64) {
        self.errors.push(format!("Hash mismatch at entry ID: {id}"));
    }

    pub(crate) fn prev_hash_mismatch(&mut self, id: i64) {
        self.errors
            .push(format!("Previous hash mismatch at entry ID: {id}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::GENESIS_HASH;

    #[test]
    fn sealed_entry_links_to_previous_hash() {
        let draft = EntryDraft {
            event_id: "status_change_1_1".to_string(),
            event_type: "StatusChange".to_string(),
            event_data: r#"{"item_id":1}"#.to_string(),
            created_by: 3,
        };
        let sealed = draft.seal(GENESIS_HASH, 42);
        assert_eq!(sealed.prev_hash, GENESIS_HASH);
        assert_eq!(
            sealed.hash,
            "ffc9761d9bbfd53fc4a257662651ce9bc234b66b6311f83d2a9978ed28f9a9b7"
        );
    }

    #[test]
    fn legacy_rows_cannot_be_rehashed() {
        let entry = LedgerEntry {
            id: 1,
            event_id: "e".to_string(),
            event_type: "StatusChange".to_string(),
            event_data: "{}".to_string(),
            hash: "h".to_string(),
            prev_hash: GENESIS_HASH.to_string(),
            nonce: None,
            created_at: Utc::now(),
            created_by: 0,
        };
        assert!(entry.recompute_hash(GENESIS_HASH).is_none());
    }

    #[test]
    fn general_event_omits_absent_ids() {
        let event = GeneralLedgerEvent {
            event_id: "e".to_string(),
            event_type: "DA2062Export".to_string(),
            timestamp: Utc::now(),
            user_id: Some(4),
            item_id: None,
            details: Map::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["userId"], 4);
        assert!(json.get("itemId").is_none());
        assert!(json.get("eventType").is_some());
    }

    #[test]
    fn report_collects_messages() {
        let mut report = ChainReport::default();
        assert!(report.is_valid());
        report.prev_hash_mismatch(7);
        report.hash_mismatch(7);
        assert!(!report.is_valid());
        assert_eq!(
            report.errors,
            vec![
                "Previous hash mismatch at entry ID: 7".to_string(),
                "Hash mismatch at entry ID: 7".to_string()
            ]
        );
    }
}
