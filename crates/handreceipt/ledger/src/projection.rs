//! Read-side projections of stored entries.
//!
//! Stored payloads are decoded leniently: a row whose JSON cannot be decoded
//! into the requested shape is logged and skipped, never surfaced as an error
//! of the whole query.

use crate::event::{as_user_id, kind};
use crate::model::{CorrectionEvent, GeneralLedgerEvent, HistoryRecord, LedgerEntry};
use serde_json::{Map, Value};
use tracing::warn;

/// Decode a stored payload into a JSON object.
pub fn decode_payload(entry: &LedgerEntry) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(&entry.event_data) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            warn!(entry_id = entry.id, event_id = %entry.event_id, "ledger payload is not a JSON object; skipping");
            None
        }
        Err(err) => {
            warn!(entry_id = entry.id, event_id = %entry.event_id, error = %err, "failed to decode ledger payload; skipping");
            None
        }
    }
}

/// Whether the payload refers to `item_id` through `item_id` or `property_id`.
pub fn mentions_item(payload: &Map<String, Value>, item_id: u64) -> bool {
    ["item_id", "property_id"]
        .iter()
        .any(|field| payload.get(*field).and_then(as_user_id) == Some(item_id))
}

/// Payload annotated with the entry's ledger coordinates.
pub fn history_record(entry: &LedgerEntry) -> Option<HistoryRecord> {
    let mut record = decode_payload(entry)?;
    record.insert("ledger_id".to_string(), Value::from(entry.id));
    record.insert("ledger_hash".to_string(), Value::String(entry.hash.clone()));
    record.insert(
        "ledger_created_at".to_string(),
        Value::String(entry.created_at.to_rfc3339()),
    );
    Some(record)
}

/// Project a `CorrectionEvent` entry. Entries of any other type yield `None`.
pub fn correction_event(entry: &LedgerEntry) -> Option<CorrectionEvent> {
    if entry.event_type != kind::CORRECTION {
        return None;
    }
    let payload = decode_payload(entry)?;
    let text = |field: &str| payload.get(field).and_then(Value::as_str).map(str::to_string);

    let decoded = (|| {
        Some(CorrectionEvent {
            event_id: entry.event_id.clone(),
            original_event_id: text("original_event_id")?,
            original_event_type: text("correction_type")?,
            reason: text("reason")?,
            correcting_user_id: payload.get("user_id").and_then(as_user_id)?,
            correction_timestamp: entry.created_at,
        })
    })();

    if decoded.is_none() {
        warn!(entry_id = entry.id, event_id = %entry.event_id, "correction payload is missing required fields; skipping");
    }
    decoded
}

/// Project any entry into the consolidated history view.
pub fn general_event(entry: &LedgerEntry) -> Option<GeneralLedgerEvent> {
    let details = decode_payload(entry)?;
    let user_id = details.get("user_id").and_then(as_user_id);
    let item_id = details
        .get("item_id")
        .and_then(as_user_id)
        .or_else(|| details.get("property_id").and_then(as_user_id));

    Some(GeneralLedgerEvent {
        event_id: entry.event_id.clone(),
        event_type: entry.event_type.clone(),
        timestamp: entry.created_at,
        user_id,
        item_id,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn entry(id: i64, event_type: &str, data: &str) -> LedgerEntry {
        LedgerEntry {
            id,
            event_id: format!("event_{id}"),
            event_type: event_type.to_string(),
            event_data: data.to_string(),
            hash: format!("hash_{id}"),
            prev_hash: "GENESIS".to_string(),
            nonce: Some(1),
            created_at: Utc::now(),
            created_by: 0,
        }
    }

    #[test]
    fn history_record_is_annotated() {
        let record = history_record(&entry(3, "StatusChange", r#"{"item_id":5}"#)).unwrap();
        assert_eq!(record["item_id"], json!(5));
        assert_eq!(record["ledger_id"], json!(3));
        assert_eq!(record["ledger_hash"], json!("hash_3"));
        assert!(record["ledger_created_at"].is_string());
    }

    #[test]
    fn malformed_payloads_are_skipped() {
        assert!(history_record(&entry(1, "StatusChange", "{not json")).is_none());
        assert!(general_event(&entry(1, "StatusChange", "[1,2]")).is_none());
    }

    #[test]
    fn item_matches_item_or_property_id() {
        let by_property = json!({"property_id": 17});
        assert!(mentions_item(by_property.as_object().unwrap(), 17));
        let by_item = json!({"item_id": 17.0});
        assert!(mentions_item(by_item.as_object().unwrap(), 17));
        let other = json!({"parent_property_id": 17});
        assert!(!mentions_item(other.as_object().unwrap(), 17));
        let fractional = json!({"property_id": 17.9});
        assert!(!mentions_item(fractional.as_object().unwrap(), 17));
    }

    #[test]
    fn correction_projection_reads_payload_fields() {
        let data = r#"{"event_type":"CorrectionEvent","original_event_id":"transfer_1_9","correction_type":"TransferEvent","reason":"wrong recipient","user_id":4.0}"#;
        let event = correction_event(&entry(8, "CorrectionEvent", data)).unwrap();
        assert_eq!(event.original_event_id, "transfer_1_9");
        assert_eq!(event.original_event_type, "TransferEvent");
        assert_eq!(event.reason, "wrong recipient");
        assert_eq!(event.correcting_user_id, 4);

        let missing_reason = r#"{"original_event_id":"x","correction_type":"y","user_id":1}"#;
        assert!(correction_event(&entry(9, "CorrectionEvent", missing_reason)).is_none());
        assert!(correction_event(&entry(10, "StatusChange", data)).is_none());
    }

    #[test]
    fn general_event_prefers_item_id() {
        let event = general_event(&entry(
            2,
            "TransferEvent",
            r#"{"property_id":9,"from_user_id":1,"to_user_id":2}"#,
        ))
        .unwrap();
        assert_eq!(event.item_id, Some(9));
        assert_eq!(event.user_id, None);

        let event = general_event(&entry(3, "StatusChange", r#"{"item_id":4,"property_id":9,"user_id":2}"#)).unwrap();
        assert_eq!(event.item_id, Some(4));
        assert_eq!(event.user_id, Some(2));
    }
}
