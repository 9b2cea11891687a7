//! Domain values handed to the ledger by its callers.
//!
//! These are the inputs of the `log_*` operations. The ledger never persists
//! them directly; it projects them into [`LedgerEvent`](crate::LedgerEvent)
//! payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A piece of accountable property (an item on a hand receipt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: u64,
    pub name: String,
    pub serial_number: String,
    pub description: Option<String>,
    pub current_status: String,
}

/// A transfer of property between two users, at some stage of its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: u64,
    pub property_id: u64,
    pub from_user_id: u64,
    pub to_user_id: u64,
    /// Requested, Approved, Rejected, Completed, Cancelled.
    pub status: String,
    pub request_date: DateTime<Utc>,
    pub notes: Option<String>,
}

/// One maintenance lifecycle step for an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub record_id: String,
    pub item_id: u64,
    pub initiating_user_id: u64,
    pub performing_user_id: Option<u64>,
    /// Scheduled, Started, Completed, Cancelled, Reported Defect.
    pub event_type: String,
    pub maintenance_type: Option<String>,
    pub description: String,
}

/// How a DA Form 2062 was brought into the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMethod {
    Manual,
    Ocr,
    AiEnhanced,
}

/// A completed DA Form 2062 import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Da2062Import {
    pub form_number: String,
    pub user_id: u64,
    pub unit_name: String,
    pub dodaac: String,
    pub item_count: u32,
    pub import_method: ImportMethod,
    pub confidence: f64,
    pub corrections: u32,
    pub processing_ms: u64,
}

/// Free-form event for callers whose action has no dedicated `log_*` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomEvent {
    pub event_type: String,
    pub user_id: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CustomEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            user_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_user(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
