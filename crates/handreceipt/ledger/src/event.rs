//! Typed ledger events.
//!
//! Every `log_*` operation builds one [`LedgerEvent`] variant. Each variant
//! serializes to the flat JSON object that is hashed and stored as
//! `event_data`: an `event_type` tag plus the action-specific fields. Those
//! field names are a read contract; the projection layer and `created_by`
//! extraction look them up by name.

use crate::domain::{CustomEvent, Da2062Import, ImportMethod, MaintenanceRecord, Property, Transfer};
use crate::error::LedgerResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Event type tags written to `event_type`.
pub mod kind {
    pub const ITEM_CREATION: &str = "ItemCreation";
    pub const TRANSFER: &str = "TransferEvent";
    pub const STATUS_CHANGE: &str = "StatusChange";
    pub const VERIFICATION: &str = "VerificationEvent";
    pub const MAINTENANCE: &str = "MaintenanceEvent";
    pub const CORRECTION: &str = "CorrectionEvent";
    pub const DOCUMENT: &str = "DocumentEvent";
    pub const DA2062_EXPORT: &str = "DA2062Export";
    pub const DA2062_IMPORT: &str = "DA2062Import";
    pub const COMPONENT_ATTACHED: &str = "ComponentAttached";
    pub const COMPONENT_DETACHED: &str = "ComponentDetached";
}

/// User-id fields probed, in order, to attribute an entry to a user.
pub const CREATED_BY_FIELDS: [&str; 3] = ["user_id", "initiating_user_id", "sender_user_id"];

#[derive(Debug, Clone, Serialize)]
pub struct ItemDetails {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemCreation {
    pub item_id: u64,
    pub serial_number: String,
    pub user_id: u64,
    pub timestamp: DateTime<Utc>,
    pub details: ItemDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferLogged {
    pub transfer_id: u64,
    pub property_id: u64,
    pub serial_number: String,
    pub from_user_id: u64,
    pub to_user_id: u64,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub request_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub item_id: u64,
    pub serial_number: String,
    pub user_id: u64,
    pub old_status: String,
    pub new_status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationLogged {
    pub item_id: u64,
    pub serial_number: String,
    pub user_id: u64,
    pub verification_type: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceLogged {
    pub maintenance_record_id: String,
    pub item_id: u64,
    pub initiating_user_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performing_user_id: Option<u64>,
    pub event_type_detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_type: Option<String>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrectionLogged {
    pub original_event_id: String,
    pub correction_type: String,
    pub reason: String,
    pub user_id: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentLogged {
    pub document_id: u64,
    pub document_event: String,
    pub sender_user_id: u64,
    pub recipient_user_id: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Da2062Exported {
    pub user_id: u64,
    pub property_count: u32,
    pub export_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipients: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Da2062Imported {
    pub form_number: String,
    pub user_id: u64,
    pub unit_name: String,
    pub dodaac: String,
    pub item_count: u32,
    pub import_method: ImportMethod,
    pub confidence: f64,
    pub corrections: u32,
    pub processing_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentAttached {
    pub parent_property_id: u64,
    pub component_property_id: u64,
    pub user_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentDetached {
    pub parent_property_id: u64,
    pub component_property_id: u64,
    pub user_id: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomLogged {
    #[serde(skip)]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Closed set of ledger events.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    ItemCreation(ItemCreation),
    Transfer(TransferLogged),
    StatusChange(StatusChange),
    Verification(VerificationLogged),
    Maintenance(MaintenanceLogged),
    Correction(CorrectionLogged),
    Document(DocumentLogged),
    Da2062Export(Da2062Exported),
    Da2062Import(Da2062Imported),
    ComponentAttached(ComponentAttached),
    ComponentDetached(ComponentDetached),
    Custom(CustomLogged),
}

impl LedgerEvent {
    pub fn property_creation(property: &Property, user_id: u64) -> Self {
        Self::ItemCreation(ItemCreation {
            item_id: property.id,
            serial_number: property.serial_number.clone(),
            user_id,
            timestamp: Utc::now(),
            details: ItemDetails {
                name: property.name.clone(),
                description: property.description.clone(),
                status: property.current_status.clone(),
            },
        })
    }

    pub fn transfer(transfer: &Transfer, serial_number: &str) -> Self {
        Self::Transfer(TransferLogged {
            transfer_id: transfer.id,
            property_id: transfer.property_id,
            serial_number: serial_number.to_string(),
            from_user_id: transfer.from_user_id,
            to_user_id: transfer.to_user_id,
            status: transfer.status.clone(),
            timestamp: Utc::now(),
            request_date: transfer.request_date,
            notes: transfer.notes.clone(),
        })
    }

    pub fn status_change(
        item_id: u64,
        serial_number: &str,
        old_status: &str,
        new_status: &str,
        user_id: u64,
    ) -> Self {
        Self::StatusChange(StatusChange {
            item_id,
            serial_number: serial_number.to_string(),
            user_id,
            old_status: old_status.to_string(),
            new_status: new_status.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn verification(
        item_id: u64,
        serial_number: &str,
        user_id: u64,
        verification_type: &str,
    ) -> Self {
        Self::Verification(VerificationLogged {
            item_id,
            serial_number: serial_number.to_string(),
            user_id,
            verification_type: verification_type.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn maintenance(record: &MaintenanceRecord) -> Self {
        Self::Maintenance(MaintenanceLogged {
            maintenance_record_id: record.record_id.clone(),
            item_id: record.item_id,
            initiating_user_id: record.initiating_user_id,
            performing_user_id: record.performing_user_id,
            event_type_detail: record.event_type.clone(),
            maintenance_type: record.maintenance_type.clone(),
            description: record.description.clone(),
            timestamp: Utc::now(),
        })
    }

    pub fn correction(original_event_id: &str, event_type: &str, reason: &str, user_id: u64) -> Self {
        Self::Correction(CorrectionLogged {
            original_event_id: original_event_id.to_string(),
            correction_type: event_type.to_string(),
            reason: reason.to_string(),
            user_id,
            timestamp: Utc::now(),
        })
    }

    pub fn document(
        document_id: u64,
        event_type: &str,
        sender_user_id: u64,
        recipient_user_id: u64,
    ) -> Self {
        Self::Document(DocumentLogged {
            document_id,
            document_event: event_type.to_string(),
            sender_user_id,
            recipient_user_id,
            timestamp: Utc::now(),
        })
    }

    pub fn da2062_export(
        user_id: u64,
        property_count: u32,
        export_type: &str,
        recipients: Option<&str>,
    ) -> Self {
        Self::Da2062Export(Da2062Exported {
            user_id,
            property_count,
            export_type: export_type.to_string(),
            recipients: non_empty(recipients),
            timestamp: Utc::now(),
        })
    }

    pub fn da2062_import(import: &Da2062Import) -> Self {
        Self::Da2062Import(Da2062Imported {
            form_number: import.form_number.clone(),
            user_id: import.user_id,
            unit_name: import.unit_name.clone(),
            dodaac: import.dodaac.clone(),
            item_count: import.item_count,
            import_method: import.import_method,
            confidence: import.confidence,
            corrections: import.corrections,
            processing_ms: import.processing_ms,
            timestamp: Utc::now(),
        })
    }

    pub fn component_attached(
        parent_property_id: u64,
        component_property_id: u64,
        user_id: u64,
        position: Option<&str>,
        notes: Option<&str>,
    ) -> Self {
        Self::ComponentAttached(ComponentAttached {
            parent_property_id,
            component_property_id,
            user_id,
            position: non_empty(position),
            notes: non_empty(notes),
            timestamp: Utc::now(),
        })
    }

    pub fn component_detached(
        parent_property_id: u64,
        component_property_id: u64,
        user_id: u64,
    ) -> Self {
        Self::ComponentDetached(ComponentDetached {
            parent_property_id,
            component_property_id,
            user_id,
            timestamp: Utc::now(),
        })
    }

    pub fn custom(event: &CustomEvent) -> Self {
        Self::Custom(CustomLogged {
            event_type: event.event_type.clone(),
            user_id: event.user_id,
            metadata: event.metadata.clone(),
            timestamp: Utc::now(),
        })
    }

    /// The `event_type` tag stored with the entry.
    pub fn event_type(&self) -> &str {
        match self {
            Self::ItemCreation(_) => kind::ITEM_CREATION,
            Self::Transfer(_) => kind::TRANSFER,
            Self::StatusChange(_) => kind::STATUS_CHANGE,
            Self::Verification(_) => kind::VERIFICATION,
            Self::Maintenance(_) => kind::MAINTENANCE,
            Self::Correction(_) => kind::CORRECTION,
            Self::Document(_) => kind::DOCUMENT,
            Self::Da2062Export(_) => kind::DA2062_EXPORT,
            Self::Da2062Import(_) => kind::DA2062_IMPORT,
            Self::ComponentAttached(_) => kind::COMPONENT_ATTACHED,
            Self::ComponentDetached(_) => kind::COMPONENT_DETACHED,
            Self::Custom(event) => &event.event_type,
        }
    }

    /// Event id prefix: action name plus the primary correlated id(s).
    fn id_stem(&self) -> String {
        match self {
            Self::ItemCreation(e) => format!("item_creation_{}", e.item_id),
            Self::Transfer(e) => format!("transfer_{}", e.transfer_id),
            Self::StatusChange(e) => format!("status_change_{}", e.item_id),
            Self::Verification(e) => format!("verification_{}", e.item_id),
            Self::Maintenance(e) => format!("maintenance_{}", e.maintenance_record_id),
            Self::Correction(e) => format!("correction_{}", e.original_event_id),
            Self::Document(e) => format!("document_{}_{}", e.document_event, e.document_id),
            Self::Da2062Export(e) => format!("da2062_export_{}", e.user_id),
            Self::Da2062Import(e) => format!("da2062_import_{}", e.form_number),
            Self::ComponentAttached(e) => format!(
                "component_attached_{}_{}",
                e.parent_property_id, e.component_property_id
            ),
            Self::ComponentDetached(e) => format!(
                "component_detached_{}_{}",
                e.parent_property_id, e.component_property_id
            ),
            Self::Custom(e) => format!("event_{}", e.event_type),
        }
    }

    /// Derive the event id using `nanos` as the write-time component.
    pub fn event_id_at(&self, nanos: i64) -> String {
        format!("{}_{}", self.id_stem(), nanos)
    }

    /// Derive the event id from the current time.
    pub fn event_id(&self) -> String {
        self.event_id_at(crate::hash::write_nonce())
    }

    /// Flat payload object: `event_type` plus the variant's fields.
    pub fn payload(&self) -> LedgerResult<Map<String, Value>> {
        let value = match self {
            Self::ItemCreation(e) => serde_json::to_value(e)?,
            Self::Transfer(e) => serde_json::to_value(e)?,
            Self::StatusChange(e) => serde_json::to_value(e)?,
            Self::Verification(e) => serde_json::to_value(e)?,
            Self::Maintenance(e) => serde_json::to_value(e)?,
            Self::Correction(e) => serde_json::to_value(e)?,
            Self::Document(e) => serde_json::to_value(e)?,
            Self::Da2062Export(e) => serde_json::to_value(e)?,
            Self::Da2062Import(e) => serde_json::to_value(e)?,
            Self::ComponentAttached(e) => serde_json::to_value(e)?,
            Self::ComponentDetached(e) => serde_json::to_value(e)?,
            Self::Custom(e) => serde_json::to_value(e)?,
        };
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(crate::LedgerError::Serialization(format!(
                    "event payload must be a JSON object, got {other}"
                )))
            }
        };
        map.insert(
            "event_type".to_string(),
            Value::String(self.event_type().to_string()),
        );
        Ok(map)
    }
}

/// Attribute a payload to a user by probing [`CREATED_BY_FIELDS`] in order.
///
/// Integer and floating-point JSON numbers are both accepted because payloads
/// may have been round-tripped through a generic decoder.
pub fn extract_created_by(payload: &Map<String, Value>) -> u64 {
    CREATED_BY_FIELDS
        .iter()
        .find_map(|field| payload.get(*field).and_then(as_user_id))
        .unwrap_or(0)
}

/// Read a numeric id from a JSON value, accepting integers and integral
/// floats. Fractional values are not ids.
pub(crate) fn as_user_id(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| {
                f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64
            })
            .map(|f| f as u64)
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}
