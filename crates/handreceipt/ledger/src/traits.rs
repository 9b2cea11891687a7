use crate::domain::{CustomEvent, Da2062Import, MaintenanceRecord, Property, Transfer};
use crate::event::LedgerEvent;
use crate::model::{ChainReport, CorrectionEvent, GeneralLedgerEvent, HistoryRecord};
use crate::LedgerResult;
use async_trait::async_trait;

/// Ledger capability shared by every backend.
///
/// Implementations supply [`append`](LedgerService::append) plus the read,
/// verify and lifecycle operations; the `log_*` methods build the matching
/// [`LedgerEvent`] and delegate to `append`.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Backend label used in logs and CLI output.
    fn backend_name(&self) -> &'static str;

    /// Prepare the backing store (schema, triggers, sessions).
    async fn initialize(&self) -> LedgerResult<()>;

    /// Release backend resources.
    async fn close(&self) -> LedgerResult<()>;

    /// Append one event and return its event id once committed.
    async fn append(&self, event: LedgerEvent) -> LedgerResult<String>;

    /// Payloads that mention `item_id` (as `item_id` or `property_id`),
    /// oldest first.
    async fn get_property_history(&self, item_id: u64) -> LedgerResult<Vec<HistoryRecord>>;

    /// `Ok(false)` when the entry is absent or its hash does not verify.
    async fn verify_document(&self, event_id: &str, table_hint: &str) -> LedgerResult<bool>;

    async fn verify_chain_integrity(&self) -> LedgerResult<ChainReport>;

    async fn get_all_correction_events(&self) -> LedgerResult<Vec<CorrectionEvent>>;

    async fn get_correction_events_by_original_id(
        &self,
        original_event_id: &str,
    ) -> LedgerResult<Vec<CorrectionEvent>>;

    /// `LedgerError::NotFound` when no correction has this event id.
    async fn get_correction_event_by_id(&self, event_id: &str) -> LedgerResult<CorrectionEvent>;

    /// Newest entries first, bounded by the configured history limit.
    async fn get_general_history(&self) -> LedgerResult<Vec<GeneralLedgerEvent>>;

    async fn log_property_creation(&self, property: &Property, user_id: u64) -> LedgerResult<String> {
        self.append(LedgerEvent::property_creation(property, user_id))
            .await
    }

    async fn log_transfer_event(&self, transfer: &Transfer, serial_number: &str) -> LedgerResult<String> {
        self.append(LedgerEvent::transfer(transfer, serial_number))
            .await
    }

    async fn log_status_change(
        &self,
        item_id: u64,
        serial_number: &str,
        old_status: &str,
        new_status: &str,
        user_id: u64,
    ) -> LedgerResult<String> {
        self.append(LedgerEvent::status_change(
            item_id,
            serial_number,
            old_status,
            new_status,
            user_id,
        ))
        .await
    }

    async fn log_verification_event(
        &self,
        item_id: u64,
        serial_number: &str,
        user_id: u64,
        verification_type: &str,
    ) -> LedgerResult<String> {
        self.append(LedgerEvent::verification(
            item_id,
            serial_number,
            user_id,
            verification_type,
        ))
        .await
    }

    async fn log_maintenance_event(&self, record: &MaintenanceRecord) -> LedgerResult<String> {
        self.append(LedgerEvent::maintenance(record)).await
    }

    async fn log_correction_event(
        &self,
        original_event_id: &str,
        event_type: &str,
        reason: &str,
        user_id: u64,
    ) -> LedgerResult<String> {
        self.append(LedgerEvent::correction(
            original_event_id,
            event_type,
            reason,
            user_id,
        ))
        .await
    }

    async fn log_da2062_export(
        &self,
        user_id: u64,
        property_count: u32,
        export_type: &str,
        recipients: Option<&str>,
    ) -> LedgerResult<String> {
        self.append(LedgerEvent::da2062_export(
            user_id,
            property_count,
            export_type,
            recipients,
        ))
        .await
    }

    async fn log_da2062_import(&self, import: &Da2062Import) -> LedgerResult<String> {
        self.append(LedgerEvent::da2062_import(import)).await
    }

    async fn log_event(&self, event: &CustomEvent) -> LedgerResult<String> {
        self.append(LedgerEvent::custom(event)).await
    }

    async fn log_component_attached(
        &self,
        parent_property_id: u64,
        component_property_id: u64,
        user_id: u64,
        position: Option<&str>,
        notes: Option<&str>,
    ) -> LedgerResult<String> {
        self.append(LedgerEvent::component_attached(
            parent_property_id,
            component_property_id,
            user_id,
            position,
            notes,
        ))
        .await
    }

    async fn log_component_detached(
        &self,
        parent_property_id: u64,
        component_property_id: u64,
        user_id: u64,
    ) -> LedgerResult<String> {
        self.append(LedgerEvent::component_detached(
            parent_property_id,
            component_property_id,
            user_id,
        ))
        .await
    }

    async fn log_document_event(
        &self,
        document_id: u64,
        event_type: &str,
        sender_user_id: u64,
        recipient_user_id: u64,
    ) -> LedgerResult<String> {
        self.append(LedgerEvent::document(
            document_id,
            event_type,
            sender_user_id,
            recipient_user_id,
        ))
        .await
    }
}
