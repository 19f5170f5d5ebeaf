//! Alerting adapter for audit events that could not be written.
//!
//! Emits a dedicated `error` event on the `audit_alert` target so log
//! shippers can route it to the on-call channel. Snapshots are never
//! included; identifiers are enough to replay from the outbox.

use async_trait::async_trait;
use tracing::error;

use crate::domain::AuditRecord;
use crate::domain::ports::AuditFailureAlerts;

/// Raises audit failures as `error` events on the `audit_alert` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditAlerts;

#[async_trait]
impl AuditFailureAlerts for TracingAuditAlerts {
    async fn audit_write_failed(&self, record: &AuditRecord, reason: &str) {
        error!(
            target: "audit_alert",
            event_id = %record.event_id,
            table = %record.table_name,
            record_id = %record.record_id,
            action = %record.action,
            reason,
            "audit record missing from the audit log; pending in outbox"
        );
    }
}
