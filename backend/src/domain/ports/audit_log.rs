//! Port for the append-only audit log and the alerting path for failed writes.

use async_trait::async_trait;

use crate::domain::AuditRecord;

use super::define_port_error;

define_port_error! {
    /// Errors raised by audit log adapters.
    pub enum AuditLogError {
        /// Audit store connection could not be established.
        Connection { message: String } => "audit log connection failed: {message}",
        /// The append or read failed during execution.
        Write { message: String } => "audit log write failed: {message}",
    }
}

/// Result of appending an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAppend {
    /// The event was written.
    Appended,
    /// An event with the same id was already present.
    AlreadyPresent,
}

/// Append-only audit log. Entries are never updated or deleted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Durably append `record`, ignoring repeats of the same `event_id`.
    async fn append(&self, record: &AuditRecord) -> Result<AuditAppend, AuditLogError>;

    /// Entries for one record in append order.
    async fn records_for(
        &self,
        table_name: &str,
        record_id: &str,
    ) -> Result<Vec<AuditRecord>, AuditLogError>;
}

/// Operational alerting for audit events that could not be written.
///
/// Raised after the primary mutation committed; implementations must not fail.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditFailureAlerts: Send + Sync {
    async fn audit_write_failed(&self, record: &AuditRecord, reason: &str);
}
