//! Port for partitioned identity persistence and its audit outbox.
//!
//! Every mutation takes the [`AuditRecord`] describing it and must persist
//! that record to the outbox in the same unit of work as the row change, so a
//! committed mutation always has a pending audit event. Adapters enforce
//! global email uniqueness themselves (a registry claimed alongside each
//! insert plus per-partition unique indexes); callers' pre-checks are only
//! advisory.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    AuditRecord, EmailAddress, IdentityId, IdentityRecord, Partition, PartitionStatistics,
};

use super::define_port_error;

define_port_error! {
    /// Errors raised by identity repository adapters.
    pub enum IdentityRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } => "identity repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "identity repository query failed: {message}",
        /// A unique constraint rejected the email address.
        DuplicateEmail { partition: String } =>
            "email address is already registered (rejected by {partition})",
        /// The addressed record does not exist.
        NotFound { id: String } => "identity {id} does not exist",
        /// The stored record no longer matches the caller's snapshot.
        Conflict { id: String } => "identity {id} changed since it was read",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Insert a new record, claim its email, and enqueue `audit`.
    ///
    /// Fails with [`IdentityRepositoryError::DuplicateEmail`] when any
    /// partition already owns the email.
    async fn insert(
        &self,
        record: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError>;

    /// Insert the destination copy of a transfer and enqueue `audit`.
    ///
    /// The email registry entry is repointed from the source record to the new
    /// one. Fails with [`IdentityRepositoryError::DuplicateEmail`] when the
    /// registry names anything other than the source, or when the destination
    /// partition already holds the email.
    async fn insert_transferred(
        &self,
        record: &IdentityRecord,
        source_partition: Partition,
        source_id: &IdentityId,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError>;

    /// Replace `expected` with `record` and enqueue `audit`.
    ///
    /// Compare-and-swap: fails with [`IdentityRepositoryError::Conflict`]
    /// when the stored row no longer equals `expected`, and with
    /// [`IdentityRepositoryError::NotFound`] when it is gone.
    async fn update(
        &self,
        expected: &IdentityRecord,
        record: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError>;

    /// Remove `expected` and enqueue `audit`.
    ///
    /// Same guard as [`Self::update`]. The email registry entry is released
    /// only while it still names this record.
    async fn delete(
        &self,
        expected: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError>;

    /// Fetch the record owning `email` within one partition.
    async fn find_by_email(
        &self,
        partition: Partition,
        email: &EmailAddress,
    ) -> Result<Option<IdentityRecord>, IdentityRepositoryError>;

    /// Fetch a record by its partition-scoped identifier.
    async fn find_by_id(
        &self,
        partition: Partition,
        id: &IdentityId,
    ) -> Result<Option<IdentityRecord>, IdentityRepositoryError>;

    /// Aggregate counts for one partition from committed data.
    async fn partition_statistics(
        &self,
        partition: Partition,
    ) -> Result<PartitionStatistics, IdentityRepositoryError>;
}

/// Read side of the audit outbox filled by [`IdentityRepository`] mutations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditOutbox: Send + Sync {
    /// Oldest undelivered audit events, at most `limit`.
    async fn pending(&self, limit: usize) -> Result<Vec<AuditRecord>, IdentityRepositoryError>;

    /// Mark an event as delivered to the audit log.
    async fn mark_relayed(&self, event_id: Uuid) -> Result<(), IdentityRepositoryError>;
}
