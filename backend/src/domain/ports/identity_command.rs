//! Driving port for identity mutations.
//!
//! Each successful call has committed its mutation and attempted delivery of
//! the matching audit event before it returns. Audit delivery failures are
//! alerted, not returned.

use async_trait::async_trait;

use crate::domain::{
    AuditActor, Error, IdentityId, NewIdentity, Partition, ProfileAttributes, PublicIdentity,
    RegistrationStatus,
};

use super::ScopedCredentials;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityCommand: Send + Sync {
    /// Register a new identity. Audited as `INSERT`.
    async fn create_identity(&self, input: NewIdentity) -> Result<PublicIdentity, Error>;

    /// Verify credentials and stamp `last_login`.
    ///
    /// Fails with `CredentialMismatch` without saying why.
    async fn authenticate(&self, credentials: &ScopedCredentials) -> Result<PublicIdentity, Error>;

    /// Replace the profile of an identity. Audited as `UPDATE`.
    async fn update_profile(
        &self,
        partition: Partition,
        id: &IdentityId,
        profile: ProfileAttributes,
        actor: &AuditActor,
    ) -> Result<PublicIdentity, Error>;

    /// Change the registration status. Audited as `UPDATE`.
    async fn update_status(
        &self,
        partition: Partition,
        id: &IdentityId,
        status: RegistrationStatus,
        actor: &AuditActor,
    ) -> Result<PublicIdentity, Error>;

    /// Administrative removal. Audited as `DELETE`.
    async fn delete_identity(
        &self,
        partition: Partition,
        id: &IdentityId,
        actor: &AuditActor,
    ) -> Result<(), Error>;

    /// Move a record to another partition of the same category under a new
    /// identifier. Audited as `INSERT` plus `DELETE`.
    async fn transfer_partition(
        &self,
        id: &IdentityId,
        from: Partition,
        to: Partition,
        actor: &AuditActor,
    ) -> Result<PublicIdentity, Error>;
}
