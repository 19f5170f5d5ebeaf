//! Synchronous read cache for legacy call sites.
//!
//! The cache is never the system of record. It mirrors committed outcomes,
//! may lag or miss entries, and is never asked whether an email is free.

use crate::domain::{EmailAddress, Partition, PublicIdentity};

/// Keyed by partition and canonical (lower-cased) email.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityReadCache: Send + Sync {
    /// Cached view, or `None` when absent or stale.
    fn get(&self, partition: Partition, email: &EmailAddress) -> Option<PublicIdentity>;

    fn put(&self, partition: Partition, identity: &PublicIdentity);

    fn delete(&self, partition: Partition, email: &EmailAddress);
}
