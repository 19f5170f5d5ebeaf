//! Domain primitives, services, and ports of the identity store.
//!
//! Purpose: define the partitioned identity model and the services that
//! create, authenticate, look up, and move identities. Storage, caching, and
//! alerting live behind the traits in [`ports`].
//!
//! Public surface:
//! - Error (alias to `error::Error`) — transport-agnostic failure payload.
//! - ErrorCode (alias to `error::ErrorCode`) — stable error identifier.
//! - Partition / resolve_partition — the partition router.
//! - IdentityService — implementation of the driving ports.

pub mod audit;
pub mod audit_trail;
pub mod credential;
pub mod email;
pub mod error;
pub mod federated_lookup;
pub mod identifier;
pub mod identity;
pub mod identity_service;
pub mod partition;
pub mod partition_transfer;
pub mod ports;
mod repository_errors;
pub mod statistics;
pub mod transfer;

pub use self::audit::{AuditAction, AuditActor, AuditRecord, AuditSnapshotError};
pub use self::audit_trail::{AuditTrailWriter, DeliveryOutcome, RelayReport};
pub use self::credential::{
    CredentialCodec, CredentialCost, CredentialError, CredentialHash, LegacyDigest, Secret,
};
pub use self::email::{EmailAddress, EmailValidationError};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::federated_lookup::FederatedLookup;
pub use self::identifier::{
    DEFAULT_ORG_TAG, IdentifierGenerator, IdentifierValidationError, IdentityId,
};
pub use self::identity::{
    AdminProfile, ExaminerProfile, IdentityRecord, IdentityValidationError, NewIdentity,
    PASSWORD_MIN, ProfileAttributes, PublicIdentity, RegistrationStatus, SecurityQuestion,
    StudentProfile, TeacherProfile,
};
pub use self::identity_service::{
    DEFAULT_RECONCILE_MIN_AGE_SECS, IdentityService, IdentityStoreParts,
};
pub use self::partition::{
    ActorCategory, ExamLevel, Partition, PartitionResolutionError, partitions_for,
    resolve_partition,
};
pub use self::partition_transfer::{PartitionTransferCoordinator, ReconciliationReport};
pub use self::statistics::{IdentityStatistics, PartitionStatistics};
pub use self::transfer::{TransferIntent, TransferState};

/// Convenient domain result alias.
///
/// # Examples
/// ```
/// use examboard_identity::domain::{DomainResult, Error};
///
/// fn lookup() -> DomainResult<()> {
///     Err(Error::not_found("nope"))
/// }
/// assert!(lookup().is_err());
/// ```
pub type DomainResult<T> = Result<T, Error>;
