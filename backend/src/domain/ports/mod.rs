//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod audit_log;
mod identity_command;
mod identity_query;
mod identity_read_cache;
mod identity_repository;
mod transfer_intent_repository;

#[cfg(test)]
pub use audit_log::{MockAuditFailureAlerts, MockAuditLog};
pub use audit_log::{AuditAppend, AuditFailureAlerts, AuditLog, AuditLogError};
#[cfg(test)]
pub use identity_command::MockIdentityCommand;
pub use identity_command::IdentityCommand;
#[cfg(test)]
pub use identity_query::MockIdentityQuery;
pub use identity_query::{IdentityQuery, ScopedCredentials};
#[cfg(test)]
pub use identity_read_cache::MockIdentityReadCache;
pub use identity_read_cache::IdentityReadCache;
#[cfg(test)]
pub use identity_repository::{MockAuditOutbox, MockIdentityRepository};
pub use identity_repository::{AuditOutbox, IdentityRepository, IdentityRepositoryError};
#[cfg(test)]
pub use transfer_intent_repository::MockTransferIntentRepository;
pub use transfer_intent_repository::{TransferIntentRepository, TransferIntentRepositoryError};
