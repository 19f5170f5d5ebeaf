//! PostgreSQL persistence adapters using Diesel.
//!
//! Repositories are thin translators between Diesel rows and domain types;
//! the row structs (`models.rs`) and table definitions (`schema.rs`) stay
//! private to this module. Connections come from a shared `bb8` pool through
//! `diesel-async`, and every database error is mapped to the matching port
//! error before it leaves the adapter.
//!
//! ```no_run
//! use examboard_identity::outbound::persistence::{
//!     DbPool, DieselIdentityRepository, PoolConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/identity")).await?;
//! let repository = DieselIdentityRepository::new(pool);
//! # let _ = repository;
//! # Ok(())
//! # }
//! ```

mod diesel_audit_log;
mod diesel_basic_error_mapping;
mod diesel_identity_repository;
mod diesel_transfer_intent_repository;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_audit_log::DieselAuditLog;
pub use diesel_identity_repository::DieselIdentityRepository;
pub use diesel_transfer_intent_repository::DieselTransferIntentRepository;
pub use migrations::{MigrationError, run_pending_migrations};
pub use pool::{DbPool, PoolConfig, PoolError};
