//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL-backed repositories using Diesel
//! - **memory**: in-process store used by tests and local tooling
//! - **cache**: the legacy read-through identity cache
//! - **alerts**: tracing-backed audit failure alerts
//!
//! Adapters translate between domain types and storage representations and
//! contain no business rules.

pub mod alerts;
pub mod cache;
pub mod memory;
pub mod persistence;
