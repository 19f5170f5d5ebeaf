//! Partitioned identity and credential store for an examination board.
//!
//! Identities live in one partition per actor category (students split by
//! exam level). The [`domain`] module holds the rules and the ports;
//! [`outbound`] adapts those ports to PostgreSQL, memory, and the legacy
//! cache; [`inbound`] offers a blocking facade for synchronous callers.

pub mod config;
pub mod domain;
pub mod inbound;
pub mod outbound;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
