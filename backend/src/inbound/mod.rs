//! Inbound adapters that translate external calls into domain port calls
//! while keeping runtime details at the edge.
//!
//! The store has no network surface. Async callers use the driving ports
//! directly; [`blocking`] serves synchronous legacy call sites.

pub mod blocking;
