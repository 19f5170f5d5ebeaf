//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `backend/migrations` exactly. The five
//! partition tables share one column layout and are queried through
//! `sql_query` with the table chosen from [`Partition::table_name`], so only
//! the shared tables are declared here.
//!
//! [`Partition::table_name`]: crate::domain::Partition::table_name

diesel::table! {
    /// Global email registry. One row per claimed address.
    identity_emails (email) {
        email -> Varchar,
        /// Table name of the owning partition.
        partition -> Varchar,
        identity_id -> Varchar,
        claimed_at -> Timestamptz,
    }
}

diesel::table! {
    /// Audit events committed alongside each mutation.
    audit_outbox (event_id) {
        event_id -> Uuid,
        /// The full audit record as JSON.
        payload -> Jsonb,
        enqueued_at -> Timestamptz,
        /// Set once the event is present in `audit_log`.
        relayed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Append-only audit log. Updates and deletes are rejected by trigger.
    audit_log (id) {
        id -> Int8,
        event_id -> Uuid,
        table_name -> Varchar,
        record_id -> Varchar,
        action -> Varchar,
        old_values -> Nullable<Jsonb>,
        new_values -> Nullable<Jsonb>,
        actor_category -> Nullable<Varchar>,
        actor_id -> Nullable<Varchar>,
        actor_email -> Nullable<Varchar>,
        occurred_at -> Timestamptz,
    }
}

diesel::table! {
    /// Durable state of partition transfers.
    transfer_intents (id) {
        id -> Uuid,
        source_id -> Varchar,
        source_partition -> Varchar,
        target_partition -> Varchar,
        target_id -> Varchar,
        email -> Varchar,
        state -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
