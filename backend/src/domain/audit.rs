//! Audit records describing identity mutations.
//!
//! Records are immutable once built. Snapshots hold the public view of an
//! identity, so neither credential hashes nor security answers ever reach the
//! audit trail.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::identity::IdentityRecord;
use super::partition::{ActorCategory, Partition};

/// Kind of mutation an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

impl AuditAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who triggered a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditActor {
    pub category: Option<ActorCategory>,
    pub id: Option<String>,
    pub email: Option<String>,
}

impl AuditActor {
    /// Mutation performed by the store itself (reconciliation, rehash).
    pub fn system() -> Self {
        Self::default()
    }

    /// Mutation performed by the identity it affects.
    pub fn identity(record: &IdentityRecord) -> Self {
        Self {
            category: Some(record.category()),
            id: Some(record.id.to_string()),
            email: Some(record.email.to_string()),
        }
    }

    /// Mutation performed by an operator or another identity.
    pub fn operator(
        category: ActorCategory,
        id: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            category: Some(category),
            id: Some(id.into()),
            email: Some(email.into()),
        }
    }
}

/// Raised when an identity snapshot cannot be encoded.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode audit snapshot: {0}")]
pub struct AuditSnapshotError(#[from] serde_json::Error);

/// Immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Deduplication key; delivery is at-least-once.
    pub event_id: Uuid,
    pub table_name: String,
    pub record_id: String,
    pub action: AuditAction,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub actor_category: Option<ActorCategory>,
    pub actor_id: Option<String>,
    pub actor_email: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn for_insert(
        record: &IdentityRecord,
        actor: &AuditActor,
        at: DateTime<Utc>,
    ) -> Result<Self, AuditSnapshotError> {
        Ok(Self::build(
            record.partition,
            record.id.as_ref(),
            AuditAction::Insert,
            None,
            Some(snapshot(record)?),
            actor,
            at,
        ))
    }

    pub fn for_update(
        before: &IdentityRecord,
        after: &IdentityRecord,
        actor: &AuditActor,
        at: DateTime<Utc>,
    ) -> Result<Self, AuditSnapshotError> {
        Ok(Self::build(
            after.partition,
            after.id.as_ref(),
            AuditAction::Update,
            Some(snapshot(before)?),
            Some(snapshot(after)?),
            actor,
            at,
        ))
    }

    pub fn for_delete(
        record: &IdentityRecord,
        actor: &AuditActor,
        at: DateTime<Utc>,
    ) -> Result<Self, AuditSnapshotError> {
        Ok(Self::build(
            record.partition,
            record.id.as_ref(),
            AuditAction::Delete,
            Some(snapshot(record)?),
            None,
            actor,
            at,
        ))
    }

    fn build(
        partition: Partition,
        record_id: &str,
        action: AuditAction,
        old_values: Option<Value>,
        new_values: Option<Value>,
        actor: &AuditActor,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            table_name: partition.table_name().to_owned(),
            record_id: record_id.to_owned(),
            action,
            old_values,
            new_values,
            actor_category: actor.category,
            actor_id: actor.id.clone(),
            actor_email: actor.email.clone(),
            timestamp: at,
        }
    }
}

fn snapshot(record: &IdentityRecord) -> Result<Value, AuditSnapshotError> {
    Ok(serde_json::to_value(record.to_public())?)
}
