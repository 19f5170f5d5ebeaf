//! Persisted transfer intents for the partition transfer saga.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::email::EmailAddress;
use super::identifier::IdentityId;
use super::partition::Partition;

/// Saga state of a transfer intent.
///
/// `Pending` means the target record may not exist yet. `Created` means both
/// records exist and the source still has to be removed. `SourceDeleted` means
/// only audit delivery remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    Created,
    SourceDeleted,
    Complete,
    Abandoned,
}

impl TransferState {
    /// Name stored in the `transfer_intents.state` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Created => "created",
            Self::SourceDeleted => "source_deleted",
            Self::Complete => "complete",
            Self::Abandoned => "abandoned",
        }
    }

    /// Inverse of [`Self::as_str`]; unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "created" => Some(Self::Created),
            "source_deleted" => Some(Self::SourceDeleted),
            "complete" => Some(Self::Complete),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// Whether reconciliation still has work to do.
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Created | Self::SourceDeleted)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferIntent {
    pub id: Uuid,
    pub source_id: IdentityId,
    pub source_partition: Partition,
    pub target_partition: Partition,
    pub target_id: IdentityId,
    pub email: EmailAddress,
    pub state: TransferState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferIntent {
    pub fn new(
        source_id: IdentityId,
        source_partition: Partition,
        target_partition: Partition,
        target_id: IdentityId,
        email: EmailAddress,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            source_partition,
            target_partition,
            target_id,
            email,
            state: TransferState::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of the intent moved to `state`.
    pub fn advanced(&self, state: TransferState, now: DateTime<Utc>) -> Self {
        Self {
            state,
            updated_at: now,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TransferState::Pending, true)]
    #[case(TransferState::Created, true)]
    #[case(TransferState::SourceDeleted, true)]
    #[case(TransferState::Complete, false)]
    #[case(TransferState::Abandoned, false)]
    fn open_states_need_reconciliation(#[case] state: TransferState, #[case] open: bool) {
        assert_eq!(state.is_open(), open);
        assert_eq!(TransferState::parse(state.as_str()), Some(state));
    }
}
