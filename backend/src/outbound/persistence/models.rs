//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. Conversions back into domain types return
//! `String` errors that repositories wrap into their port error.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Jsonb, Nullable, Text, Timestamptz};
use uuid::Uuid;

use crate::domain::{
    ActorCategory, AuditAction, AuditRecord, CredentialHash, EmailAddress, IdentityId,
    IdentityRecord, Partition, ProfileAttributes, RegistrationStatus, SecurityQuestion,
    TransferIntent, TransferState,
};

use super::schema::{audit_log, audit_outbox, identity_emails, transfer_intents};

/// Column list shared by every partition table, in [`IdentityRow`] order.
pub(crate) const IDENTITY_COLUMNS: &str = "id, email, credential_hash, registration_status, \
     profile, security_question, security_answer_hash, created_at, last_login";

// ---------------------------------------------------------------------------
// Partition tables
// ---------------------------------------------------------------------------

/// Row read from any partition table.
#[derive(Debug, Clone, QueryableByName)]
pub(crate) struct IdentityRow {
    #[diesel(sql_type = Text)]
    pub id: String,
    #[diesel(sql_type = Text)]
    pub email: String,
    #[diesel(sql_type = Text)]
    pub credential_hash: String,
    #[diesel(sql_type = Text)]
    pub registration_status: String,
    #[diesel(sql_type = Jsonb)]
    pub profile: serde_json::Value,
    #[diesel(sql_type = Nullable<Text>)]
    pub security_question: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub security_answer_hash: Option<String>,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    pub last_login: Option<DateTime<Utc>>,
}

impl IdentityRow {
    /// Rebuild the domain record; the partition comes from the table queried.
    pub fn into_record(self, partition: Partition) -> Result<IdentityRecord, String> {
        let id = IdentityId::new(self.id).map_err(|err| format!("stored id: {err}"))?;
        let email = EmailAddress::parse(&self.email).map_err(|err| format!("stored email: {err}"))?;
        let registration_status = self
            .registration_status
            .parse::<RegistrationStatus>()
            .map_err(|err| format!("stored status: {err}"))?;
        let profile: ProfileAttributes = serde_json::from_value(self.profile)
            .map_err(|err| format!("stored profile: {err}"))?;
        let security_question = match (self.security_question, self.security_answer_hash) {
            (Some(question), Some(answer_hash)) => Some(SecurityQuestion {
                question,
                answer_hash: CredentialHash::from_stored(answer_hash),
            }),
            (None, None) => None,
            _ => return Err("security question stored without its answer".to_owned()),
        };
        Ok(IdentityRecord {
            id,
            email,
            credential_hash: CredentialHash::from_stored(self.credential_hash),
            partition,
            registration_status,
            profile,
            security_question,
            created_at: self.created_at,
            last_login: self.last_login,
        })
    }
}

/// Column values bound when writing a partition row.
pub(crate) struct IdentityWrite<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub credential_hash: &'a str,
    pub registration_status: &'static str,
    pub profile: serde_json::Value,
    pub security_question: Option<&'a str>,
    pub security_answer_hash: Option<&'a str>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl<'a> IdentityWrite<'a> {
    pub fn from_record(record: &'a IdentityRecord) -> Result<Self, serde_json::Error> {
        let question = record.security_question.as_ref();
        Ok(Self {
            id: record.id.as_ref(),
            email: record.email.as_ref(),
            credential_hash: record.credential_hash.as_stored(),
            registration_status: record.registration_status.as_str(),
            profile: serde_json::to_value(&record.profile)?,
            security_question: question.map(|q| q.question.as_str()),
            security_answer_hash: question.map(|q| q.answer_hash.as_stored()),
            created_at: record.created_at,
            last_login: record.last_login,
        })
    }
}

/// One grouped statistics bucket.
#[derive(Debug, QueryableByName)]
pub(crate) struct StatisticsRow {
    #[diesel(sql_type = Text)]
    pub region: String,
    #[diesel(sql_type = Text)]
    pub affiliation: String,
    #[diesel(sql_type = BigInt)]
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Email registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = identity_emails)]
pub(crate) struct NewRegistryRow<'a> {
    pub email: &'a str,
    pub partition: &'static str,
    pub identity_id: &'a str,
}

// ---------------------------------------------------------------------------
// Audit outbox and log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = audit_outbox)]
pub(crate) struct NewOutboxRow {
    pub event_id: Uuid,
    pub payload: serde_json::Value,
}

impl NewOutboxRow {
    pub fn from_record(record: &AuditRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: record.event_id,
            payload: serde_json::to_value(record)?,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = audit_outbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct OutboxRow {
    pub payload: serde_json::Value,
}

impl TryFrom<OutboxRow> for AuditRecord {
    type Error = String;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        serde_json::from_value(row.payload).map_err(|err| format!("outbox payload: {err}"))
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = audit_log)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct AuditLogRow {
    pub event_id: Uuid,
    pub table_name: String,
    pub record_id: String,
    pub action: String,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub actor_category: Option<String>,
    pub actor_id: Option<String>,
    pub actor_email: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl TryFrom<AuditLogRow> for AuditRecord {
    type Error = String;

    fn try_from(row: AuditLogRow) -> Result<Self, Self::Error> {
        let action = AuditAction::parse(&row.action)
            .ok_or_else(|| format!("unknown audit action {}", row.action))?;
        let actor_category = row
            .actor_category
            .map(|raw| raw.parse::<ActorCategory>())
            .transpose()
            .map_err(|err| format!("stored actor category: {err}"))?;
        Ok(Self {
            event_id: row.event_id,
            table_name: row.table_name,
            record_id: row.record_id,
            action,
            old_values: row.old_values,
            new_values: row.new_values,
            actor_category,
            actor_id: row.actor_id,
            actor_email: row.actor_email,
            timestamp: row.occurred_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = audit_log)]
pub(crate) struct NewAuditLogRow<'a> {
    pub event_id: Uuid,
    pub table_name: &'a str,
    pub record_id: &'a str,
    pub action: &'static str,
    pub old_values: Option<&'a serde_json::Value>,
    pub new_values: Option<&'a serde_json::Value>,
    pub actor_category: Option<&'static str>,
    pub actor_id: Option<&'a str>,
    pub actor_email: Option<&'a str>,
    pub occurred_at: DateTime<Utc>,
}

impl<'a> From<&'a AuditRecord> for NewAuditLogRow<'a> {
    fn from(record: &'a AuditRecord) -> Self {
        Self {
            event_id: record.event_id,
            table_name: &record.table_name,
            record_id: &record.record_id,
            action: record.action.as_str(),
            old_values: record.old_values.as_ref(),
            new_values: record.new_values.as_ref(),
            actor_category: record.actor_category.map(ActorCategory::as_str),
            actor_id: record.actor_id.as_deref(),
            actor_email: record.actor_email.as_deref(),
            occurred_at: record.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Transfer intents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = transfer_intents)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TransferIntentRow {
    pub id: Uuid,
    pub source_id: String,
    pub source_partition: String,
    pub target_partition: String,
    pub target_id: String,
    pub email: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TransferIntent> for TransferIntentRow {
    fn from(intent: &TransferIntent) -> Self {
        Self {
            id: intent.id,
            source_id: intent.source_id.to_string(),
            source_partition: intent.source_partition.table_name().to_owned(),
            target_partition: intent.target_partition.table_name().to_owned(),
            target_id: intent.target_id.to_string(),
            email: intent.email.to_string(),
            state: intent.state.as_str().to_owned(),
            created_at: intent.created_at,
            updated_at: intent.updated_at,
        }
    }
}

fn stored_partition(name: &str) -> Result<Partition, String> {
    Partition::from_table_name(name).ok_or_else(|| format!("unknown partition {name}"))
}

impl TryFrom<TransferIntentRow> for TransferIntent {
    type Error = String;

    fn try_from(row: TransferIntentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            source_id: IdentityId::new(row.source_id).map_err(|err| format!("source id: {err}"))?,
            source_partition: stored_partition(&row.source_partition)?,
            target_partition: stored_partition(&row.target_partition)?,
            target_id: IdentityId::new(row.target_id).map_err(|err| format!("target id: {err}"))?,
            email: EmailAddress::parse(&row.email).map_err(|err| format!("email: {err}"))?,
            state: TransferState::parse(&row.state)
                .ok_or_else(|| format!("unknown transfer state {}", row.state))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    //! Row conversion edge cases.
    use super::*;
    use crate::test_support::sample_record;
    use rstest::rstest;

    fn row_for(record: &IdentityRecord) -> IdentityRow {
        let write = IdentityWrite::from_record(record).expect("profile encodes");
        IdentityRow {
            id: write.id.to_owned(),
            email: write.email.to_owned(),
            credential_hash: write.credential_hash.to_owned(),
            registration_status: write.registration_status.to_owned(),
            profile: write.profile,
            security_question: write.security_question.map(str::to_owned),
            security_answer_hash: write.security_answer_hash.map(str::to_owned),
            created_at: write.created_at,
            last_login: write.last_login,
        }
    }

    #[rstest]
    fn partition_row_rebuilds_the_record() {
        let record = sample_record(Partition::Examiner, "e1@x.test");
        let rebuilt = row_for(&record)
            .into_record(Partition::Examiner)
            .expect("row converts");
        assert_eq!(rebuilt, record);
    }

    #[rstest]
    fn half_stored_security_question_is_rejected() {
        let record = sample_record(Partition::Teacher, "t1@x.test");
        let mut row = row_for(&record);
        row.security_question = Some("First school?".into());

        let err = row.into_record(Partition::Teacher).expect_err("inconsistent row");
        assert!(err.contains("security question"));
    }

    #[rstest]
    fn unknown_transfer_state_is_rejected() {
        let record = sample_record(Partition::StudentOrdinary, "s1@x.test");
        let intent = TransferIntent::new(
            record.id.clone(),
            Partition::StudentOrdinary,
            Partition::StudentAdvanced,
            record.id.clone(),
            record.email.clone(),
            record.created_at,
        );
        let mut row = TransferIntentRow::from(&intent);
        row.state = "paused".into();

        let err = TransferIntent::try_from(row).expect_err("bad state");
        assert!(err.contains("paused"));
    }
}
