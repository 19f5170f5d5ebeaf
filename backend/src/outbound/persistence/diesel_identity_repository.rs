//! PostgreSQL-backed identity repository and audit outbox.
//!
//! Every mutation runs in one transaction that touches the partition table,
//! the `identity_emails` registry, and `audit_outbox` together. Uniqueness is
//! left to the database: the registry primary key rejects an address already
//! held in any partition, and each partition's `lower(email)` index rejects
//! duplicates within it. Both surface as `DuplicateEmail` naming the table.
//!
//! Updates and deletes are compare-and-swap: the transaction locks the row
//! with `SELECT ... FOR UPDATE` and proceeds only while it still equals the
//! caller's snapshot, otherwise it reports `Conflict`.
//!
//! Partition tables share one layout, so statements are built with
//! `sql_query` against [`Partition::table_name`], which only ever yields one of
//! five fixed identifiers.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Jsonb, Nullable, Text, Timestamptz};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::debug;
use uuid::Uuid;

use crate::domain::ports::{AuditOutbox, IdentityRepository, IdentityRepositoryError};
use crate::domain::{
    AuditRecord, EmailAddress, IdentityId, IdentityRecord, Partition, PartitionStatistics,
};

use super::diesel_basic_error_mapping::{
    collect_rows, map_basic_diesel_error, map_basic_pool_error, sql_limit, unique_violation_table,
};
use super::models::{
    IDENTITY_COLUMNS, IdentityRow, IdentityWrite, NewOutboxRow,
    NewRegistryRow, OutboxRow, StatisticsRow,
};
use super::pool::{DbPool, PoolError};
use super::schema::{audit_outbox, identity_emails};

const REGISTRY_TABLE: &str = "identity_emails";

/// Diesel-backed implementation of [`IdentityRepository`] and [`AuditOutbox`].
#[derive(Clone)]
pub struct DieselIdentityRepository {
    pool: DbPool,
}

impl DieselIdentityRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Failure inside a write transaction: either the driver, or a rule the
/// transaction itself checked (zero rows touched).
#[derive(Debug)]
enum WriteError {
    Diesel(diesel::result::Error),
    Rejected(IdentityRepositoryError),
}

impl From<diesel::result::Error> for WriteError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Diesel(error)
    }
}

fn map_pool_error(error: PoolError) -> IdentityRepositoryError {
    map_basic_pool_error(error, IdentityRepositoryError::connection)
}

/// Map Diesel errors, turning unique violations into `DuplicateEmail`.
fn map_diesel_error(error: diesel::result::Error) -> IdentityRepositoryError {
    if let Some(table) = unique_violation_table(&error) {
        debug!(%table, "unique constraint rejected identity write");
        let rejected_by = if table.starts_with(REGISTRY_TABLE) {
            REGISTRY_TABLE.to_owned()
        } else {
            table
        };
        return IdentityRepositoryError::duplicate_email(rejected_by);
    }
    map_basic_diesel_error(
        error,
        IdentityRepositoryError::query,
        IdentityRepositoryError::connection,
    )
}

fn map_write_error(error: WriteError) -> IdentityRepositoryError {
    match error {
        WriteError::Diesel(error) => map_diesel_error(error),
        WriteError::Rejected(error) => error,
    }
}

fn encode_error(what: &str, err: &serde_json::Error) -> IdentityRepositoryError {
    IdentityRepositoryError::query(format!("encode {what}: {err}"))
}

fn insert_sql(partition: Partition) -> String {
    format!(
        "INSERT INTO {table} ({IDENTITY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        table = partition.table_name()
    )
}

async fn insert_row(
    conn: &mut AsyncPgConnection,
    partition: Partition,
    row: &IdentityWrite<'_>,
) -> Result<(), WriteError> {
    sql_query(insert_sql(partition))
        .bind::<Text, _>(row.id)
        .bind::<Text, _>(row.email)
        .bind::<Text, _>(row.credential_hash)
        .bind::<Text, _>(row.registration_status)
        .bind::<Jsonb, _>(&row.profile)
        .bind::<Nullable<Text>, _>(row.security_question)
        .bind::<Nullable<Text>, _>(row.security_answer_hash)
        .bind::<Timestamptz, _>(row.created_at)
        .bind::<Nullable<Timestamptz>, _>(row.last_login)
        .execute(conn)
        .await?;
    Ok(())
}

fn locked_row_sql(partition: Partition) -> String {
    format!(
        "SELECT {IDENTITY_COLUMNS} FROM {table} WHERE id = $1 FOR UPDATE",
        table = partition.table_name()
    )
}

/// Lock the stored row and check it still equals `expected`.
async fn lock_unchanged(
    conn: &mut AsyncPgConnection,
    expected: &IdentityRecord,
) -> Result<(), WriteError> {
    let id = expected.id.to_string();
    let row = sql_query(locked_row_sql(expected.partition))
        .bind::<Text, _>(expected.id.as_ref())
        .get_result::<IdentityRow>(conn)
        .await
        .optional()?
        .ok_or_else(|| WriteError::Rejected(IdentityRepositoryError::not_found(id.clone())))?;
    let current = row
        .into_record(expected.partition)
        .map_err(|err| WriteError::Rejected(IdentityRepositoryError::query(err)))?;
    if &current != expected {
        debug!(%id, "stored identity differs from the caller's snapshot");
        return Err(WriteError::Rejected(IdentityRepositoryError::conflict(id)));
    }
    Ok(())
}

async fn enqueue(conn: &mut AsyncPgConnection, event: &NewOutboxRow) -> Result<(), WriteError> {
    diesel::insert_into(audit_outbox::table)
        .values(event)
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl IdentityRepository for DieselIdentityRepository {
    async fn insert(
        &self,
        record: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        let row = IdentityWrite::from_record(record).map_err(|err| encode_error("profile", &err))?;
        let event = NewOutboxRow::from_record(audit).map_err(|err| encode_error("audit", &err))?;
        let claim = NewRegistryRow {
            email: record.email.as_ref(),
            partition: record.partition.table_name(),
            identity_id: record.id.as_ref(),
        };
        let partition = record.partition;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction::<_, WriteError, _>(|conn| {
            async move {
                diesel::insert_into(identity_emails::table)
                    .values(&claim)
                    .execute(conn)
                    .await?;
                insert_row(conn, partition, &row).await?;
                enqueue(conn, &event).await
            }
            .scope_boxed()
        })
        .await
        .map_err(map_write_error)
    }

    async fn insert_transferred(
        &self,
        record: &IdentityRecord,
        source_partition: Partition,
        source_id: &IdentityId,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        let row = IdentityWrite::from_record(record).map_err(|err| encode_error("profile", &err))?;
        let event = NewOutboxRow::from_record(audit).map_err(|err| encode_error("audit", &err))?;
        let email = record.email.as_ref();
        let target = record.partition;
        let new_id = record.id.as_ref();
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction::<_, WriteError, _>(|conn| {
            async move {
                // Move the registry claim from the source record to the target.
                let moved = diesel::update(
                    identity_emails::table
                        .filter(identity_emails::email.eq(email))
                        .filter(identity_emails::partition.eq(source_partition.table_name()))
                        .filter(identity_emails::identity_id.eq(source_id.as_ref())),
                )
                .set((
                    identity_emails::partition.eq(target.table_name()),
                    identity_emails::identity_id.eq(new_id),
                    identity_emails::claimed_at.eq(diesel::dsl::now),
                ))
                .execute(conn)
                .await?;
                if moved == 0 {
                    return Err(WriteError::Rejected(
                        IdentityRepositoryError::duplicate_email(REGISTRY_TABLE),
                    ));
                }
                insert_row(conn, target, &row).await?;
                enqueue(conn, &event).await
            }
            .scope_boxed()
        })
        .await
        .map_err(map_write_error)
    }

    async fn update(
        &self,
        expected: &IdentityRecord,
        record: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        let row = IdentityWrite::from_record(record).map_err(|err| encode_error("profile", &err))?;
        let event = NewOutboxRow::from_record(audit).map_err(|err| encode_error("audit", &err))?;
        let statement = format!(
            "UPDATE {table} SET credential_hash = $2, registration_status = $3, profile = $4, \
             security_question = $5, security_answer_hash = $6, last_login = $7 WHERE id = $1",
            table = expected.partition.table_name()
        );
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction::<_, WriteError, _>(|conn| {
            async move {
                lock_unchanged(conn, expected).await?;
                sql_query(statement)
                    .bind::<Text, _>(row.id)
                    .bind::<Text, _>(row.credential_hash)
                    .bind::<Text, _>(row.registration_status)
                    .bind::<Jsonb, _>(&row.profile)
                    .bind::<Nullable<Text>, _>(row.security_question)
                    .bind::<Nullable<Text>, _>(row.security_answer_hash)
                    .bind::<Nullable<Timestamptz>, _>(row.last_login)
                    .execute(conn)
                    .await?;
                enqueue(conn, &event).await
            }
            .scope_boxed()
        })
        .await
        .map_err(map_write_error)
    }

    async fn delete(
        &self,
        expected: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        let event = NewOutboxRow::from_record(audit).map_err(|err| encode_error("audit", &err))?;
        let partition = expected.partition;
        let statement = format!(
            "DELETE FROM {table} WHERE id = $1",
            table = partition.table_name()
        );
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        conn.transaction::<_, WriteError, _>(|conn| {
            async move {
                lock_unchanged(conn, expected).await?;
                sql_query(statement)
                    .bind::<Text, _>(expected.id.as_ref())
                    .execute(conn)
                    .await?;
                // A transferred-away source no longer owns the claim; leave it.
                diesel::delete(
                    identity_emails::table
                        .filter(identity_emails::email.eq(expected.email.as_ref()))
                        .filter(identity_emails::partition.eq(partition.table_name()))
                        .filter(identity_emails::identity_id.eq(expected.id.as_ref())),
                )
                .execute(conn)
                .await?;
                enqueue(conn, &event).await
            }
            .scope_boxed()
        })
        .await
        .map_err(map_write_error)
    }

    async fn find_by_email(
        &self,
        partition: Partition,
        email: &EmailAddress,
    ) -> Result<Option<IdentityRecord>, IdentityRepositoryError> {
        let statement = format!(
            "SELECT {IDENTITY_COLUMNS} FROM {table} WHERE lower(email) = $1",
            table = partition.table_name()
        );
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = sql_query(statement)
            .bind::<Text, _>(email.as_ref())
            .get_result::<IdentityRow>(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        row.map(|row| row.into_record(partition))
            .transpose()
            .map_err(IdentityRepositoryError::query)
    }

    async fn find_by_id(
        &self,
        partition: Partition,
        id: &IdentityId,
    ) -> Result<Option<IdentityRecord>, IdentityRepositoryError> {
        let statement = format!(
            "SELECT {IDENTITY_COLUMNS} FROM {table} WHERE id = $1",
            table = partition.table_name()
        );
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = sql_query(statement)
            .bind::<Text, _>(id.as_ref())
            .get_result::<IdentityRow>(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        row.map(|row| row.into_record(partition))
            .transpose()
            .map_err(IdentityRepositoryError::query)
    }

    async fn partition_statistics(
        &self,
        partition: Partition,
    ) -> Result<PartitionStatistics, IdentityRepositoryError> {
        let statement = format!(
            "SELECT COALESCE(profile->>'region', '') AS region, \
             COALESCE(profile->>'school', profile->>'institution', profile->>'office', '') \
             AS affiliation, COUNT(*) AS total FROM {table} GROUP BY 1, 2",
            table = partition.table_name()
        );
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows = sql_query(statement)
            .load::<StatisticsRow>(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        let mut stats = PartitionStatistics::empty(partition);
        for row in rows {
            let count = u64::try_from(row.total)
                .map_err(|_| IdentityRepositoryError::query("negative group count"))?;
            stats.record_many(&row.region, &row.affiliation, count);
        }
        Ok(stats)
    }
}

#[async_trait]
impl AuditOutbox for DieselIdentityRepository {
    async fn pending(&self, limit: usize) -> Result<Vec<AuditRecord>, IdentityRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<OutboxRow> = audit_outbox::table
            .filter(audit_outbox::relayed_at.is_null())
            .order_by((audit_outbox::enqueued_at.asc(), audit_outbox::event_id.asc()))
            .limit(sql_limit(limit))
            .select(OutboxRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        collect_rows(
            rows.into_iter().map(AuditRecord::try_from),
            IdentityRepositoryError::query,
        )
    }

    async fn mark_relayed(&self, event_id: Uuid) -> Result<(), IdentityRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::update(
            audit_outbox::table
                .filter(audit_outbox::event_id.eq(event_id))
                .filter(audit_outbox::relayed_at.is_null()),
        )
        .set(audit_outbox::relayed_at.eq(diesel::dsl::now))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Error mapping and statement shape; database round trips live in the
    //! integration suite.
    use super::*;
    use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind};
    use rstest::rstest;

    struct ViolationInfo(&'static str);

    impl DatabaseErrorInformation for ViolationInfo {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }
        fn details(&self) -> Option<&str> {
            None
        }
        fn hint(&self) -> Option<&str> {
            None
        }
        fn table_name(&self) -> Option<&str> {
            Some(self.0)
        }
        fn column_name(&self) -> Option<&str> {
            None
        }
        fn constraint_name(&self) -> Option<&str> {
            None
        }
        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    #[rstest]
    #[case("identity_emails", "identity_emails")]
    #[case("students_advanced", "students_advanced")]
    fn unique_violations_become_duplicate_email(#[case] table: &'static str, #[case] expected: &str) {
        let error = diesel::result::Error::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new(ViolationInfo(table)),
        );
        assert_eq!(
            map_diesel_error(error),
            IdentityRepositoryError::duplicate_email(expected)
        );
    }

    #[rstest]
    #[case(IdentityRepositoryError::not_found("EXB-AD-1-0000"))]
    #[case(IdentityRepositoryError::conflict("EXB-AD-1-0000"))]
    fn rejected_writes_pass_through_unchanged(#[case] rejected: IdentityRepositoryError) {
        assert_eq!(
            map_write_error(WriteError::Rejected(rejected.clone())),
            rejected
        );
    }

    #[rstest]
    fn pool_errors_map_to_connection_errors() {
        let err = map_pool_error(PoolError::checkout("connection refused"));
        assert!(matches!(err, IdentityRepositoryError::Connection { .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[rstest]
    fn guarded_writes_lock_the_row_they_compare() {
        let statement = locked_row_sql(Partition::Teacher);
        assert!(statement.starts_with("SELECT id, email,"));
        assert!(statement.contains("FROM teachers WHERE id = $1"));
        assert!(statement.ends_with("FOR UPDATE"));
    }

    #[rstest]
    fn insert_statement_targets_the_partition_table() {
        let statement = insert_sql(Partition::StudentAdvanced);
        assert!(statement.starts_with("INSERT INTO students_advanced ("));
        assert!(statement.contains("$9"));
    }
}
