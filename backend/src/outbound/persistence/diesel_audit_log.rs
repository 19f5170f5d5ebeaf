//! PostgreSQL-backed append-only audit log.
//!
//! Appends are idempotent on `event_id`: relaying the same outbox entry twice
//! leaves one row and reports [`AuditAppend::AlreadyPresent`].

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::AuditRecord;
use crate::domain::ports::{AuditAppend, AuditLog, AuditLogError};

use super::diesel_basic_error_mapping::{collect_rows, map_basic_diesel_error, map_basic_pool_error};
use super::models::{AuditLogRow, NewAuditLogRow};
use super::pool::{DbPool, PoolError};
use super::schema::audit_log;

/// Diesel-backed implementation of the [`AuditLog`] port.
#[derive(Clone)]
pub struct DieselAuditLog {
    pool: DbPool,
}

impl DieselAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> AuditLogError {
    map_basic_pool_error(error, AuditLogError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> AuditLogError {
    map_basic_diesel_error(error, AuditLogError::write, AuditLogError::connection)
}

const fn append_outcome(inserted_rows: usize) -> AuditAppend {
    if inserted_rows == 0 {
        AuditAppend::AlreadyPresent
    } else {
        AuditAppend::Appended
    }
}

#[async_trait]
impl AuditLog for DieselAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<AuditAppend, AuditLogError> {
        let row = NewAuditLogRow::from(record);
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let inserted = diesel::insert_into(audit_log::table)
            .values(&row)
            .on_conflict(audit_log::event_id)
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(append_outcome(inserted))
    }

    async fn records_for(
        &self,
        table_name: &str,
        record_id: &str,
    ) -> Result<Vec<AuditRecord>, AuditLogError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<AuditLogRow> = audit_log::table
            .filter(audit_log::table_name.eq(table_name))
            .filter(audit_log::record_id.eq(record_id))
            .order_by(audit_log::id.asc())
            .select(AuditLogRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        collect_rows(rows.into_iter().map(AuditRecord::try_from), AuditLogError::write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, AuditAppend::AlreadyPresent)]
    #[case(1, AuditAppend::Appended)]
    fn conflict_free_inserts_count_as_appended(#[case] rows: usize, #[case] expected: AuditAppend) {
        assert_eq!(append_outcome(rows), expected);
    }

    #[rstest]
    fn diesel_errors_map_to_write_errors() {
        let err = map_diesel_error(diesel::result::Error::NotFound);
        assert!(matches!(err, AuditLogError::Write { .. }));
    }
}
