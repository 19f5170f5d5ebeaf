//! PostgreSQL-backed store for partition transfer intents.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::domain::TransferIntent;
use crate::domain::ports::{TransferIntentRepository, TransferIntentRepositoryError};

use super::diesel_basic_error_mapping::{collect_rows, map_basic_diesel_error, map_basic_pool_error};
use super::models::TransferIntentRow;
use super::pool::{DbPool, PoolError};
use super::schema::transfer_intents;

/// States that end a transfer; anything else is still open.
const CLOSED_STATES: [&str; 2] = ["complete", "abandoned"];

/// Diesel-backed implementation of the [`TransferIntentRepository`] port.
#[derive(Clone)]
pub struct DieselTransferIntentRepository {
    pool: DbPool,
}

impl DieselTransferIntentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> TransferIntentRepositoryError {
    map_basic_pool_error(error, TransferIntentRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> TransferIntentRepositoryError {
    map_basic_diesel_error(
        error,
        TransferIntentRepositoryError::query,
        TransferIntentRepositoryError::connection,
    )
}

#[async_trait]
impl TransferIntentRepository for DieselTransferIntentRepository {
    async fn save(&self, intent: &TransferIntent) -> Result<(), TransferIntentRepositoryError> {
        let row = TransferIntentRow::from(intent);
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::insert_into(transfer_intents::table)
            .values(&row)
            .on_conflict(transfer_intents::id)
            .do_update()
            .set((
                transfer_intents::state.eq(excluded(transfer_intents::state)),
                transfer_intents::updated_at.eq(excluded(transfer_intents::updated_at)),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(())
    }

    async fn find(
        &self,
        id: Uuid,
    ) -> Result<Option<TransferIntent>, TransferIntentRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<TransferIntentRow> = transfer_intents::table
            .filter(transfer_intents::id.eq(id))
            .select(TransferIntentRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        row.map(TransferIntent::try_from)
            .transpose()
            .map_err(TransferIntentRepositoryError::query)
    }

    async fn find_open(&self) -> Result<Vec<TransferIntent>, TransferIntentRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<TransferIntentRow> = transfer_intents::table
            .filter(transfer_intents::state.ne_all(CLOSED_STATES))
            .order_by((transfer_intents::created_at.asc(), transfer_intents::id.asc()))
            .select(TransferIntentRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        collect_rows(
            rows.into_iter().map(TransferIntent::try_from),
            TransferIntentRepositoryError::query,
        )
    }
}
