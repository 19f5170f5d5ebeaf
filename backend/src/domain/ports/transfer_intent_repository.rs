//! Port for persisted partition-transfer intents.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::TransferIntent;

use super::define_port_error;

define_port_error! {
    /// Errors raised by transfer intent adapters.
    pub enum TransferIntentRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } => "transfer intent connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "transfer intent query failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferIntentRepository: Send + Sync {
    /// Insert or overwrite an intent keyed by its id.
    async fn save(&self, intent: &TransferIntent) -> Result<(), TransferIntentRepositoryError>;

    async fn find(&self, id: Uuid) -> Result<Option<TransferIntent>, TransferIntentRepositoryError>;

    /// Intents in `pending`, `created`, or `source_deleted`, oldest first.
    async fn find_open(&self) -> Result<Vec<TransferIntent>, TransferIntentRepositoryError>;
}
