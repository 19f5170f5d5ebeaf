//! In-memory adapter for every identity store port.
//!
//! All state sits behind one async mutex, so each port call is one unit of
//! work: a mutation, its email registry change, and its outbox entry commit
//! together. The same uniqueness rules as the PostgreSQL schema apply (a
//! global email registry plus per-partition unique emails).
//!
//! Used by the integration suite and for local runs without a database. Fault
//! switches let tests interrupt the audit log, deletes, and intent writes.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::ports::{
    AuditAppend, AuditLog, AuditLogError, AuditOutbox, IdentityRepository,
    IdentityRepositoryError, TransferIntentRepository, TransferIntentRepositoryError,
};
use crate::domain::{
    AuditRecord, EmailAddress, IdentityId, IdentityRecord, Partition, PartitionStatistics,
    TransferIntent,
};

const REGISTRY_TABLE: &str = "identity_emails";

#[derive(Debug, Clone)]
struct OutboxEntry {
    record: AuditRecord,
    relayed: bool,
}

#[derive(Debug, Default)]
struct Faults {
    audit_log_down: bool,
    failing_deletes: usize,
    failing_intent_saves: usize,
}

#[derive(Debug, Default)]
struct State {
    partitions: BTreeMap<Partition, BTreeMap<IdentityId, IdentityRecord>>,
    registry: HashMap<EmailAddress, (Partition, IdentityId)>,
    outbox: Vec<OutboxEntry>,
    audit_log: Vec<AuditRecord>,
    intents: HashMap<Uuid, TransferIntent>,
    faults: Faults,
}

impl State {
    fn partition(&self, partition: Partition) -> Option<&BTreeMap<IdentityId, IdentityRecord>> {
        self.partitions.get(&partition)
    }

    fn partition_holds_email(&self, partition: Partition, email: &EmailAddress) -> bool {
        self.partition(partition)
            .is_some_and(|rows| rows.values().any(|row| &row.email == email))
    }

    fn enqueue(&mut self, audit: &AuditRecord) {
        self.outbox.push(OutboxEntry {
            record: audit.clone(),
            relayed: false,
        });
    }

    fn store(&mut self, record: &IdentityRecord) {
        self.partitions
            .entry(record.partition)
            .or_default()
            .insert(record.id.clone(), record.clone());
        self.registry.insert(
            record.email.clone(),
            (record.partition, record.id.clone()),
        );
    }
}

/// Identity store held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    state: Mutex<State>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import a record as already-migrated data, bypassing the outbox.
    pub async fn seed(&self, record: IdentityRecord) -> Result<(), IdentityRepositoryError> {
        let mut state = self.state.lock().await;
        if state.registry.contains_key(&record.email) {
            return Err(IdentityRepositoryError::duplicate_email(REGISTRY_TABLE));
        }
        state.store(&record);
        Ok(())
    }

    /// Make audit log appends fail until re-enabled.
    pub async fn set_audit_log_available(&self, available: bool) {
        self.state.lock().await.faults.audit_log_down = !available;
    }

    /// Fail the next `count` deletes with a connection error.
    pub async fn fail_next_deletes(&self, count: usize) {
        self.state.lock().await.faults.failing_deletes = count;
    }

    /// Fail the next `count` transfer intent writes with a connection error.
    pub async fn fail_next_intent_saves(&self, count: usize) {
        self.state.lock().await.faults.failing_intent_saves = count;
    }

    /// Audit log contents in append order.
    pub async fn audit_log_entries(&self) -> Vec<AuditRecord> {
        self.state.lock().await.audit_log.clone()
    }

    /// Number of outbox entries not yet relayed.
    pub async fn pending_outbox_len(&self) -> usize {
        self.state
            .lock()
            .await
            .outbox
            .iter()
            .filter(|entry| !entry.relayed)
            .count()
    }

    /// Records held by one partition, ordered by identifier.
    pub async fn records_in(&self, partition: Partition) -> Vec<IdentityRecord> {
        self.state
            .lock()
            .await
            .partition(partition)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every stored transfer intent, oldest first.
    pub async fn transfer_intents(&self) -> Vec<TransferIntent> {
        let state = self.state.lock().await;
        let mut intents: Vec<_> = state.intents.values().cloned().collect();
        intents.sort_by_key(|intent| intent.created_at);
        intents
    }
}

#[async_trait]
impl IdentityRepository for InMemoryIdentityStore {
    async fn insert(
        &self,
        record: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        let mut state = self.state.lock().await;
        if state.registry.contains_key(&record.email) {
            return Err(IdentityRepositoryError::duplicate_email(REGISTRY_TABLE));
        }
        if state.partition_holds_email(record.partition, &record.email) {
            return Err(IdentityRepositoryError::duplicate_email(
                record.partition.table_name(),
            ));
        }
        state.store(record);
        state.enqueue(audit);
        Ok(())
    }

    async fn insert_transferred(
        &self,
        record: &IdentityRecord,
        source_partition: Partition,
        source_id: &IdentityId,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        let mut state = self.state.lock().await;
        let owned_by_source = state
            .registry
            .get(&record.email)
            .is_some_and(|(partition, id)| *partition == source_partition && id == source_id);
        if !owned_by_source {
            return Err(IdentityRepositoryError::duplicate_email(REGISTRY_TABLE));
        }
        if state.partition_holds_email(record.partition, &record.email) {
            return Err(IdentityRepositoryError::duplicate_email(
                record.partition.table_name(),
            ));
        }
        state.store(record);
        state.enqueue(audit);
        Ok(())
    }

    async fn update(
        &self,
        expected: &IdentityRecord,
        record: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        let mut state = self.state.lock().await;
        let slot = state
            .partitions
            .get_mut(&expected.partition)
            .and_then(|rows| rows.get_mut(&expected.id))
            .ok_or_else(|| IdentityRepositoryError::not_found(expected.id.to_string()))?;
        if slot != expected {
            return Err(IdentityRepositoryError::conflict(expected.id.to_string()));
        }
        *slot = record.clone();
        state.enqueue(audit);
        Ok(())
    }

    async fn delete(
        &self,
        expected: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        let mut state = self.state.lock().await;
        if state.faults.failing_deletes > 0 {
            state.faults.failing_deletes -= 1;
            return Err(IdentityRepositoryError::connection("injected delete failure"));
        }
        let (partition, id) = (expected.partition, &expected.id);
        let rows = state
            .partitions
            .get_mut(&partition)
            .filter(|rows| rows.contains_key(id))
            .ok_or_else(|| IdentityRepositoryError::not_found(id.to_string()))?;
        if rows.get(id) != Some(expected) {
            return Err(IdentityRepositoryError::conflict(id.to_string()));
        }
        rows.remove(id);
        let still_owned = state
            .registry
            .get(&expected.email)
            .is_some_and(|(owner_partition, owner_id)| {
                *owner_partition == partition && owner_id == id
            });
        if still_owned {
            state.registry.remove(&expected.email);
        }
        state.enqueue(audit);
        Ok(())
    }

    async fn find_by_email(
        &self,
        partition: Partition,
        email: &EmailAddress,
    ) -> Result<Option<IdentityRecord>, IdentityRepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .partition(partition)
            .and_then(|rows| rows.values().find(|row| &row.email == email))
            .cloned())
    }

    async fn find_by_id(
        &self,
        partition: Partition,
        id: &IdentityId,
    ) -> Result<Option<IdentityRecord>, IdentityRepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .partition(partition)
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    async fn partition_statistics(
        &self,
        partition: Partition,
    ) -> Result<PartitionStatistics, IdentityRepositoryError> {
        let state = self.state.lock().await;
        let mut stats = PartitionStatistics::empty(partition);
        for row in state.partition(partition).into_iter().flat_map(|rows| rows.values()) {
            stats.record(row.profile.region(), row.profile.affiliation());
        }
        Ok(stats)
    }
}

#[async_trait]
impl AuditOutbox for InMemoryIdentityStore {
    async fn pending(&self, limit: usize) -> Result<Vec<AuditRecord>, IdentityRepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|entry| !entry.relayed)
            .take(limit)
            .map(|entry| entry.record.clone())
            .collect())
    }

    async fn mark_relayed(&self, event_id: Uuid) -> Result<(), IdentityRepositoryError> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state
            .outbox
            .iter_mut()
            .find(|entry| entry.record.event_id == event_id)
        {
            entry.relayed = true;
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLog for InMemoryIdentityStore {
    async fn append(&self, record: &AuditRecord) -> Result<AuditAppend, AuditLogError> {
        let mut state = self.state.lock().await;
        if state.faults.audit_log_down {
            return Err(AuditLogError::connection("audit log unavailable"));
        }
        if state
            .audit_log
            .iter()
            .any(|entry| entry.event_id == record.event_id)
        {
            return Ok(AuditAppend::AlreadyPresent);
        }
        state.audit_log.push(record.clone());
        Ok(AuditAppend::Appended)
    }

    async fn records_for(
        &self,
        table_name: &str,
        record_id: &str,
    ) -> Result<Vec<AuditRecord>, AuditLogError> {
        let state = self.state.lock().await;
        Ok(state
            .audit_log
            .iter()
            .filter(|entry| entry.table_name == table_name && entry.record_id == record_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransferIntentRepository for InMemoryIdentityStore {
    async fn save(&self, intent: &TransferIntent) -> Result<(), TransferIntentRepositoryError> {
        let mut state = self.state.lock().await;
        if state.faults.failing_intent_saves > 0 {
            state.faults.failing_intent_saves -= 1;
            return Err(TransferIntentRepositoryError::connection(
                "injected intent write failure",
            ));
        }
        state.intents.insert(intent.id, intent.clone());
        Ok(())
    }

    async fn find(
        &self,
        id: Uuid,
    ) -> Result<Option<TransferIntent>, TransferIntentRepositoryError> {
        Ok(self.state.lock().await.intents.get(&id).cloned())
    }

    async fn find_open(&self) -> Result<Vec<TransferIntent>, TransferIntentRepositoryError> {
        let state = self.state.lock().await;
        let mut open: Vec<_> = state
            .intents
            .values()
            .filter(|intent| intent.state.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|intent| intent.created_at);
        Ok(open)
    }
}
