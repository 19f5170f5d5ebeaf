//! Partition transfer coordinator.
//!
//! Moving a record between partitions cannot be one transaction, so it runs as
//! a saga whose progress is persisted as a [`TransferIntent`]:
//!
//! 1. `pending`: intent saved with a freshly generated target identifier.
//! 2. `created`: target record inserted and the email registry repointed.
//! 3. `source_deleted`: source record removed.
//! 4. `complete`: both audit events delivered.
//!
//! Interrupting the saga leaves either `pending` (nothing moved yet, or the
//! insert committed but was not recorded) or `created` (both records exist).
//! [`PartitionTransferCoordinator::reconcile`] resumes both, and never leaves
//! an identity in neither partition because the source is only removed once
//! the target is confirmed present.
//!
//! The source stays writable until it is removed. Its removal is a guarded
//! delete; when the source changed after it was copied, those changes are
//! first merged into the target so no committed update is lost.

use std::sync::Arc;

use chrono::TimeDelta;
use mockable::Clock;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::audit_trail::AuditTrailWriter;
use super::ports::{IdentityRepository, IdentityRepositoryError, TransferIntentRepository};
use super::repository_errors::{map_identity_repository_error, map_transfer_intent_error};
use super::{
    AuditActor, AuditRecord, AuditSnapshotError, Error, IdentifierGenerator, IdentityId,
    IdentityRecord, Partition, TransferIntent, TransferState,
};

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub examined: usize,
    pub completed: usize,
    pub abandoned: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Attempts at removing a source that keeps changing underneath the saga.
const MAX_REMOVAL_ATTEMPTS: usize = 3;

enum Resumed {
    Completed,
    Abandoned,
}

/// Runs partition transfers as a persisted saga and reconciles interrupted ones.
pub struct PartitionTransferCoordinator<R, T> {
    repository: Arc<R>,
    intents: Arc<T>,
    audit: AuditTrailWriter,
    ids: IdentifierGenerator,
    clock: Arc<dyn Clock>,
}

impl<R, T> PartitionTransferCoordinator<R, T>
where
    R: IdentityRepository,
    T: TransferIntentRepository,
{
    pub fn new(
        repository: Arc<R>,
        intents: Arc<T>,
        audit: AuditTrailWriter,
        ids: IdentifierGenerator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            intents,
            audit,
            ids,
            clock,
        }
    }

    /// Move the record `id` from `from` to `to` under a new identifier.
    ///
    /// # Errors
    /// - `InvalidRequest` when the partitions are equal or belong to different
    ///   categories.
    /// - `NotFound` when `from` does not hold `id`.
    /// - `TransferConflict` when `to` already holds the email.
    pub async fn transfer(
        &self,
        id: &IdentityId,
        from: Partition,
        to: Partition,
        actor: &AuditActor,
    ) -> Result<IdentityRecord, Error> {
        validate_route(from, to)?;

        let source = self.find(from, id).await?.ok_or_else(|| {
            Error::not_found("identity does not exist in the source partition")
                .with_details(json!({ "id": id, "partition": from }))
        })?;

        if self
            .repository
            .find_by_email(to, &source.email)
            .await
            .map_err(map_identity_repository_error)?
            .is_some()
        {
            return Err(conflict(from, to));
        }

        let target_id = self.ids.new_id(to.category());
        let intent = TransferIntent::new(
            source.id.clone(),
            from,
            to,
            target_id.clone(),
            source.email.clone(),
            self.clock.utc(),
        );
        self.intents
            .save(&intent)
            .await
            .map_err(map_transfer_intent_error)?;

        let target = source.relocated(to, target_id);
        let insert_audit = audit_event(AuditRecord::for_insert(&target, actor, self.clock.utc()))?;
        if let Err(err) = self
            .repository
            .insert_transferred(&target, from, &source.id, &insert_audit)
            .await
        {
            return Err(self.insert_failed(&intent, from, to, err).await);
        }
        let intent = self.advance(&intent, TransferState::Created).await;
        self.audit.deliver(&insert_audit).await;

        let target = self
            .remove_source(&intent, Some(&source), actor)
            .await?
            .unwrap_or(target);
        let intent = self.advance(&intent, TransferState::SourceDeleted).await;
        self.advance(&intent, TransferState::Complete).await;

        info!(
            intent_id = %intent.id,
            source_id = %source.id,
            target_id = %target.id,
            from = %from,
            to = %to,
            "partition transfer complete"
        );
        Ok(target)
    }

    /// Resume or close every open intent untouched for at least `min_age`.
    pub async fn reconcile(&self, min_age: TimeDelta) -> Result<ReconciliationReport, Error> {
        let cutoff = self.clock.utc() - min_age;
        let open = self
            .intents
            .find_open()
            .await
            .map_err(map_transfer_intent_error)?;

        let mut report = ReconciliationReport::default();
        for intent in open {
            report.examined += 1;
            if intent.updated_at > cutoff {
                report.skipped += 1;
                continue;
            }
            match self.resume(&intent).await {
                Ok(Resumed::Completed) => report.completed += 1,
                Ok(Resumed::Abandoned) => report.abandoned += 1,
                Err(err) => {
                    error!(
                        intent_id = %intent.id,
                        state = %intent.state,
                        error = %err,
                        "transfer reconciliation failed"
                    );
                    report.failed += 1;
                }
            }
        }
        info!(
            examined = report.examined,
            completed = report.completed,
            abandoned = report.abandoned,
            skipped = report.skipped,
            failed = report.failed,
            "transfer reconciliation pass finished"
        );
        Ok(report)
    }

    async fn resume(&self, intent: &TransferIntent) -> Result<Resumed, Error> {
        match intent.state {
            TransferState::Pending => {
                let target = self.find(intent.target_partition, &intent.target_id).await?;
                if target.is_none() {
                    self.save_state(intent, TransferState::Abandoned).await?;
                    return Ok(Resumed::Abandoned);
                }
                self.finish_source_removal(intent).await
            }
            TransferState::Created => self.finish_source_removal(intent).await,
            TransferState::SourceDeleted => {
                self.save_state(intent, TransferState::Complete).await?;
                Ok(Resumed::Completed)
            }
            TransferState::Complete | TransferState::Abandoned => Ok(Resumed::Completed),
        }
    }

    async fn finish_source_removal(&self, intent: &TransferIntent) -> Result<Resumed, Error> {
        // The copied snapshot is not persisted, so nothing is merged here.
        self.remove_source(intent, None, &AuditActor::system()).await?;
        let intent = self.save_state(intent, TransferState::SourceDeleted).await?;
        self.save_state(&intent, TransferState::Complete).await?;
        info!(intent_id = %intent.id, "interrupted transfer completed");
        Ok(Resumed::Completed)
    }

    /// Delete the transfer source, merging any changes made to it since
    /// `copied` into the target first.
    ///
    /// Returns the target when it had to be updated. A source that is
    /// already gone counts as removed.
    async fn remove_source(
        &self,
        intent: &TransferIntent,
        copied: Option<&IdentityRecord>,
        actor: &AuditActor,
    ) -> Result<Option<IdentityRecord>, Error> {
        let mut base = copied.cloned();
        let mut updated_target = None;
        for attempt in 1..=MAX_REMOVAL_ATTEMPTS {
            let Some(source) = self.find(intent.source_partition, &intent.source_id).await? else {
                return Ok(updated_target);
            };

            let changed_from = base.clone().filter(|base| *base != source);
            if let Some(changed_from) = changed_from {
                let target = self
                    .find(intent.target_partition, &intent.target_id)
                    .await?
                    .ok_or_else(|| {
                        Error::internal("transfer target vanished before source removal")
                            .with_details(json!({ "intentId": intent.id }))
                    })?;
                let merged = target.merged_changes(&changed_from, &source);
                if merged != target {
                    let audit = audit_event(AuditRecord::for_update(
                        &target,
                        &merged,
                        actor,
                        self.clock.utc(),
                    ))?;
                    match self.repository.update(&target, &merged, &audit).await {
                        Ok(()) => {
                            info!(
                                target_id = %merged.id,
                                "late source changes merged into transfer target"
                            );
                            self.audit.deliver(&audit).await;
                            updated_target = Some(merged);
                        }
                        Err(IdentityRepositoryError::Conflict { .. }) => {
                            debug!(attempt, "transfer target changed during merge; retrying");
                            continue;
                        }
                        Err(err) => return Err(map_identity_repository_error(err)),
                    }
                }
                base = Some(source.clone());
            }

            let audit = audit_event(AuditRecord::for_delete(&source, actor, self.clock.utc()))?;
            match self.repository.delete(&source, &audit).await {
                Ok(()) => {
                    self.audit.deliver(&audit).await;
                    return Ok(updated_target);
                }
                Err(IdentityRepositoryError::NotFound { .. }) => return Ok(updated_target),
                Err(IdentityRepositoryError::Conflict { .. }) => {
                    debug!(attempt, "transfer source changed before removal; retrying");
                }
                Err(err) => return Err(map_identity_repository_error(err)),
            }
        }
        Err(map_identity_repository_error(
            IdentityRepositoryError::conflict(intent.source_id.to_string()),
        ))
    }

    async fn find(
        &self,
        partition: Partition,
        id: &IdentityId,
    ) -> Result<Option<IdentityRecord>, Error> {
        self.repository
            .find_by_id(partition, id)
            .await
            .map_err(map_identity_repository_error)
    }

    async fn insert_failed(
        &self,
        intent: &TransferIntent,
        from: Partition,
        to: Partition,
        err: IdentityRepositoryError,
    ) -> Error {
        match err {
            IdentityRepositoryError::DuplicateEmail { .. } => {
                // Nothing was written, so the intent can be closed.
                if let Err(save_err) = self.save_state(intent, TransferState::Abandoned).await {
                    warn!(intent_id = %intent.id, error = %save_err, "failed to abandon intent");
                }
                conflict(from, to)
            }
            // The insert may have committed; reconciliation decides.
            other => map_identity_repository_error(other),
        }
    }

    async fn save_state(
        &self,
        intent: &TransferIntent,
        state: TransferState,
    ) -> Result<TransferIntent, Error> {
        let next = intent.advanced(state, self.clock.utc());
        self.intents
            .save(&next)
            .await
            .map_err(map_transfer_intent_error)?;
        Ok(next)
    }

    /// Record progress once the row mutation has committed. A lost update is
    /// repaired by reconciliation, so it is logged rather than returned.
    async fn advance(&self, intent: &TransferIntent, state: TransferState) -> TransferIntent {
        match self.save_state(intent, state).await {
            Ok(next) => next,
            Err(err) => {
                warn!(
                    intent_id = %intent.id,
                    state = %state,
                    error = %err,
                    "failed to record transfer progress"
                );
                intent.clone()
            }
        }
    }
}

fn validate_route(from: Partition, to: Partition) -> Result<(), Error> {
    if from == to {
        return Err(Error::invalid_request(
            "source and destination partitions must differ",
        ));
    }
    if from.category() != to.category() {
        return Err(
            Error::invalid_request("transfers must stay within one actor category")
                .with_details(json!({ "from": from, "to": to })),
        );
    }
    Ok(())
}

fn conflict(from: Partition, to: Partition) -> Error {
    Error::transfer_conflict("destination partition already holds this email")
        .with_details(json!({ "from": from, "to": to }))
}

fn audit_event(result: Result<AuditRecord, AuditSnapshotError>) -> Result<AuditRecord, Error> {
    result.map_err(|err| Error::internal(err.to_string()))
}
