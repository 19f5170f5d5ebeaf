//! Identity service implementing the identity driving ports.
//!
//! The service validates input, resolves partitions through the router,
//! hashes secrets with the credential codec, and hands each mutation plus its
//! audit event to the repository as one unit of work. Before returning it
//! awaits delivery of that audit event and mirrors the committed outcome into
//! the optional read cache.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use mockable::Clock;
use tracing::{debug, info};

use super::audit_trail::{AuditTrailWriter, RelayReport};
use super::federated_lookup::FederatedLookup;
use super::partition_transfer::{PartitionTransferCoordinator, ReconciliationReport};
use super::ports::{
    AuditFailureAlerts, AuditLog, AuditOutbox, IdentityCommand, IdentityQuery, IdentityReadCache,
    IdentityRepository, IdentityRepositoryError, ScopedCredentials, TransferIntentRepository,
};
use super::repository_errors::map_identity_repository_error;
use super::{
    ActorCategory, AuditActor, AuditRecord, AuditSnapshotError, CredentialCodec, CredentialError,
    CredentialHash, EmailAddress, Error, ErrorCode, ExamLevel, IdentifierGenerator, IdentityId,
    IdentityRecord, IdentityStatistics, NewIdentity, Partition, ProfileAttributes, PublicIdentity,
    RegistrationStatus, Secret, SecurityQuestion, partitions_for, resolve_partition,
};

/// Default age an open transfer intent must reach before reconciliation
/// touches it, so in-flight transfers are left alone.
pub const DEFAULT_RECONCILE_MIN_AGE_SECS: i64 = 60;

/// Attempts at a guarded write before a concurrent modification is reported.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Collaborators wired into an [`IdentityService`].
pub struct IdentityStoreParts<R, T> {
    pub repository: Arc<R>,
    pub outbox: Arc<dyn AuditOutbox>,
    pub transfer_intents: Arc<T>,
    pub audit_log: Arc<dyn AuditLog>,
    pub alerts: Arc<dyn AuditFailureAlerts>,
    pub codec: CredentialCodec,
    pub ids: IdentifierGenerator,
    pub clock: Arc<dyn Clock>,
}

/// Application service behind [`IdentityCommand`] and [`IdentityQuery`].
///
/// Generic over the identity repository `R` and the transfer intent
/// repository `T` so adapters are chosen at wiring time.
pub struct IdentityService<R, T> {
    repository: Arc<R>,
    lookup: FederatedLookup<R>,
    transfers: PartitionTransferCoordinator<R, T>,
    audit: AuditTrailWriter,
    codec: CredentialCodec,
    ids: IdentifierGenerator,
    clock: Arc<dyn Clock>,
    cache: Option<Arc<dyn IdentityReadCache>>,
    reconcile_min_age: TimeDelta,
}

impl<R, T> IdentityService<R, T>
where
    R: IdentityRepository,
    T: TransferIntentRepository,
{
    pub fn new(parts: IdentityStoreParts<R, T>) -> Self {
        let IdentityStoreParts {
            repository,
            outbox,
            transfer_intents,
            audit_log,
            alerts,
            codec,
            ids,
            clock,
        } = parts;
        let audit = AuditTrailWriter::new(outbox, audit_log, alerts);
        let transfers = PartitionTransferCoordinator::new(
            Arc::clone(&repository),
            transfer_intents,
            audit.clone(),
            ids.clone(),
            Arc::clone(&clock),
        );
        Self {
            lookup: FederatedLookup::new(Arc::clone(&repository)),
            repository,
            transfers,
            audit,
            codec,
            ids,
            clock,
            cache: None,
            reconcile_min_age: TimeDelta::seconds(DEFAULT_RECONCILE_MIN_AGE_SECS),
        }
    }

    /// Mirror committed outcomes into a read cache for legacy call sites.
    pub fn with_cache(mut self, cache: Arc<dyn IdentityReadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Minimum idle time before reconciliation resumes an intent.
    pub fn with_reconcile_min_age(mut self, min_age: TimeDelta) -> Self {
        self.reconcile_min_age = min_age;
        self
    }

    /// Resume interrupted partition transfers.
    pub async fn reconcile_transfers(&self) -> Result<ReconciliationReport, Error> {
        self.transfers.reconcile(self.reconcile_min_age).await
    }

    /// Redeliver audit events that are still pending in the outbox.
    pub async fn relay_pending_audit(&self, batch: usize) -> Result<RelayReport, Error> {
        self.audit.relay_pending(batch).await
    }

    /// Category-scoped lookup that may answer from the read cache.
    ///
    /// Only for legacy read paths that tolerate bounded staleness. Cache
    /// misses fall through to the canonical store and refill the cache.
    pub async fn cached_find_by_email_and_type(
        &self,
        email: &str,
        category: ActorCategory,
        exam_level: Option<ExamLevel>,
    ) -> Result<Option<PublicIdentity>, Error> {
        let email = parse_email(email)?;
        let partitions = partitions_for(category, exam_level)?;
        if let Some(cache) = &self.cache {
            for &partition in &partitions {
                if let Some(hit) = cache.get(partition, &email) {
                    debug!(partition = %partition, "identity served from read cache");
                    return Ok(Some(hit));
                }
            }
        }
        let found = self
            .lookup
            .find_by_email_and_type(&email, category, exam_level)
            .await?;
        if let Some(record) = &found {
            self.mirror_put(record);
        }
        Ok(found.map(|record| record.to_public()))
    }

    async fn load(&self, partition: Partition, id: &IdentityId) -> Result<IdentityRecord, Error> {
        self.repository
            .find_by_id(partition, id)
            .await
            .map_err(map_identity_repository_error)?
            .ok_or_else(|| {
                Error::not_found("identity does not exist")
                    .with_details(serde_json::json!({ "id": id, "partition": partition }))
            })
    }

    /// Apply `change` to `before` and write it back, reloading and reapplying
    /// when another writer committed first.
    async fn modify<F>(
        &self,
        mut before: IdentityRecord,
        actor: &AuditActor,
        change: F,
    ) -> Result<IdentityRecord, Error>
    where
        F: Fn(&IdentityRecord) -> IdentityRecord + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let after = change(&before);
            let audit =
                audit_event(AuditRecord::for_update(&before, &after, actor, self.clock.utc()))?;
            match self.repository.update(&before, &after, &audit).await {
                Ok(()) => {
                    self.audit.deliver(&audit).await;
                    self.mirror_put(&after);
                    return Ok(after);
                }
                Err(IdentityRepositoryError::Conflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(id = %before.id, attempt, "identity changed during update; retrying");
                    attempt += 1;
                    before = self.load(before.partition, &before.id).await?;
                }
                Err(err) => return Err(map_identity_repository_error(err)),
            }
        }
    }

    async fn hash_secret(&self, secret: Secret) -> Result<CredentialHash, Error> {
        let codec = self.codec.clone();
        tokio::task::spawn_blocking(move || codec.hash(&secret))
            .await
            .map_err(|err| Error::internal(format!("credential hashing task failed: {err}")))?
            .map_err(|err| Error::internal(err.to_string()))
    }

    async fn hash_answer(&self, answer: String) -> Result<CredentialHash, Error> {
        let codec = self.codec.clone();
        let answer = zeroize::Zeroizing::new(answer);
        tokio::task::spawn_blocking(move || codec.hash_answer(&answer))
            .await
            .map_err(|err| Error::internal(format!("answer hashing task failed: {err}")))?
            .map_err(|err| match err {
                CredentialError::EmptySecret => Error::invalid_request(err.to_string()),
                other => Error::internal(other.to_string()),
            })
    }

    async fn check_secret(
        &self,
        secret: Secret,
        stored: Option<CredentialHash>,
    ) -> Result<bool, Error> {
        let codec = self.codec.clone();
        tokio::task::spawn_blocking(move || codec.verify_stored(&secret, stored.as_ref()))
            .await
            .map_err(|err| Error::internal(format!("credential verification task failed: {err}")))
    }

    async fn scoped_record(
        &self,
        credentials: &ScopedCredentials,
    ) -> Result<(Option<IdentityRecord>, Secret), Error> {
        let email = parse_email(credentials.email())?;
        let secret = Secret::new(credentials.secret())
            .map_err(|err| Error::invalid_request(err.to_string()))?;
        let record = self
            .lookup
            .find_by_email_and_type(&email, credentials.category(), credentials.exam_level())
            .await?;
        Ok((record, secret))
    }

    fn mirror_put(&self, record: &IdentityRecord) {
        if let Some(cache) = &self.cache {
            cache.put(record.partition, &record.to_public());
        }
    }

    fn mirror_delete(&self, partition: Partition, email: &EmailAddress) {
        if let Some(cache) = &self.cache {
            cache.delete(partition, email);
        }
    }
}

#[async_trait]
impl<R, T> IdentityCommand for IdentityService<R, T>
where
    R: IdentityRepository,
    T: TransferIntentRepository,
{
    async fn create_identity(&self, input: NewIdentity) -> Result<PublicIdentity, Error> {
        input
            .validate()
            .map_err(|err| Error::invalid_request(err.to_string()))?;
        let email = parse_email(&input.email)?;
        let partition = resolve_partition(input.category, input.exam_level)?;

        // Advisory only: the repository's unique constraints decide races.
        if self.lookup.email_exists(&email).await? {
            debug!(partition = %partition, "registration rejected by pre-check");
            return Err(Error::duplicate_email("email address is already registered"));
        }

        let secret =
            Secret::new(input.password()).map_err(|err| Error::invalid_request(err.to_string()))?;
        let credential_hash = self.hash_secret(secret).await?;
        let security_question = match input.security_question() {
            Some((question, answer)) => Some(SecurityQuestion {
                question: question.trim().to_owned(),
                answer_hash: self.hash_answer(answer.to_owned()).await?,
            }),
            None => None,
        };

        let now = self.clock.utc();
        let record = IdentityRecord {
            id: self.ids.new_id(input.category),
            email,
            credential_hash,
            partition,
            registration_status: input.registration_status,
            profile: input.profile,
            security_question,
            created_at: now,
            last_login: None,
        };
        let audit = audit_event(AuditRecord::for_insert(
            &record,
            &AuditActor::identity(&record),
            now,
        ))?;
        self.repository
            .insert(&record, &audit)
            .await
            .map_err(map_identity_repository_error)?;
        info!(id = %record.id, partition = %partition, "identity created");

        self.audit.deliver(&audit).await;
        self.mirror_put(&record);
        Ok(record.to_public())
    }

    async fn authenticate(&self, credentials: &ScopedCredentials) -> Result<PublicIdentity, Error> {
        let (record, secret) = self.scoped_record(credentials).await?;
        let stored = record.as_ref().map(|r| r.credential_hash.clone());
        let upgrade = stored
            .as_ref()
            .filter(|hash| hash.is_legacy())
            .map(|_| secret.clone());
        if !self.check_secret(secret, stored).await? {
            debug!(category = %credentials.category(), "authentication rejected");
            return Err(Error::credential_mismatch());
        }
        let Some(before) = record else {
            return Err(Error::credential_mismatch());
        };

        let verified = before.credential_hash.clone();
        let upgraded = match upgrade {
            Some(secret) => Some(self.hash_secret(secret).await?),
            None => None,
        };
        let logged_in_at = self.clock.utc();
        let actor = AuditActor::identity(&before);
        let after = self
            .modify(before, &actor, |current| {
                let mut after = current.clone();
                after.last_login = Some(logged_in_at);
                // Only replace the hash this login actually verified.
                match &upgraded {
                    Some(hash) if current.credential_hash == verified => {
                        after.credential_hash = hash.clone();
                    }
                    _ => {}
                }
                after
            })
            .await
            .map_err(|err| match err.code() {
                ErrorCode::NotFound => Error::credential_mismatch(),
                _ => err,
            })?;
        if upgraded.is_some() && after.credential_hash != verified {
            info!(id = %after.id, "legacy credential hash upgraded");
        }
        Ok(after.to_public())
    }

    async fn update_profile(
        &self,
        partition: Partition,
        id: &IdentityId,
        profile: ProfileAttributes,
        actor: &AuditActor,
    ) -> Result<PublicIdentity, Error> {
        profile
            .validate_for(partition.category())
            .map_err(|err| Error::invalid_request(err.to_string()))?;
        let before = self.load(partition, id).await?;
        let after = self
            .modify(before, actor, |current| IdentityRecord {
                profile: profile.clone(),
                ..current.clone()
            })
            .await?;
        Ok(after.to_public())
    }

    async fn update_status(
        &self,
        partition: Partition,
        id: &IdentityId,
        status: RegistrationStatus,
        actor: &AuditActor,
    ) -> Result<PublicIdentity, Error> {
        let before = self.load(partition, id).await?;
        let after = self
            .modify(before, actor, |current| IdentityRecord {
                registration_status: status,
                ..current.clone()
            })
            .await?;
        Ok(after.to_public())
    }

    async fn delete_identity(
        &self,
        partition: Partition,
        id: &IdentityId,
        actor: &AuditActor,
    ) -> Result<(), Error> {
        let mut attempt = 1;
        let mut record = self.load(partition, id).await?;
        let audit = loop {
            let audit = audit_event(AuditRecord::for_delete(&record, actor, self.clock.utc()))?;
            match self.repository.delete(&record, &audit).await {
                Ok(()) => break audit,
                Err(IdentityRepositoryError::Conflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(id = %id, attempt, "identity changed during delete; retrying");
                    attempt += 1;
                    record = self.load(partition, id).await?;
                }
                Err(err) => return Err(map_identity_repository_error(err)),
            }
        };
        info!(id = %id, partition = %partition, "identity removed");
        self.audit.deliver(&audit).await;
        self.mirror_delete(partition, &record.email);
        Ok(())
    }

    async fn transfer_partition(
        &self,
        id: &IdentityId,
        from: Partition,
        to: Partition,
        actor: &AuditActor,
    ) -> Result<PublicIdentity, Error> {
        let moved = self.transfers.transfer(id, from, to, actor).await?;
        self.mirror_delete(from, &moved.email);
        self.mirror_put(&moved);
        Ok(moved.to_public())
    }
}

#[async_trait]
impl<R, T> IdentityQuery for IdentityService<R, T>
where
    R: IdentityRepository,
    T: TransferIntentRepository,
{
    async fn find_by_email(&self, email: &str) -> Result<Option<PublicIdentity>, Error> {
        let email = parse_email(email)?;
        let found = self.lookup.find_by_email(&email).await?;
        Ok(found.map(|record| record.to_public()))
    }

    async fn find_by_email_and_type(
        &self,
        email: &str,
        category: ActorCategory,
        exam_level: Option<ExamLevel>,
    ) -> Result<Option<PublicIdentity>, Error> {
        let email = parse_email(email)?;
        let found = self
            .lookup
            .find_by_email_and_type(&email, category, exam_level)
            .await?;
        Ok(found.map(|record| record.to_public()))
    }

    async fn verify_credential(&self, credentials: &ScopedCredentials) -> Result<bool, Error> {
        let (record, secret) = self.scoped_record(credentials).await?;
        let stored = record.map(|r| r.credential_hash);
        self.check_secret(secret, stored).await
    }

    async fn verify_security_answer(
        &self,
        credentials: &ScopedCredentials,
    ) -> Result<bool, Error> {
        let email = parse_email(credentials.email())?;
        let answer = Secret::normalised_answer(credentials.secret())
            .map_err(|err| Error::invalid_request(err.to_string()))?;
        let record = self
            .lookup
            .find_by_email_and_type(&email, credentials.category(), credentials.exam_level())
            .await?;
        let stored = record
            .and_then(|r| r.security_question)
            .map(|question| question.answer_hash);
        self.check_secret(answer, stored).await
    }

    async fn email_exists(&self, email: &str) -> Result<bool, Error> {
        let email = parse_email(email)?;
        self.lookup.email_exists(&email).await
    }

    async fn get_statistics(&self) -> Result<IdentityStatistics, Error> {
        let mut partitions = Vec::with_capacity(Partition::FEDERATED_PROBE_ORDER.len());
        for partition in Partition::FEDERATED_PROBE_ORDER {
            partitions.push(
                self.repository
                    .partition_statistics(partition)
                    .await
                    .map_err(map_identity_repository_error)?,
            );
        }
        Ok(IdentityStatistics::from_partitions(partitions))
    }
}

fn parse_email(raw: &str) -> Result<EmailAddress, Error> {
    EmailAddress::parse(raw).map_err(|err| Error::invalid_request(err.to_string()))
}

fn audit_event(result: Result<AuditRecord, AuditSnapshotError>) -> Result<AuditRecord, Error> {
    result.map_err(|err| Error::internal(err.to_string()))
}

#[cfg(test)]
#[path = "identity_service_tests.rs"]
mod tests;
