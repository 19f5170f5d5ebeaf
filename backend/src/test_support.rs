//! Test utilities for the identity store crate.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`, via
//! the `test-support` feature).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;

use crate::domain::ports::{
    AuditFailureAlerts, IdentityReadCache, IdentityRepository, IdentityRepositoryError,
};
use crate::domain::{
    ActorCategory, AdminProfile, AuditActor, AuditRecord, CredentialCodec, CredentialCost,
    CredentialHash, EmailAddress, ExamLevel, ExaminerProfile, IdentifierGenerator, IdentityId,
    IdentityRecord, IdentityService, IdentityStoreParts, NewIdentity, Partition,
    PartitionStatistics, ProfileAttributes, RegistrationStatus, StudentProfile, TeacherProfile,
};
use crate::outbound::memory::InMemoryIdentityStore;

/// Password used by the registration builders.
pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Clock whose time only moves when told to.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    /// Clock pinned to 2026-01-05T09:00:00Z.
    pub fn fixed() -> Self {
        match Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single() {
            Some(now) => Self::new(now),
            None => panic!("fixed clock timestamp must be valid"),
        }
    }

    pub fn advance_seconds(&self, seconds: i64) {
        *self.lock_clock() += TimeDelta::seconds(seconds);
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

/// Alerting double that remembers which events failed.
#[derive(Debug, Default)]
pub struct RecordingAlerts(Mutex<Vec<AuditRecord>>);

impl RecordingAlerts {
    pub fn raised(&self) -> Vec<AuditRecord> {
        match self.0.lock() {
            Ok(alerts) => alerts.clone(),
            Err(_) => panic!("alerts mutex"),
        }
    }
}

#[async_trait]
impl AuditFailureAlerts for RecordingAlerts {
    async fn audit_write_failed(&self, record: &AuditRecord, _reason: &str) {
        match self.0.lock() {
            Ok(mut alerts) => alerts.push(record.clone()),
            Err(_) => panic!("alerts mutex"),
        }
    }
}

/// Codec with the lowest Argon2 cost so tests stay fast.
pub fn cheap_codec() -> CredentialCodec {
    let cost = match CredentialCost::new(1024, 1, 1) {
        Ok(cost) => cost,
        Err(err) => panic!("cheap cost must be valid: {err}"),
    };
    match CredentialCodec::new(cost) {
        Ok(codec) => codec,
        Err(err) => panic!("cheap codec must build: {err}"),
    }
}

/// Profile of the right shape for `category`.
pub fn sample_profile(category: ActorCategory) -> ProfileAttributes {
    match category {
        ActorCategory::Student => ProfileAttributes::Student(StudentProfile {
            full_name: "Kofi Boateng".into(),
            school: "Cape Coast Academy".into(),
            region: "Central".into(),
            candidate_number: Some("0042".into()),
            subjects: vec!["Mathematics".into(), "Chemistry".into()],
        }),
        ActorCategory::Teacher => ProfileAttributes::Teacher(TeacherProfile {
            full_name: "Ama Owusu".into(),
            school: "Kumasi High".into(),
            region: "Ashanti".into(),
            subjects: vec!["Physics".into()],
        }),
        ActorCategory::Examiner => ProfileAttributes::Examiner(ExaminerProfile {
            full_name: "Yaw Mensah".into(),
            institution: "University of Ghana".into(),
            region: "Greater Accra".into(),
            specialization: "Chemistry".into(),
        }),
        ActorCategory::Admin => ProfileAttributes::Admin(AdminProfile {
            full_name: "Efua Asante".into(),
            region: "Greater Accra".into(),
            office: "Registry".into(),
        }),
    }
}

static SAMPLE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Stored record for `partition` with a placeholder credential hash.
pub fn sample_record(partition: Partition, email: &str) -> IdentityRecord {
    let category = partition.category();
    let sequence = SAMPLE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let id = match IdentityId::new(format!("EXB-{}-{sequence}-0000", category.code())) {
        Ok(id) => id,
        Err(err) => panic!("sample id must be valid: {err}"),
    };
    let email = match EmailAddress::parse(email) {
        Ok(email) => email,
        Err(err) => panic!("sample email must be valid: {err}"),
    };
    IdentityRecord {
        id,
        email,
        credential_hash: CredentialHash::from_stored("$argon2id$v=19$m=1024,t=1,p=1$placeholder"),
        partition,
        registration_status: RegistrationStatus::Pending,
        profile: sample_profile(category),
        security_question: None,
        created_at: MutableClock::fixed().utc(),
        last_login: None,
    }
}

pub fn student_registration(email: &str, level: ExamLevel) -> NewIdentity {
    NewIdentity::new(
        email,
        ActorCategory::Student,
        Some(level),
        TEST_PASSWORD,
        sample_profile(ActorCategory::Student),
    )
}

/// Registration for a staff category (no exam level).
pub fn staff_registration(email: &str, category: ActorCategory) -> NewIdentity {
    NewIdentity::new(email, category, None, TEST_PASSWORD, sample_profile(category))
}

type CompetingChange = Box<dyn FnOnce(&IdentityRecord) -> IdentityRecord + Send>;

/// Repository over the in-memory store that can slip a competing write in
/// just before the next update or delete reaches the store, as if another
/// request had committed first.
pub struct InterleavedWrites {
    store: Arc<InMemoryIdentityStore>,
    competing: Mutex<Option<CompetingChange>>,
}

impl InterleavedWrites {
    pub fn new(store: Arc<InMemoryIdentityStore>) -> Self {
        Self {
            store,
            competing: Mutex::new(None),
        }
    }

    /// Commit `change` to the targeted row right before the next write.
    pub fn before_next_write(
        &self,
        change: impl FnOnce(&IdentityRecord) -> IdentityRecord + Send + 'static,
    ) {
        match self.competing.lock() {
            Ok(mut slot) => *slot = Some(Box::new(change)),
            Err(_) => panic!("competing write mutex"),
        }
    }

    fn take_competing(&self) -> Option<CompetingChange> {
        match self.competing.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => panic!("competing write mutex"),
        }
    }

    async fn interleave(&self, target: &IdentityRecord) -> Result<(), IdentityRepositoryError> {
        let Some(change) = self.take_competing() else {
            return Ok(());
        };
        let Some(current) = self.store.find_by_id(target.partition, &target.id).await? else {
            return Ok(());
        };
        let changed = change(&current);
        let audit = AuditRecord::for_update(&current, &changed, &AuditActor::system(), Utc::now())
            .map_err(|err| IdentityRepositoryError::query(err.to_string()))?;
        self.store.update(&current, &changed, &audit).await
    }
}

#[async_trait]
impl IdentityRepository for InterleavedWrites {
    async fn insert(
        &self,
        record: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        self.store.insert(record, audit).await
    }

    async fn insert_transferred(
        &self,
        record: &IdentityRecord,
        source_partition: Partition,
        source_id: &IdentityId,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        self.store
            .insert_transferred(record, source_partition, source_id, audit)
            .await
    }

    async fn update(
        &self,
        expected: &IdentityRecord,
        record: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        self.interleave(expected).await?;
        self.store.update(expected, record, audit).await
    }

    async fn delete(
        &self,
        expected: &IdentityRecord,
        audit: &AuditRecord,
    ) -> Result<(), IdentityRepositoryError> {
        self.interleave(expected).await?;
        self.store.delete(expected, audit).await
    }

    async fn find_by_email(
        &self,
        partition: Partition,
        email: &EmailAddress,
    ) -> Result<Option<IdentityRecord>, IdentityRepositoryError> {
        self.store.find_by_email(partition, email).await
    }

    async fn find_by_id(
        &self,
        partition: Partition,
        id: &IdentityId,
    ) -> Result<Option<IdentityRecord>, IdentityRepositoryError> {
        self.store.find_by_id(partition, id).await
    }

    async fn partition_statistics(
        &self,
        partition: Partition,
    ) -> Result<PartitionStatistics, IdentityRepositoryError> {
        self.store.partition_statistics(partition).await
    }
}

/// Identity service wired to one in-memory store.
///
/// Writes pass through [`InterleavedWrites`], so a test can stage a competing
/// change with `harness.writes.before_next_write(..)`.
pub struct InMemoryHarness {
    pub service: IdentityService<InterleavedWrites, InMemoryIdentityStore>,
    pub store: Arc<InMemoryIdentityStore>,
    pub writes: Arc<InterleavedWrites>,
    pub alerts: Arc<RecordingAlerts>,
    pub clock: Arc<MutableClock>,
}

impl InMemoryHarness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_cache(cache: Arc<dyn IdentityReadCache>) -> Self {
        Self::build(Some(cache))
    }

    fn build(cache: Option<Arc<dyn IdentityReadCache>>) -> Self {
        let store = Arc::new(InMemoryIdentityStore::new());
        let alerts = Arc::new(RecordingAlerts::default());
        let clock = Arc::new(MutableClock::fixed());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let ids = match IdentifierGenerator::new("EXB", Arc::clone(&dyn_clock)) {
            Ok(ids) => ids,
            Err(err) => panic!("test org tag must be valid: {err}"),
        };
        let writes = Arc::new(InterleavedWrites::new(Arc::clone(&store)));
        let service = IdentityService::new(IdentityStoreParts {
            repository: Arc::clone(&writes),
            outbox: store.clone(),
            transfer_intents: Arc::clone(&store),
            audit_log: store.clone(),
            alerts: alerts.clone(),
            codec: cheap_codec(),
            ids,
            clock: dyn_clock,
        });
        let service = match cache {
            Some(cache) => service.with_cache(cache),
            None => service,
        };
        Self {
            service,
            store,
            writes,
            alerts,
            clock,
        }
    }
}

impl Default for InMemoryHarness {
    fn default() -> Self {
        Self::new()
    }
}
