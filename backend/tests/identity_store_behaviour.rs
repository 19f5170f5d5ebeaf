//! End-to-end behaviour of the identity store over the in-memory adapter.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::TimeDelta;
use examboard_identity::domain::ports::{
    AuditLog, IdentityCommand, IdentityQuery, IdentityReadCache, ScopedCredentials,
};
use examboard_identity::domain::{
    ActorCategory, AuditAction, AuditActor, EmailAddress, ErrorCode, ExamLevel, IdentityRecord,
    Partition, RegistrationStatus,
};
use examboard_identity::inbound::blocking::BlockingIdentityLookup;
use examboard_identity::outbound::cache::LegacyIdentityCache;
use examboard_identity::test_support::{
    InMemoryHarness, MutableClock, TEST_PASSWORD, staff_registration, student_registration,
};
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn harness() -> InMemoryHarness {
    InMemoryHarness::new()
}

fn scoped(
    email: &str,
    category: ActorCategory,
    level: Option<ExamLevel>,
    secret: &str,
) -> ScopedCredentials {
    ScopedCredentials::new(email, category, level, secret)
}

#[rstest]
#[case("Ama.Owusu@School.TEST", ActorCategory::Teacher, None, Partition::Teacher)]
#[case("kofi@x.test", ActorCategory::Student, Some(ExamLevel::Advanced), Partition::StudentAdvanced)]
#[case("yaw@x.test", ActorCategory::Examiner, None, Partition::Examiner)]
#[case("efua@x.test", ActorCategory::Admin, None, Partition::Admin)]
#[tokio::test]
async fn created_identities_are_found_in_their_partition(
    harness: InMemoryHarness,
    #[case] email: &str,
    #[case] category: ActorCategory,
    #[case] level: Option<ExamLevel>,
    #[case] partition: Partition,
) {
    let input = match level {
        Some(level) => student_registration(email, level),
        None => staff_registration(email, category),
    };
    let created = harness
        .service
        .create_identity(input)
        .await
        .expect("registration succeeds");

    let found = harness
        .service
        .find_by_email(email)
        .await
        .expect("lookup succeeds")
        .expect("identity present");

    assert_eq!(found, created);
    assert!(found.email.as_ref().eq_ignore_ascii_case(email));
    assert_eq!(found.category, category);
    assert_eq!(harness.store.records_in(partition).await.len(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_registrations_admit_exactly_one() {
    let harness = Arc::new(InMemoryHarness::new());
    let categories = [
        ActorCategory::Teacher,
        ActorCategory::Examiner,
        ActorCategory::Admin,
        ActorCategory::Teacher,
        ActorCategory::Examiner,
        ActorCategory::Admin,
    ];

    let mut handles = Vec::new();
    for category in categories {
        let harness = Arc::clone(&harness);
        handles.push(tokio::spawn(async move {
            harness
                .service
                .create_identity(staff_registration("race@x.test", category))
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.expect("task completes") {
            Ok(_) => created += 1,
            Err(err) => assert_eq!(err.code(), ErrorCode::DuplicateEmail),
        }
    }

    assert_eq!(created, 1);
    let stats = harness.service.get_statistics().await.expect("stats");
    assert_eq!(stats.total, 1);
    assert_eq!(harness.store.audit_log_entries().await.len(), 1);
}

#[rstest]
#[tokio::test]
async fn student_level_scopes_the_lookup(harness: InMemoryHarness) {
    harness
        .service
        .create_identity(student_registration("s1@x.test", ExamLevel::Ordinary))
        .await
        .expect("registration succeeds");

    let same_level = harness
        .service
        .find_by_email_and_type("s1@x.test", ActorCategory::Student, Some(ExamLevel::Ordinary))
        .await
        .expect("lookup succeeds");
    let other_level = harness
        .service
        .find_by_email_and_type("s1@x.test", ActorCategory::Student, Some(ExamLevel::Advanced))
        .await
        .expect("lookup succeeds");

    assert!(same_level.is_some());
    assert!(other_level.is_none());
}

#[rstest]
#[tokio::test]
async fn teacher_email_cannot_be_reused_for_an_admin(harness: InMemoryHarness) {
    harness
        .service
        .create_identity(staff_registration("t1@x.test", ActorCategory::Teacher))
        .await
        .expect("teacher created");

    let err = harness
        .service
        .create_identity(staff_registration("t1@x.test", ActorCategory::Admin))
        .await
        .expect_err("admin rejected");

    assert_eq!(err.code(), ErrorCode::DuplicateEmail);
    assert!(
        harness
            .service
            .find_by_email_and_type("t1@x.test", ActorCategory::Admin, None)
            .await
            .expect("lookup succeeds")
            .is_none()
    );
}

#[rstest]
#[tokio::test]
async fn wrong_secret_looks_the_same_whether_or_not_the_email_exists_elsewhere(
    harness: InMemoryHarness,
) {
    harness
        .service
        .create_identity(staff_registration("t1@x.test", ActorCategory::Teacher))
        .await
        .expect("teacher created");

    let wrong_secret = harness
        .service
        .verify_credential(&scoped("t1@x.test", ActorCategory::Teacher, None, "wrong-secret"))
        .await
        .expect("verification runs");
    let other_category = harness
        .service
        .verify_credential(&scoped("t1@x.test", ActorCategory::Examiner, None, TEST_PASSWORD))
        .await
        .expect("verification runs");
    let unknown = harness
        .service
        .verify_credential(&scoped("nobody@x.test", ActorCategory::Teacher, None, TEST_PASSWORD))
        .await
        .expect("verification runs");

    assert!(!wrong_secret);
    assert!(!other_category);
    assert!(!unknown);
}

#[rstest]
#[tokio::test]
async fn every_mutation_adds_one_matching_audit_record(harness: InMemoryHarness) {
    let operator = AuditActor::operator(ActorCategory::Admin, "EXB-AD-1-0001", "ops@x.test");
    let created = harness
        .service
        .create_identity(staff_registration("e1@x.test", ActorCategory::Examiner))
        .await
        .expect("created");
    assert_eq!(harness.store.audit_log_entries().await.len(), 1);

    harness
        .service
        .delete_identity(Partition::Examiner, &created.id, &operator)
        .await
        .expect("deleted");

    let trail = harness
        .store
        .records_for("examiners", created.id.as_ref())
        .await
        .expect("audit readable");
    let actions: Vec<_> = trail.iter().map(|entry| entry.action).collect();
    assert_eq!(actions, vec![AuditAction::Insert, AuditAction::Delete]);
    let event_ids: HashSet<_> = trail.iter().map(|entry| entry.event_id).collect();
    assert_eq!(event_ids.len(), 2);
}

fn suspended(current: &IdentityRecord) -> IdentityRecord {
    IdentityRecord {
        registration_status: RegistrationStatus::Suspended,
        ..current.clone()
    }
}

#[rstest]
#[tokio::test]
async fn login_overlapping_a_suspension_keeps_the_suspension(harness: InMemoryHarness) {
    let created = harness
        .service
        .create_identity(staff_registration("t1@x.test", ActorCategory::Teacher))
        .await
        .expect("created");
    harness.clock.advance_seconds(30);
    // The suspension commits after the login read the record.
    harness.writes.before_next_write(suspended);

    let signed_in = harness
        .service
        .authenticate(&scoped("t1@x.test", ActorCategory::Teacher, None, TEST_PASSWORD))
        .await
        .expect("login succeeds");

    assert_eq!(signed_in.registration_status, RegistrationStatus::Suspended);
    let stored = harness.store.records_in(Partition::Teacher).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].registration_status, RegistrationStatus::Suspended);
    assert_eq!(stored[0].last_login, signed_in.last_login);
    assert!(stored[0].last_login.is_some());

    let trail = harness
        .store
        .records_for("teachers", created.id.as_ref())
        .await
        .expect("audit readable");
    let login = trail
        .iter()
        .find(|entry| entry.action == AuditAction::Update)
        .expect("login audited");
    let old_values = login.old_values.as_ref().expect("old values recorded");
    assert_eq!(old_values["registrationStatus"], json!("suspended"));
}

#[rstest]
#[tokio::test]
async fn delete_after_a_concurrent_edit_audits_the_latest_values(harness: InMemoryHarness) {
    let operator = AuditActor::operator(ActorCategory::Admin, "EXB-AD-1-0001", "ops@x.test");
    let created = harness
        .service
        .create_identity(staff_registration("e2@x.test", ActorCategory::Examiner))
        .await
        .expect("created");
    harness.writes.before_next_write(suspended);

    harness
        .service
        .delete_identity(Partition::Examiner, &created.id, &operator)
        .await
        .expect("deleted");

    assert!(harness.store.records_in(Partition::Examiner).await.is_empty());
    let trail = harness
        .store
        .records_for("examiners", created.id.as_ref())
        .await
        .expect("audit readable");
    let removal = trail.last().expect("delete audited");
    assert_eq!(removal.action, AuditAction::Delete);
    let old_values = removal.old_values.as_ref().expect("old values recorded");
    assert_eq!(old_values["registrationStatus"], json!("suspended"));
}

#[rstest]
#[tokio::test]
async fn failed_audit_delivery_is_relayed_later(harness: InMemoryHarness) {
    harness.store.set_audit_log_available(false).await;
    harness
        .service
        .create_identity(staff_registration("a1@x.test", ActorCategory::Admin))
        .await
        .expect("registration reports success");
    harness
        .service
        .create_identity(staff_registration("a2@x.test", ActorCategory::Admin))
        .await
        .expect("registration reports success");

    assert_eq!(harness.alerts.raised().len(), 2);
    let still_down = harness
        .service
        .relay_pending_audit(10)
        .await
        .expect("relay runs");
    assert_eq!(still_down.failed, 2);

    harness.store.set_audit_log_available(true).await;
    let first = harness.service.relay_pending_audit(1).await.expect("relay runs");
    let second = harness.service.relay_pending_audit(10).await.expect("relay runs");

    assert_eq!((first.attempted, first.delivered), (1, 1));
    assert_eq!((second.attempted, second.delivered), (1, 1));
    assert_eq!(harness.store.audit_log_entries().await.len(), 2);
    assert_eq!(harness.store.pending_outbox_len().await, 0);
}

#[rstest]
#[tokio::test]
async fn stale_cache_entries_fall_back_to_the_store() {
    let cache_clock = Arc::new(MutableClock::fixed());
    let cache = Arc::new(LegacyIdentityCache::new(
        TimeDelta::seconds(30),
        cache_clock.clone(),
    ));
    let harness = InMemoryHarness::with_cache(cache.clone());
    let created = harness
        .service
        .create_identity(staff_registration("t1@x.test", ActorCategory::Teacher))
        .await
        .expect("created");
    let email = EmailAddress::parse("t1@x.test").expect("email");

    cache_clock.advance_seconds(31);
    assert!(cache.get(Partition::Teacher, &email).is_none());

    let found = harness
        .service
        .cached_find_by_email_and_type("t1@x.test", ActorCategory::Teacher, None)
        .await
        .expect("lookup");
    assert_eq!(found, Some(created.clone()));
    assert_eq!(cache.get(Partition::Teacher, &email), Some(created));
}

#[rstest]
fn blocking_lookup_serves_synchronous_callers() {
    let harness = InMemoryHarness::new();
    let setup = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    setup
        .block_on(
            harness
                .service
                .create_identity(staff_registration("t1@x.test", ActorCategory::Teacher)),
        )
        .expect("created");

    let service: Arc<dyn IdentityQuery> = Arc::new(harness.service);
    let lookup = BlockingIdentityLookup::new(service).expect("adapter builds");

    assert!(lookup.find_by_email("t1@x.test").expect("lookup").is_some());
    assert!(
        lookup
            .verify_credential(&scoped("t1@x.test", ActorCategory::Teacher, None, TEST_PASSWORD))
            .expect("verification runs")
    );
}
