//! Federated lookup across identity partitions.
//!
//! When the caller does not know an actor's category, partitions are probed in
//! [`Partition::FEDERATED_PROBE_ORDER`] and the first match wins. Callers that
//! do know the category use [`FederatedLookup::find_by_email_and_type`], which
//! never leaves that category's partitions; credential checks only ever use
//! the scoped form.

use std::sync::Arc;

use tracing::{debug, warn};

use super::ports::IdentityRepository;
use super::repository_errors::map_identity_repository_error;
use super::{ActorCategory, EmailAddress, Error, ExamLevel, IdentityRecord, Partition, partitions_for};

/// Lookup engine over an [`IdentityRepository`].
pub struct FederatedLookup<R> {
    repository: Arc<R>,
}

impl<R> Clone for FederatedLookup<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R> FederatedLookup<R>
where
    R: IdentityRepository,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Probe every partition in the documented order.
    pub async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<IdentityRecord>, Error> {
        self.probe(&Partition::FEDERATED_PROBE_ORDER, email).await
    }

    /// Probe only the partitions owned by `category`.
    pub async fn find_by_email_and_type(
        &self,
        email: &EmailAddress,
        category: ActorCategory,
        exam_level: Option<ExamLevel>,
    ) -> Result<Option<IdentityRecord>, Error> {
        let partitions = partitions_for(category, exam_level)?;
        self.probe(&partitions, email).await
    }

    /// Advisory existence check across all partitions.
    pub async fn email_exists(&self, email: &EmailAddress) -> Result<bool, Error> {
        Ok(self.find_by_email(email).await?.is_some())
    }

    /// Look a record up within one partition.
    pub async fn find_in(
        &self,
        partition: Partition,
        email: &EmailAddress,
    ) -> Result<Option<IdentityRecord>, Error> {
        self.repository
            .find_by_email(partition, email)
            .await
            .map_err(map_identity_repository_error)
    }

    async fn probe(
        &self,
        partitions: &[Partition],
        email: &EmailAddress,
    ) -> Result<Option<IdentityRecord>, Error> {
        for &partition in partitions {
            let Some(record) = self.find_in(partition, email).await? else {
                continue;
            };
            if record.partition != partition {
                warn!(
                    expected = %partition,
                    actual = %record.partition,
                    id = %record.id,
                    "repository returned a record from another partition"
                );
                return Err(Error::internal("partition mismatch in identity lookup"));
            }
            debug!(partition = %partition, id = %record.id, "identity located");
            return Ok(Some(record));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    //! Probe order and scoping for federated lookups.
    use super::*;
    use crate::domain::ErrorCode;
    use crate::domain::ports::{IdentityRepositoryError, MockIdentityRepository};
    use crate::test_support::sample_record;
    use mockall::Sequence;
    use mockall::predicate::eq;
    use rstest::rstest;

    fn email(raw: &str) -> EmailAddress {
        EmailAddress::parse(raw).expect("valid email")
    }

    #[rstest]
    #[tokio::test]
    async fn probes_in_documented_order_and_stops_at_first_match() {
        let mut repo = MockIdentityRepository::new();
        let mut seq = Sequence::new();
        for partition in [Partition::StudentOrdinary, Partition::StudentAdvanced] {
            repo.expect_find_by_email()
                .with(eq(partition), eq(email("t1@x.test")))
                .times(1)
                .in_sequence(&mut seq)
                .return_once(|_, _| Ok(None));
        }
        let teacher = sample_record(Partition::Teacher, "t1@x.test");
        let expected = teacher.clone();
        repo.expect_find_by_email()
            .with(eq(Partition::Teacher), eq(email("t1@x.test")))
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_, _| Ok(Some(teacher)));

        let lookup = FederatedLookup::new(Arc::new(repo));
        let found = lookup
            .find_by_email(&email("t1@x.test"))
            .await
            .expect("lookup succeeds");

        assert_eq!(found, Some(expected));
    }

    #[rstest]
    #[tokio::test]
    async fn scoped_lookup_never_leaves_the_category() {
        let mut repo = MockIdentityRepository::new();
        repo.expect_find_by_email()
            .with(eq(Partition::StudentAdvanced), eq(email("s1@x.test")))
            .times(1)
            .return_once(|_, _| Ok(None));

        let lookup = FederatedLookup::new(Arc::new(repo));
        let found = lookup
            .find_by_email_and_type(
                &email("s1@x.test"),
                ActorCategory::Student,
                Some(ExamLevel::Advanced),
            )
            .await
            .expect("lookup succeeds");

        assert!(found.is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn student_lookup_without_level_covers_both_levels() {
        let mut repo = MockIdentityRepository::new();
        let mut seq = Sequence::new();
        repo.expect_find_by_email()
            .with(eq(Partition::StudentOrdinary), eq(email("s1@x.test")))
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_, _| Ok(None));
        let student = sample_record(Partition::StudentAdvanced, "s1@x.test");
        repo.expect_find_by_email()
            .with(eq(Partition::StudentAdvanced), eq(email("s1@x.test")))
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_, _| Ok(Some(student)));

        let lookup = FederatedLookup::new(Arc::new(repo));
        let found = lookup
            .find_by_email_and_type(&email("s1@x.test"), ActorCategory::Student, None)
            .await
            .expect("lookup succeeds")
            .expect("student found");

        assert_eq!(found.partition, Partition::StudentAdvanced);
    }

    #[rstest]
    #[tokio::test]
    async fn staff_with_level_is_a_partition_error() {
        let lookup = FederatedLookup::new(Arc::new(MockIdentityRepository::new()));
        let err = lookup
            .find_by_email_and_type(
                &email("t1@x.test"),
                ActorCategory::Teacher,
                Some(ExamLevel::Ordinary),
            )
            .await
            .expect_err("invalid scope");
        assert_eq!(err.code(), ErrorCode::PartitionNotFound);
    }

    #[rstest]
    #[tokio::test]
    async fn repository_failures_are_translated() {
        let mut repo = MockIdentityRepository::new();
        repo.expect_find_by_email()
            .times(1)
            .return_once(|_, _| Err(IdentityRepositoryError::connection("refused")));

        let lookup = FederatedLookup::new(Arc::new(repo));
        let err = lookup
            .email_exists(&email("x@x.test"))
            .await
            .expect_err("backend down");
        assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
    }

    #[rstest]
    #[tokio::test]
    async fn records_from_the_wrong_partition_are_rejected() {
        let mut repo = MockIdentityRepository::new();
        let misplaced = sample_record(Partition::Admin, "a1@x.test");
        repo.expect_find_by_email()
            .with(eq(Partition::StudentOrdinary), eq(email("a1@x.test")))
            .times(1)
            .return_once(move |_, _| Ok(Some(misplaced)));

        let lookup = FederatedLookup::new(Arc::new(repo));
        let err = lookup
            .find_by_email(&email("a1@x.test"))
            .await
            .expect_err("mismatch");
        assert_eq!(err.code(), ErrorCode::InternalError);
    }
}
