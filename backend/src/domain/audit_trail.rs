//! Audit trail writer: relays outbox events into the append-only audit log.
//!
//! Mutations enqueue their audit event in the same unit of work as the row
//! change. The triggering operation then awaits [`AuditTrailWriter::deliver`]
//! before reporting success. A failed append never fails the operation; it is
//! logged, raised through [`AuditFailureAlerts`], and left pending for
//! [`AuditTrailWriter::relay_pending`]. Delivery is at-least-once and the log
//! ignores repeated event ids.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::ports::{AuditAppend, AuditFailureAlerts, AuditLog, AuditOutbox};
use super::repository_errors::map_identity_repository_error;
use super::{AuditRecord, Error};

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Written to the audit log and marked relayed.
    Delivered,
    /// The log already held the event.
    AlreadyDelivered,
    /// The append failed; the event stays pending and an alert was raised.
    Failed,
}

/// Summary of one outbox relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers committed audit events from the outbox to the audit log and
/// raises an alert when an append fails.
#[derive(Clone)]
pub struct AuditTrailWriter {
    outbox: Arc<dyn AuditOutbox>,
    log: Arc<dyn AuditLog>,
    alerts: Arc<dyn AuditFailureAlerts>,
}

impl AuditTrailWriter {
    pub fn new(
        outbox: Arc<dyn AuditOutbox>,
        log: Arc<dyn AuditLog>,
        alerts: Arc<dyn AuditFailureAlerts>,
    ) -> Self {
        Self {
            outbox,
            log,
            alerts,
        }
    }

    /// Append `record` to the audit log and mark its outbox entry relayed.
    pub async fn deliver(&self, record: &AuditRecord) -> DeliveryOutcome {
        let outcome = match self.log.append(record).await {
            Ok(AuditAppend::Appended) => DeliveryOutcome::Delivered,
            Ok(AuditAppend::AlreadyPresent) => DeliveryOutcome::AlreadyDelivered,
            Err(err) => {
                error!(
                    event_id = %record.event_id,
                    table = %record.table_name,
                    record_id = %record.record_id,
                    action = %record.action,
                    error = %err,
                    "audit write failed after the mutation committed"
                );
                self.alerts
                    .audit_write_failed(record, &err.to_string())
                    .await;
                return DeliveryOutcome::Failed;
            }
        };

        if let Err(err) = self.outbox.mark_relayed(record.event_id).await {
            // The log holds the event; the next relay pass sees a duplicate.
            warn!(
                event_id = %record.event_id,
                error = %err,
                "failed to mark audit event relayed"
            );
        }
        debug!(event_id = %record.event_id, action = %record.action, "audit event delivered");
        outcome
    }

    /// Redeliver up to `batch` pending outbox events.
    pub async fn relay_pending(&self, batch: usize) -> Result<RelayReport, Error> {
        let pending = self
            .outbox
            .pending(batch)
            .await
            .map_err(map_identity_repository_error)?;

        let mut report = RelayReport::default();
        for record in &pending {
            report.attempted += 1;
            match self.deliver(record).await {
                DeliveryOutcome::Delivered | DeliveryOutcome::AlreadyDelivered => {
                    report.delivered += 1;
                }
                DeliveryOutcome::Failed => report.failed += 1,
            }
        }
        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                failed = report.failed,
                "audit outbox relay pass finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    //! Delivery, alerting, and relay behaviour of the audit trail writer.
    use super::*;
    use crate::domain::ErrorCode;
    use crate::domain::ports::{
        AuditLogError, IdentityRepositoryError, MockAuditFailureAlerts, MockAuditLog,
        MockAuditOutbox,
    };
    use crate::domain::{AuditActor, Partition};
    use crate::test_support::sample_record;
    use mockall::predicate::eq;
    use rstest::{fixture, rstest};

    #[fixture]
    fn audit() -> AuditRecord {
        let record = sample_record(Partition::Teacher, "t1@x.test");
        AuditRecord::for_insert(&record, &AuditActor::identity(&record), record.created_at)
            .expect("snapshot")
    }

    fn writer(
        outbox: MockAuditOutbox,
        log: MockAuditLog,
        alerts: MockAuditFailureAlerts,
    ) -> AuditTrailWriter {
        AuditTrailWriter::new(Arc::new(outbox), Arc::new(log), Arc::new(alerts))
    }

    #[rstest]
    #[tokio::test]
    async fn delivered_events_are_marked_relayed(audit: AuditRecord) {
        let mut log = MockAuditLog::new();
        log.expect_append()
            .times(1)
            .return_once(|_| Ok(AuditAppend::Appended));
        let mut outbox = MockAuditOutbox::new();
        outbox
            .expect_mark_relayed()
            .with(eq(audit.event_id))
            .times(1)
            .return_once(|_| Ok(()));
        let mut alerts = MockAuditFailureAlerts::new();
        alerts.expect_audit_write_failed().never();

        let outcome = writer(outbox, log, alerts).deliver(&audit).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[rstest]
    #[tokio::test]
    async fn failed_appends_alert_and_stay_pending(audit: AuditRecord) {
        let mut log = MockAuditLog::new();
        log.expect_append()
            .times(1)
            .return_once(|_| Err(AuditLogError::write("disk full")));
        let mut outbox = MockAuditOutbox::new();
        outbox.expect_mark_relayed().never();
        let mut alerts = MockAuditFailureAlerts::new();
        let event_id = audit.event_id;
        alerts
            .expect_audit_write_failed()
            .withf(move |record, reason| record.event_id == event_id && reason.contains("disk full"))
            .times(1)
            .return_const(());

        let outcome = writer(outbox, log, alerts).deliver(&audit).await;
        assert_eq!(outcome, DeliveryOutcome::Failed);
    }

    #[rstest]
    #[tokio::test]
    async fn mark_failures_do_not_undo_delivery(audit: AuditRecord) {
        let mut log = MockAuditLog::new();
        log.expect_append()
            .times(1)
            .return_once(|_| Ok(AuditAppend::AlreadyPresent));
        let mut outbox = MockAuditOutbox::new();
        outbox
            .expect_mark_relayed()
            .times(1)
            .return_once(|_| Err(IdentityRepositoryError::connection("gone")));

        let outcome = writer(outbox, log, MockAuditFailureAlerts::new())
            .deliver(&audit)
            .await;
        assert_eq!(outcome, DeliveryOutcome::AlreadyDelivered);
    }

    #[rstest]
    #[tokio::test]
    async fn relay_counts_each_pending_event(audit: AuditRecord) {
        let second = AuditRecord {
            event_id: uuid::Uuid::new_v4(),
            ..audit.clone()
        };
        let second_id = second.event_id;
        let mut outbox = MockAuditOutbox::new();
        outbox
            .expect_pending()
            .with(eq(10_usize))
            .times(1)
            .return_once(move |_| Ok(vec![audit, second]));
        outbox.expect_mark_relayed().times(1).return_once(|_| Ok(()));
        let mut log = MockAuditLog::new();
        log.expect_append().times(2).returning(move |record| {
            if record.event_id == second_id {
                Err(AuditLogError::connection("refused"))
            } else {
                Ok(AuditAppend::Appended)
            }
        });
        let mut alerts = MockAuditFailureAlerts::new();
        alerts.expect_audit_write_failed().times(1).return_const(());

        let report = writer(outbox, log, alerts)
            .relay_pending(10)
            .await
            .expect("relay runs");
        assert_eq!(
            report,
            RelayReport {
                attempted: 2,
                delivered: 1,
                failed: 1,
            }
        );
    }

    #[rstest]
    #[tokio::test]
    async fn relay_surfaces_outbox_read_failures() {
        let mut outbox = MockAuditOutbox::new();
        outbox
            .expect_pending()
            .times(1)
            .return_once(|_| Err(IdentityRepositoryError::connection("refused")));

        let err = writer(outbox, MockAuditLog::new(), MockAuditFailureAlerts::new())
            .relay_pending(5)
            .await
            .expect_err("outbox unavailable");
        assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
    }
}
