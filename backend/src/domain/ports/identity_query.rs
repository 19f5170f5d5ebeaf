//! Driving port for identity lookups and credential checks.
//!
//! Inbound adapters (login handlers, registration forms, administration
//! screens) call this port without knowing which partitions exist or how
//! they are stored.

use std::fmt;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::domain::{ActorCategory, Error, ExamLevel, IdentityStatistics, PublicIdentity};

/// Email, category scope, and a plaintext secret supplied by a caller.
///
/// The secret is zeroed on drop and redacted from `Debug` output.
#[derive(Clone)]
pub struct ScopedCredentials {
    email: String,
    category: ActorCategory,
    exam_level: Option<ExamLevel>,
    secret: Zeroizing<String>,
}

impl ScopedCredentials {
    pub fn new(
        email: impl Into<String>,
        category: ActorCategory,
        exam_level: Option<ExamLevel>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            category,
            exam_level,
            secret: Zeroizing::new(secret.into()),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn category(&self) -> ActorCategory {
        self.category
    }

    pub fn exam_level(&self) -> Option<ExamLevel> {
        self.exam_level
    }

    pub fn secret(&self) -> &str {
        self.secret.as_str()
    }
}

impl fmt::Debug for ScopedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCredentials")
            .field("email", &self.email)
            .field("category", &self.category)
            .field("exam_level", &self.exam_level)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Read-side identity operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityQuery: Send + Sync {
    /// Federated lookup across every partition in probe order.
    async fn find_by_email(&self, email: &str) -> Result<Option<PublicIdentity>, Error>;

    /// Lookup limited to the partitions owned by `category`.
    ///
    /// A student lookup without `exam_level` covers both student partitions.
    async fn find_by_email_and_type(
        &self,
        email: &str,
        category: ActorCategory,
        exam_level: Option<ExamLevel>,
    ) -> Result<Option<PublicIdentity>, Error>;

    /// Check a password against the record found by a category-scoped lookup.
    ///
    /// Returns `false` for an unknown email and for a wrong password alike.
    async fn verify_credential(&self, credentials: &ScopedCredentials) -> Result<bool, Error>;

    /// Check a security answer the same way as [`Self::verify_credential`].
    async fn verify_security_answer(&self, credentials: &ScopedCredentials)
    -> Result<bool, Error>;

    /// Advisory federated existence check. Never a substitute for the
    /// uniqueness constraint enforced on create.
    async fn email_exists(&self, email: &str) -> Result<bool, Error>;

    /// Counts per partition, region, and affiliation.
    async fn get_statistics(&self) -> Result<IdentityStatistics, Error>;
}
