//! Blocking adapter over the async [`IdentityQuery`] port.
//!
//! Legacy call sites that cannot be made async go through this adapter
//! instead of a second, synchronous implementation of the same operations.
//! It owns a single-threaded runtime and drives each call to completion, so it
//! must not be used from inside another Tokio runtime.

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::domain::ports::{IdentityQuery, ScopedCredentials};
use crate::domain::{ActorCategory, Error, ExamLevel, PublicIdentity};

/// Synchronous facade over an [`IdentityQuery`].
pub struct BlockingIdentityLookup {
    query: Arc<dyn IdentityQuery>,
    runtime: Runtime,
}

impl BlockingIdentityLookup {
    /// Build the adapter and its private runtime.
    pub fn new(query: Arc<dyn IdentityQuery>) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { query, runtime })
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<PublicIdentity>, Error> {
        self.runtime.block_on(self.query.find_by_email(email))
    }

    pub fn find_by_email_and_type(
        &self,
        email: &str,
        category: ActorCategory,
        exam_level: Option<ExamLevel>,
    ) -> Result<Option<PublicIdentity>, Error> {
        self.runtime
            .block_on(self.query.find_by_email_and_type(email, category, exam_level))
    }

    pub fn verify_credential(&self, credentials: &ScopedCredentials) -> Result<bool, Error> {
        self.runtime
            .block_on(self.query.verify_credential(credentials))
    }
}
