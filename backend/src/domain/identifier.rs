//! Partition-scoped identity identifiers and their generator.
//!
//! Identifiers read as `<org-tag>-<category-code>-<sequence>`, for example
//! `EXB-ST-1767225600123456-0042`. The sequence is derived from the clock's
//! UTC microseconds plus a small random component, so concurrent callers never
//! coordinate. Identifiers are only unique in practice within a partition; the
//! system-wide identity is the email address.

use std::fmt;
use std::sync::Arc;

use mockable::Clock;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::partition::ActorCategory;

/// Organisation tag used when configuration does not supply one.
pub const DEFAULT_ORG_TAG: &str = "EXB";

/// Maximum accepted identifier length.
pub const IDENTITY_ID_MAX: usize = 64;

/// Validation errors for identifiers and organisation tags.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierValidationError {
    #[error("identity id must not be empty")]
    EmptyId,
    #[error("identity id must be at most {max} characters")]
    IdTooLong { max: usize },
    #[error("identity id may only contain ASCII letters, digits, and '-'")]
    InvalidIdCharacters,
    #[error("organisation tag must be 2 to 8 ASCII letters or digits")]
    InvalidOrgTag,
}

/// Partition-scoped identifier of an identity record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityId(String);

impl IdentityId {
    /// Validate an identifier read from storage or supplied by a caller.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentifierValidationError::EmptyId);
        }
        if id.len() > IDENTITY_ID_MAX {
            return Err(IdentifierValidationError::IdTooLong {
                max: IDENTITY_ID_MAX,
            });
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(IdentifierValidationError::InvalidIdCharacters);
        }
        Ok(Self(id))
    }
}

impl AsRef<str> for IdentityId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<IdentityId> for String {
    fn from(value: IdentityId) -> Self {
        value.0
    }
}

impl TryFrom<String> for IdentityId {
    type Error = IdentifierValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Stateless generator of human-readable identifiers.
#[derive(Clone)]
pub struct IdentifierGenerator {
    org_tag: String,
    clock: Arc<dyn Clock>,
}

impl IdentifierGenerator {
    /// Build a generator for the given organisation tag.
    pub fn new(
        org_tag: impl AsRef<str>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IdentifierValidationError> {
        let org_tag = org_tag.as_ref().trim().to_ascii_uppercase();
        let valid_length = (2..=8).contains(&org_tag.len());
        if !valid_length || !org_tag.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(IdentifierValidationError::InvalidOrgTag);
        }
        Ok(Self { org_tag, clock })
    }

    /// Produce a fresh identifier for `category`.
    pub fn new_id(&self, category: ActorCategory) -> IdentityId {
        let micros = self.clock.utc().timestamp_micros().max(0);
        let jitter: u16 = rand::thread_rng().gen_range(0..10_000);
        IdentityId(format!(
            "{}-{}-{micros}-{jitter:04}",
            self.org_tag,
            category.code()
        ))
    }
}

impl fmt::Debug for IdentifierGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifierGenerator")
            .field("org_tag", &self.org_tag)
            .finish_non_exhaustive()
    }
}
