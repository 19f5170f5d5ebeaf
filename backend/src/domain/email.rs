//! Canonical email addresses.
//!
//! Email is the business identity of every actor and is unique across all
//! partitions, so it is compared in one canonical form everywhere: trimmed and
//! lower-cased.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum accepted length of an address (RFC 5321 path limit).
pub const EMAIL_MAX: usize = 254;

/// Validation errors returned by [`EmailAddress::parse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmailValidationError {
    #[error("email must not be empty")]
    Empty,
    #[error("email must be at most {max} characters")]
    TooLong { max: usize },
    #[error("email must contain a local part and a domain separated by '@'")]
    Malformed,
}

/// Trimmed, lower-cased email address.
///
/// # Examples
/// ```
/// use examboard_identity::domain::EmailAddress;
///
/// let email = EmailAddress::parse("  S1@X.Test ").unwrap();
/// assert_eq!(email.as_ref(), "s1@x.test");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Validate and canonicalise a raw address.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, EmailValidationError> {
        let canonical = raw.as_ref().trim().to_lowercase();
        if canonical.is_empty() {
            return Err(EmailValidationError::Empty);
        }
        if canonical.chars().count() > EMAIL_MAX {
            return Err(EmailValidationError::TooLong { max: EMAIL_MAX });
        }
        if canonical.chars().any(char::is_whitespace) {
            return Err(EmailValidationError::Malformed);
        }

        let Some((local, domain)) = canonical.split_once('@') else {
            return Err(EmailValidationError::Malformed);
        };
        let domain_ok = !domain.is_empty()
            && !domain.contains('@')
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.');
        if local.is_empty() || !domain_ok {
            return Err(EmailValidationError::Malformed);
        }

        Ok(Self(canonical))
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = EmailValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}
