//! Credential codec: one-way hashing and verification of secrets.
//!
//! Passwords and security-question answers are hashed with Argon2id using a
//! random salt per hash and cost parameters fixed by configuration, so hashing
//! time does not depend on the input or on how many identities exist.
//! Verification delegates to the PHC verifier, which compares in constant
//! time. A stored hash that cannot be parsed never raises an error; it simply
//! does not match. [`CredentialCodec::verify_stored`] routes `sha256$` hashes
//! to [`LegacyDigest`] while still paying the Argon2 cost.
//!
//! Plaintext secrets only exist inside [`Secret`], which zeroes its buffer on
//! drop, and [`CredentialHash`] redacts itself from `Debug` output.

use std::fmt;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

/// Prefix of pre-Argon2 hashes imported from the previous platform.
pub const LEGACY_DIGEST_PREFIX: &str = "sha256$";

const DUMMY_SECRET: &str = "examboard-identity-timing-equaliser";
const LEGACY_SALT_BYTES: usize = 16;

/// Errors raised by the credential codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The secret was empty.
    #[error("secret must not be empty")]
    EmptySecret,
    /// The configured cost parameters are outside Argon2's accepted range.
    #[error("invalid credential cost parameters: {message}")]
    InvalidCost { message: String },
    /// Hashing failed inside the Argon2 implementation.
    #[error("credential hashing failed: {message}")]
    Hashing { message: String },
}

/// Plaintext secret (password or security answer).
///
/// The buffer is zeroed when the value is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Wrap a non-empty secret. Whitespace is preserved.
    pub fn new(secret: impl Into<String>) -> Result<Self, CredentialError> {
        let secret = Zeroizing::new(secret.into());
        if secret.is_empty() {
            return Err(CredentialError::EmptySecret);
        }
        Ok(Self(secret))
    }

    /// Secret normalised for security answers: trimmed, lower-cased, and with
    /// internal whitespace collapsed to single spaces.
    pub fn normalised_answer(answer: &str) -> Result<Self, CredentialError> {
        let normalised = Zeroizing::new(
            answer
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase(),
        );
        if normalised.is_empty() {
            return Err(CredentialError::EmptySecret);
        }
        Ok(Self(normalised))
    }

    fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Stored output of the credential codec.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialHash(String);

impl CredentialHash {
    /// Wrap a hash read from storage. No validation is performed; malformed
    /// values simply never verify.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Serialised PHC (or legacy) string for persistence.
    pub fn as_stored(&self) -> &str {
        &self.0
    }

    /// Whether the hash was produced by the previous platform's digest scheme.
    pub fn is_legacy(&self) -> bool {
        self.0.starts_with(LEGACY_DIGEST_PREFIX)
    }
}

impl fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialHash(<redacted>)")
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialCost {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl CredentialCost {
    /// Default memory cost in KiB.
    pub const DEFAULT_MEMORY_KIB: u32 = 19_456;
    /// Default number of passes.
    pub const DEFAULT_ITERATIONS: u32 = 2;
    /// Default degree of parallelism.
    pub const DEFAULT_PARALLELISM: u32 = 1;

    /// Validate cost parameters against Argon2's accepted ranges.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, CredentialError> {
        Params::new(memory_kib, iterations, parallelism, None).map_err(|err| {
            CredentialError::InvalidCost {
                message: err.to_string(),
            }
        })?;
        Ok(Self {
            memory_kib,
            iterations,
            parallelism,
        })
    }

    /// Memory cost in KiB.
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    /// Number of passes.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Degree of parallelism.
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }
}

impl Default for CredentialCost {
    fn default() -> Self {
        Self {
            memory_kib: Self::DEFAULT_MEMORY_KIB,
            iterations: Self::DEFAULT_ITERATIONS,
            parallelism: Self::DEFAULT_PARALLELISM,
        }
    }
}

/// Argon2id hasher and verifier.
#[derive(Clone)]
pub struct CredentialCodec {
    argon: Argon2<'static>,
    cost: CredentialCost,
    dummy_hash: CredentialHash,
}

impl CredentialCodec {
    /// Build a codec with fixed cost parameters.
    pub fn new(cost: CredentialCost) -> Result<Self, CredentialError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|err| CredentialError::InvalidCost {
                message: err.to_string(),
            })?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy_hash = hash_with(&argon, DUMMY_SECRET.as_bytes())?;
        Ok(Self {
            argon,
            cost,
            dummy_hash,
        })
    }

    /// Hash a secret with a fresh random salt.
    pub fn hash(&self, secret: &Secret) -> Result<CredentialHash, CredentialError> {
        hash_with(&self.argon, secret.expose())
    }

    /// Verify a secret against a stored hash.
    ///
    /// Returns `false` for mismatches and for hashes that cannot be parsed.
    pub fn verify(&self, secret: &Secret, hash: &CredentialHash) -> bool {
        match PasswordHash::new(hash.as_stored()) {
            Ok(parsed) => self
                .argon
                .verify_password(secret.expose(), &parsed)
                .is_ok(),
            Err(err) => {
                debug!(error = %err, "stored credential hash is not a PHC string");
                false
            }
        }
    }

    /// Verify a secret against whatever storage holds, if anything.
    ///
    /// Every path pays for one Argon2 verification: a missing record and a
    /// legacy digest both run against an internal hash first, so response
    /// time does not reveal which case applied.
    pub fn verify_stored(&self, secret: &Secret, stored: Option<&CredentialHash>) -> bool {
        match stored {
            None => {
                self.verify_dummy(secret);
                false
            }
            Some(hash) if hash.is_legacy() => {
                self.verify_dummy(secret);
                LegacyDigest::verify(secret, hash)
            }
            Some(hash) => self.verify(secret, hash),
        }
    }

    /// Hash a security-question answer after normalisation.
    pub fn hash_answer(&self, answer: &str) -> Result<CredentialHash, CredentialError> {
        self.hash(&Secret::normalised_answer(answer)?)
    }

    fn verify_dummy(&self, secret: &Secret) {
        let _ = self.verify(secret, &self.dummy_hash);
    }
}

impl fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCodec")
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

fn hash_with(argon: &Argon2<'_>, secret: &[u8]) -> Result<CredentialHash, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    argon
        .hash_password(secret, &salt)
        .map(|hash| CredentialHash(hash.to_string()))
        .map_err(|err| CredentialError::Hashing {
            message: err.to_string(),
        })
}

/// Verifier for `sha256$<salt-hex>$<digest-hex>` hashes carried over from the
/// previous platform. Used only as a fallback so those hashes can be upgraded.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyDigest;

impl LegacyDigest {
    /// Verify a secret against a legacy digest in constant time.
    pub fn verify(secret: &Secret, hash: &CredentialHash) -> bool {
        let Some(rest) = hash.as_stored().strip_prefix(LEGACY_DIGEST_PREFIX) else {
            return false;
        };
        let Some((salt_hex, digest_hex)) = rest.split_once('$') else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
            return false;
        };
        let actual = legacy_digest(secret.expose(), &salt);
        constant_time_eq(&actual, &expected)
    }

    /// Produce a legacy digest with a random salt.
    ///
    /// Only migration fixtures need this; new credentials use Argon2id.
    pub fn hash(secret: &Secret) -> CredentialHash {
        let mut salt = [0_u8; LEGACY_SALT_BYTES];
        OsRng.fill_bytes(&mut salt);
        let digest = legacy_digest(secret.expose(), &salt);
        CredentialHash(format!(
            "{LEGACY_DIGEST_PREFIX}{}${}",
            hex::encode(salt),
            hex::encode(digest)
        ))
    }
}

fn legacy_digest(secret: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret);
    hasher.finalize().to_vec()
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0_u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
