//! Legacy in-memory identity cache.
//!
//! Implements the [`IdentityReadCache`] port for call sites that need
//! synchronous reads. The cache is non-authoritative: it only mirrors
//! outcomes the canonical store already committed, is seeded from a fixed
//! JSON fixture at start-up, and hides entries older than a staleness bound.
//! Stale entries are evicted whenever the cache is written. It is never
//! consulted when deciding whether an email is free.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use cap_std::{ambient_authority, fs::Dir};
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tracing::{debug, info};

use crate::domain::ports::IdentityReadCache;
use crate::domain::{
    EmailAddress, Partition, PartitionResolutionError, PublicIdentity, resolve_partition,
};

/// Errors raised while loading the seed fixture.
#[derive(Debug, thiserror::Error)]
pub enum CacheSeedError {
    #[error("failed to read cache seed {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache seed is not a JSON array of identities: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("cache seed entry names no partition: {0}")]
    Partition(#[from] PartitionResolutionError),
}

#[derive(Debug, Clone)]
struct CachedIdentity {
    identity: PublicIdentity,
    stored_at: DateTime<Utc>,
}

type CacheKey = (Partition, EmailAddress);

/// Read cache keyed by partition and canonical email.
pub struct LegacyIdentityCache {
    entries: RwLock<HashMap<CacheKey, CachedIdentity>>,
    max_age: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl LegacyIdentityCache {
    pub fn new(max_age: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_age,
            clock,
        }
    }

    /// Load identities from a JSON array of public identity views.
    ///
    /// Returns the number of entries loaded.
    pub fn seed_from_json(&self, json: &str) -> Result<usize, CacheSeedError> {
        let identities: Vec<PublicIdentity> = serde_json::from_str(json)?;
        let mut seeded = Vec::with_capacity(identities.len());
        for identity in identities {
            let partition = resolve_partition(identity.category, identity.exam_level)?;
            seeded.push((partition, identity));
        }
        let count = seeded.len();
        let mut entries = self.write_evicting_stale();
        let stored_at = self.clock.utc();
        for (partition, identity) in seeded {
            entries.insert(
                (partition, identity.email.clone()),
                CachedIdentity {
                    identity,
                    stored_at,
                },
            );
        }
        info!(count, "legacy identity cache seeded");
        Ok(count)
    }

    /// Load the seed fixture at `path`.
    pub fn seed_from_file(&self, path: &Path) -> Result<usize, CacheSeedError> {
        let read_error = |source| CacheSeedError::Read {
            path: path.to_path_buf(),
            source,
        };
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file_name = path.file_name().ok_or_else(|| {
            read_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seed path must be a file",
            ))
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(read_error)?;
        let contents = dir
            .read_to_string(Path::new(file_name))
            .map_err(read_error)?;
        self.seed_from_json(&contents)
    }

    /// Take the write lock after dropping entries past the staleness bound.
    fn write_evicting_stale(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CachedIdentity>> {
        let now = self.clock.utc();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| !is_stale(entry, now, self.max_age));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "stale cache entries evicted");
        }
        entries
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_stale(entry: &CachedIdentity, now: DateTime<Utc>, max_age: TimeDelta) -> bool {
    now - entry.stored_at > max_age
}

impl IdentityReadCache for LegacyIdentityCache {
    fn get(&self, partition: Partition, email: &EmailAddress) -> Option<PublicIdentity> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(&(partition, email.clone()))?;
        if is_stale(entry, self.clock.utc(), self.max_age) {
            debug!(partition = %partition, "stale cache entry ignored");
            return None;
        }
        Some(entry.identity.clone())
    }

    fn put(&self, partition: Partition, identity: &PublicIdentity) {
        let entry = CachedIdentity {
            identity: identity.clone(),
            stored_at: self.clock.utc(),
        };
        self.write_evicting_stale()
            .insert((partition, identity.email.clone()), entry);
    }

    fn delete(&self, partition: Partition, email: &EmailAddress) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(partition, email.clone()));
    }
}

#[cfg(test)]
mod tests {
    //! Staleness, keying, and seeding of the legacy cache.
    use super::*;
    use crate::test_support::{MutableClock, sample_record};
    use rstest::rstest;

    fn cache(clock: Arc<MutableClock>) -> LegacyIdentityCache {
        LegacyIdentityCache::new(TimeDelta::seconds(30), clock)
    }

    fn email(raw: &str) -> EmailAddress {
        EmailAddress::parse(raw).expect("valid email")
    }

    #[rstest]
    fn entries_are_scoped_by_partition() {
        let cache = cache(Arc::new(MutableClock::fixed()));
        let record = sample_record(Partition::StudentOrdinary, "s1@x.test");
        cache.put(Partition::StudentOrdinary, &record.to_public());

        assert!(cache.get(Partition::StudentOrdinary, &email("S1@X.test")).is_some());
        assert!(cache.get(Partition::StudentAdvanced, &email("s1@x.test")).is_none());
    }

    #[rstest]
    fn stale_entries_are_not_served() {
        let clock = Arc::new(MutableClock::fixed());
        let cache = cache(clock.clone());
        let record = sample_record(Partition::Teacher, "t1@x.test");
        cache.put(Partition::Teacher, &record.to_public());

        clock.advance_seconds(31);

        assert!(cache.get(Partition::Teacher, &email("t1@x.test")).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[rstest]
    fn writes_evict_stale_entries() {
        let clock = Arc::new(MutableClock::fixed());
        let cache = cache(clock.clone());
        let old = sample_record(Partition::Teacher, "t1@x.test");
        cache.put(Partition::Teacher, &old.to_public());
        clock.advance_seconds(20);
        let recent = sample_record(Partition::Teacher, "t2@x.test");
        cache.put(Partition::Teacher, &recent.to_public());

        clock.advance_seconds(15);
        let fresh = sample_record(Partition::Admin, "a1@x.test");
        cache.put(Partition::Admin, &fresh.to_public());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(Partition::Teacher, &recent.email).is_some());
        assert!(cache.get(Partition::Admin, &fresh.email).is_some());
    }

    #[rstest]
    fn delete_removes_the_entry() {
        let cache = cache(Arc::new(MutableClock::fixed()));
        let record = sample_record(Partition::Admin, "a1@x.test");
        cache.put(Partition::Admin, &record.to_public());
        cache.delete(Partition::Admin, &record.email);
        assert!(cache.get(Partition::Admin, &record.email).is_none());
    }

    #[rstest]
    fn seeds_from_json_views() {
        let cache = cache(Arc::new(MutableClock::fixed()));
        let seed = vec![
            sample_record(Partition::StudentAdvanced, "s2@x.test").to_public(),
            sample_record(Partition::Examiner, "e1@x.test").to_public(),
        ];
        let json = serde_json::to_string(&seed).expect("serialise seed");

        assert_eq!(cache.seed_from_json(&json).expect("seed loads"), 2);
        assert!(cache.get(Partition::StudentAdvanced, &email("s2@x.test")).is_some());
    }

    #[rstest]
    fn seed_with_unroutable_entry_loads_nothing() {
        let cache = cache(Arc::new(MutableClock::fixed()));
        let mut student = sample_record(Partition::StudentOrdinary, "s3@x.test").to_public();
        student.exam_level = None;
        let json = serde_json::to_string(&vec![student]).expect("serialise seed");

        let err = cache.seed_from_json(&json).expect_err("student needs a level");
        assert!(matches!(err, CacheSeedError::Partition(_)));
        assert!(cache.is_empty());
    }

    #[rstest]
    fn seed_fixture_in_repository_loads() {
        let cache = cache(Arc::new(MutableClock::fixed()));
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/legacy-cache-seed.json");
        let count = cache.seed_from_file(&path).expect("fixture loads");
        assert!(count > 0);
    }
}
