//! Identity store configuration loaded via OrthoConfig.
//!
//! Every value is optional in the environment; accessors apply the defaults.

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::{
    CredentialCost, CredentialError, DEFAULT_ORG_TAG, DEFAULT_RECONCILE_MIN_AGE_SECS,
};

const DEFAULT_CACHE_MAX_AGE_SECS: i64 = 300;
const DEFAULT_OUTBOX_BATCH: usize = 100;
const DEFAULT_POOL_MAX_SIZE: u32 = 10;

/// Raised when a configured value cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("{name} must not be negative (got {value})")]
    Negative { name: &'static str, value: i64 },
    #[error("{name} is too large to be a duration in seconds (got {value})")]
    TooLarge { name: &'static str, value: i64 },
    #[error("{name} must be at least 1")]
    Zero { name: &'static str },
}

/// Settings for the identity store and its operator commands.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "IDENTITY_STORE")]
pub struct IdentityStoreSettings {
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Maximum pooled connections.
    pub pool_max_size: Option<u32>,
    /// Organisation tag at the start of every identifier.
    pub org_tag: Option<String>,
    /// Argon2id memory cost in KiB.
    pub argon2_memory_kib: Option<u32>,
    /// Argon2id iteration count.
    pub argon2_iterations: Option<u32>,
    /// Argon2id lanes.
    pub argon2_parallelism: Option<u32>,
    /// JSON fixture used to warm the legacy cache.
    pub cache_seed_path: Option<PathBuf>,
    /// Seconds before a legacy cache entry stops being served.
    pub cache_max_age_secs: Option<i64>,
    /// Outbox entries relayed per batch.
    pub outbox_batch: Option<usize>,
    /// Seconds a transfer intent must age before reconciliation touches it.
    pub reconcile_min_age_secs: Option<i64>,
}

impl IdentityStoreSettings {
    pub fn database_url(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    /// Pool size; zero is rejected because the pool cannot hand out anything.
    pub fn pool_max_size(&self) -> Result<u32, SettingsError> {
        match self.pool_max_size.unwrap_or(DEFAULT_POOL_MAX_SIZE) {
            0 => Err(SettingsError::Zero {
                name: "pool_max_size",
            }),
            size => Ok(size),
        }
    }

    pub fn org_tag(&self) -> &str {
        self.org_tag.as_deref().unwrap_or(DEFAULT_ORG_TAG)
    }

    /// Argon2id cost, validated. Unset parameters take the codec defaults.
    pub fn credential_cost(&self) -> Result<CredentialCost, CredentialError> {
        CredentialCost::new(
            self.argon2_memory_kib
                .unwrap_or(CredentialCost::DEFAULT_MEMORY_KIB),
            self.argon2_iterations
                .unwrap_or(CredentialCost::DEFAULT_ITERATIONS),
            self.argon2_parallelism
                .unwrap_or(CredentialCost::DEFAULT_PARALLELISM),
        )
    }

    pub fn cache_seed_path(&self) -> Option<&Path> {
        self.cache_seed_path.as_deref()
    }

    pub fn cache_max_age(&self) -> Result<TimeDelta, SettingsError> {
        seconds(
            "cache_max_age_secs",
            self.cache_max_age_secs.unwrap_or(DEFAULT_CACHE_MAX_AGE_SECS),
        )
    }

    pub fn outbox_batch(&self) -> usize {
        self.outbox_batch.unwrap_or(DEFAULT_OUTBOX_BATCH).max(1)
    }

    pub fn reconcile_min_age(&self) -> Result<TimeDelta, SettingsError> {
        seconds(
            "reconcile_min_age_secs",
            self.reconcile_min_age_secs
                .unwrap_or(DEFAULT_RECONCILE_MIN_AGE_SECS),
        )
    }
}

fn seconds(name: &'static str, value: i64) -> Result<TimeDelta, SettingsError> {
    if value < 0 {
        return Err(SettingsError::Negative { name, value });
    }
    TimeDelta::try_seconds(value).ok_or(SettingsError::TooLarge { name, value })
}

#[cfg(test)]
mod tests {
    //! Environment loading for the identity store settings.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 10] = [
        "IDENTITY_STORE_DATABASE_URL",
        "IDENTITY_STORE_POOL_MAX_SIZE",
        "IDENTITY_STORE_ORG_TAG",
        "IDENTITY_STORE_ARGON2_MEMORY_KIB",
        "IDENTITY_STORE_ARGON2_ITERATIONS",
        "IDENTITY_STORE_ARGON2_PARALLELISM",
        "IDENTITY_STORE_CACHE_SEED_PATH",
        "IDENTITY_STORE_CACHE_MAX_AGE_SECS",
        "IDENTITY_STORE_OUTBOX_BATCH",
        "IDENTITY_STORE_RECONCILE_MIN_AGE_SECS",
    ];

    fn load_from_empty_args() -> IdentityStoreSettings {
        IdentityStoreSettings::load_from_iter([OsString::from("examboard-identity")])
            .expect("config should load")
    }

    #[rstest]
    fn defaults_apply_when_nothing_is_set() {
        let _guard = lock_env(VARS.map(|name| (name, None::<String>)));

        let settings = load_from_empty_args();
        assert_eq!(settings.database_url(), None);
        assert_eq!(settings.org_tag(), DEFAULT_ORG_TAG);
        assert_eq!(settings.pool_max_size(), Ok(DEFAULT_POOL_MAX_SIZE));
        assert_eq!(
            settings.credential_cost().expect("default cost"),
            CredentialCost::default()
        );
        assert_eq!(settings.cache_max_age(), Ok(TimeDelta::seconds(300)));
        assert_eq!(settings.outbox_batch(), DEFAULT_OUTBOX_BATCH);
        assert_eq!(
            settings.reconcile_min_age(),
            Ok(TimeDelta::seconds(DEFAULT_RECONCILE_MIN_AGE_SECS))
        );
        assert!(settings.cache_seed_path().is_none());
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let mut vars = VARS.map(|name| (name, None::<String>));
        vars[0].1 = Some("postgres://db/identity".to_owned());
        vars[2].1 = Some("WAEC".to_owned());
        vars[3].1 = Some("4096".to_owned());
        vars[6].1 = Some("/srv/seed.json".to_owned());
        vars[8].1 = Some("25".to_owned());
        let _guard = lock_env(vars);

        let settings = load_from_empty_args();
        assert_eq!(settings.database_url(), Some("postgres://db/identity"));
        assert_eq!(settings.org_tag(), "WAEC");
        assert_eq!(
            settings.credential_cost().expect("valid cost").memory_kib(),
            4096
        );
        assert_eq!(settings.cache_seed_path(), Some(Path::new("/srv/seed.json")));
        assert_eq!(settings.outbox_batch(), 25);
    }

    #[rstest]
    fn blank_database_url_counts_as_unset() {
        let mut vars = VARS.map(|name| (name, None::<String>));
        vars[0].1 = Some("   ".to_owned());
        let _guard = lock_env(vars);

        assert_eq!(load_from_empty_args().database_url(), None);
    }

    #[rstest]
    fn invalid_argon_cost_is_reported() {
        let mut vars = VARS.map(|name| (name, None::<String>));
        vars[5].1 = Some("0".to_owned());
        let _guard = lock_env(vars);

        assert!(load_from_empty_args().credential_cost().is_err());
    }

    #[rstest]
    #[case("0", Ok(TimeDelta::zero()))]
    #[case("45", Ok(TimeDelta::seconds(45)))]
    #[case("-1", Err(SettingsError::Negative { name: "cache_max_age_secs", value: -1 }))]
    #[case(
        "9223372036854775807",
        Err(SettingsError::TooLarge { name: "cache_max_age_secs", value: i64::MAX })
    )]
    fn cache_max_age_is_range_checked(
        #[case] raw: &str,
        #[case] expected: Result<TimeDelta, SettingsError>,
    ) {
        let mut vars = VARS.map(|name| (name, None::<String>));
        vars[7].1 = Some(raw.to_owned());
        let _guard = lock_env(vars);

        assert_eq!(load_from_empty_args().cache_max_age(), expected);
    }

    #[rstest]
    #[case("-60", SettingsError::Negative { name: "reconcile_min_age_secs", value: -60 })]
    #[case(
        "9223372036854775807",
        SettingsError::TooLarge { name: "reconcile_min_age_secs", value: i64::MAX }
    )]
    fn out_of_range_reconcile_age_is_reported(
        #[case] raw: &str,
        #[case] expected: SettingsError,
    ) {
        let mut vars = VARS.map(|name| (name, None::<String>));
        vars[9].1 = Some(raw.to_owned());
        let _guard = lock_env(vars);

        assert_eq!(load_from_empty_args().reconcile_min_age(), Err(expected));
    }

    #[rstest]
    fn empty_pool_is_rejected() {
        let mut vars = VARS.map(|name| (name, None::<String>));
        vars[1].1 = Some("0".to_owned());
        let _guard = lock_env(vars);

        assert_eq!(
            load_from_empty_args().pool_max_size(),
            Err(SettingsError::Zero {
                name: "pool_max_size"
            })
        );
    }
}
