//! Operator entry point: migrations, outbox relay, transfer reconciliation,
//! and statistics against the PostgreSQL store.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use examboard_identity::config::IdentityStoreSettings;
use examboard_identity::domain::ports::IdentityQuery;
use examboard_identity::domain::{
    CredentialCodec, IdentifierGenerator, IdentityService, IdentityStoreParts,
};
use examboard_identity::outbound::alerts::TracingAuditAlerts;
use examboard_identity::outbound::cache::LegacyIdentityCache;
use examboard_identity::outbound::persistence::{
    DbPool, DieselAuditLog, DieselIdentityRepository, DieselTransferIntentRepository,
    PoolConfig, run_pending_migrations,
};

type PostgresIdentityService =
    IdentityService<DieselIdentityRepository, DieselTransferIntentRepository>;

#[derive(Debug, Parser)]
#[command(
    name = "examboard-identity",
    about = "Operate the examination board identity store",
    version
)]
struct Cli {
    /// Database connection URL. Overrides `IDENTITY_STORE_DATABASE_URL`.
    #[arg(long = "database-url", value_name = "url", global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,
    /// Redeliver audit events still pending in the outbox.
    RelayAudit,
    /// Resume or abandon interrupted partition transfers.
    ReconcileTransfers,
    /// Print identity counts per partition, region, and affiliation as JSON.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let cli = Cli::parse();
    let settings = IdentityStoreSettings::load_from_iter([std::ffi::OsString::from(
        "examboard-identity",
    )])
    .wrap_err("load identity store settings")?;
    let database_url = cli
        .database_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .or_else(|| settings.database_url().map(str::to_owned))
        .ok_or_else(|| eyre!("database URL missing: set --database-url or IDENTITY_STORE_DATABASE_URL"))?;

    match cli.command {
        Command::Migrate => {
            let applied = run_pending_migrations(&database_url).await?;
            info!(versions = ?applied, "migrate finished");
        }
        Command::RelayAudit => {
            let service = build_service(&settings, &database_url).await?;
            let report = service
                .relay_pending_audit(settings.outbox_batch())
                .await?;
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                failed = report.failed,
                "relay-audit finished"
            );
        }
        Command::ReconcileTransfers => {
            let service = build_service(&settings, &database_url).await?;
            let report = service.reconcile_transfers().await?;
            info!(
                examined = report.examined,
                completed = report.completed,
                abandoned = report.abandoned,
                skipped = report.skipped,
                failed = report.failed,
                "reconcile-transfers finished"
            );
        }
        Command::Stats => {
            let service = build_service(&settings, &database_url).await?;
            let stats = service.get_statistics().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

async fn build_service(
    settings: &IdentityStoreSettings,
    database_url: &str,
) -> Result<PostgresIdentityService> {
    let pool_config = PoolConfig::new(database_url).with_max_size(settings.pool_max_size()?);
    let pool = DbPool::new(pool_config)
        .await
        .wrap_err("create database pool")?;
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let codec = CredentialCodec::new(settings.credential_cost()?)?;
    let ids = IdentifierGenerator::new(settings.org_tag(), Arc::clone(&clock))?;
    let repository = Arc::new(DieselIdentityRepository::new(pool.clone()));

    let service = IdentityService::new(IdentityStoreParts {
        outbox: repository.clone(),
        repository,
        transfer_intents: Arc::new(DieselTransferIntentRepository::new(pool.clone())),
        audit_log: Arc::new(DieselAuditLog::new(pool)),
        alerts: Arc::new(TracingAuditAlerts),
        codec,
        ids,
        clock,
    })
    .with_reconcile_min_age(settings.reconcile_min_age()?);

    let Some(seed_path) = settings.cache_seed_path() else {
        return Ok(service);
    };
    let cache = LegacyIdentityCache::new(settings.cache_max_age()?, Arc::new(DefaultClock));
    let seeded = cache
        .seed_from_file(seed_path)
        .wrap_err("seed legacy identity cache")?;
    info!(seeded, "legacy identity cache attached");
    Ok(service.with_cache(Arc::new(cache)))
}
