//! Keyward background worker: webhook delivery and expired license cleanup.

#![forbid(unsafe_code)]

mod config;

use std::sync::Arc;

use chrono::Utc;
use keyward_application::{DeliverySummary, LicenseCleanupService, WebhookService};
use keyward_core::{AppError, AppResult};
use keyward_infrastructure::{
    HttpWebhookDispatcher, PostgresAuditRepository, PostgresLicenseRepository,
    PostgresWebhookRepository,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::WorkerConfig;

// Licenses purged per cleanup query; the pass repeats until a batch comes back short.
const CLEANUP_BATCH_SIZE: usize = 500;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    let http_client = reqwest::Client::builder()
        .timeout(config.webhook_timeout())
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;
    let (webhook_service, cleanup_service) = build_services(pool, http_client, &config);

    info!(
        poll_interval_ms = config.poll_interval_ms,
        webhook_batch_size = config.webhook_batch_size,
        webhook_max_attempts = config.webhook_max_attempts,
        license_retention_days = config.license_retention_days,
        cleanup_interval_seconds = config.cleanup_interval_seconds,
        "keyward-worker started"
    );

    let mut next_cleanup = Instant::now();
    loop {
        let summary = match webhook_service
            .deliver_pending(config.webhook_batch_size, Utc::now())
            .await
        {
            Ok(summary) => summary,
            Err(error) => {
                warn!(error = %error, "webhook delivery pass failed");
                DeliverySummary::default()
            }
        };

        if Instant::now() >= next_cleanup {
            run_cleanup(&cleanup_service, &config).await;
            next_cleanup = Instant::now() + config.cleanup_interval();
        }

        let processed = summary
            .delivered
            .saturating_add(summary.failed)
            .saturating_add(summary.retrying);
        let batch_was_full = usize::try_from(processed)
            .is_ok_and(|processed| processed >= config.webhook_batch_size);
        if !batch_was_full {
            tokio::time::sleep(config.poll_interval()).await;
        }
    }
}

async fn run_cleanup(cleanup_service: &LicenseCleanupService, config: &WorkerConfig) {
    let mut purged_total = 0_u64;
    loop {
        match cleanup_service
            .purge_expired(Utc::now(), config.retention(), CLEANUP_BATCH_SIZE)
            .await
        {
            Ok(purged) => {
                purged_total = purged_total.saturating_add(purged);
                let batch_was_full =
                    usize::try_from(purged).is_ok_and(|purged| purged >= CLEANUP_BATCH_SIZE);
                if !batch_was_full {
                    break;
                }
            }
            Err(error) => {
                warn!(error = %error, "license cleanup pass failed");
                break;
            }
        }
    }

    if purged_total > 0 {
        info!(purged = purged_total, "license cleanup finished");
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_services(
    pool: PgPool,
    http_client: reqwest::Client,
    config: &WorkerConfig,
) -> (WebhookService, LicenseCleanupService) {
    let license_repository = Arc::new(PostgresLicenseRepository::new(pool.clone()));
    let webhook_repository = Arc::new(PostgresWebhookRepository::new(pool.clone()));
    let audit_repository = Arc::new(PostgresAuditRepository::new(pool));
    let dispatcher = Arc::new(HttpWebhookDispatcher::new(
        http_client,
        config.webhook_timeout(),
    ));

    let webhook_service = WebhookService::new(
        webhook_repository,
        dispatcher,
        audit_repository.clone(),
        config.webhook_max_attempts,
    );
    let cleanup_service = LicenseCleanupService::new(license_repository, audit_repository);

    (webhook_service, cleanup_service)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
