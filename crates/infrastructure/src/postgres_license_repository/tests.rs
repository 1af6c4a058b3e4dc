use chrono::{DateTime, Utc};
use keyward_application::{LicenseFilter, LicenseRepository};
use keyward_core::{AppError, TeamId};
use keyward_domain::{
    ExpirationPolicy, ExpirationStart, FingerprintKind, License, LicenseExpirationEvaluator,
    LicenseKey, LicenseLimits, LicenseSettings,
};
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use super::PostgresLicenseRepository;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres license tests: {error}");
    }

    Some(pool)
}

fn at(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(|_| unreachable!())
}

fn random_key() -> LicenseKey {
    loop {
        let entropy: Vec<u8> = (0..4)
            .flat_map(|_| uuid::Uuid::new_v4().into_bytes())
            .collect();
        if let Some(key) = LicenseKey::from_entropy(&entropy) {
            return key;
        }
    }
}

fn issue(team_id: TeamId, settings: LicenseSettings, now: DateTime<Utc>) -> License {
    License::issue(
        team_id,
        random_key(),
        settings,
        &LicenseExpirationEvaluator::default(),
        now,
    )
    .unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn license_round_trips_with_settings_and_fingerprints() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresLicenseRepository::new(pool);
    let team_id = TeamId::new();
    let now = at("2024-01-01T00:00:00Z");
    let settings = LicenseSettings {
        product_ids: vec!["desktop".to_owned()],
        customer_ids: vec!["acme".to_owned()],
        expiration: ExpirationPolicy::after_days(30, ExpirationStart::Activation),
        limits: LicenseLimits {
            hwid_limit: Some(2),
            hwid_timeout_minutes: Some(60),
            ..LicenseLimits::default()
        },
        metadata: [("tier".to_owned(), "pro".to_owned())].into_iter().collect(),
        suspended: false,
    };
    let mut license = issue(team_id, settings, now);
    assert!(repository.create_license(license.clone()).await.is_ok());

    let activated_at = at("2024-01-03T00:00:00Z");
    license.register_fingerprint(FingerprintKind::Hwid, "machine-a", activated_at);
    license.record_activity(&LicenseExpirationEvaluator::default(), activated_at);
    let license = repository
        .record_activity(license)
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(license.revision(), 1);

    let stored = repository
        .find_license_by_key(team_id, license.key())
        .await
        .unwrap_or_default();
    assert_eq!(stored, Some(license.clone()));

    let foreign = repository
        .find_license(TeamId::new(), license.id())
        .await
        .unwrap_or_default();
    assert!(foreign.is_none());
}

#[tokio::test]
async fn duplicate_key_in_team_is_a_conflict() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresLicenseRepository::new(pool);
    let team_id = TeamId::new();
    let now = at("2024-01-01T00:00:00Z");
    let license = issue(team_id, LicenseSettings::default(), now);
    assert!(repository.create_license(license.clone()).await.is_ok());

    let duplicate = License::issue(
        team_id,
        license.key().clone(),
        LicenseSettings::default(),
        &LicenseExpirationEvaluator::default(),
        now,
    )
    .unwrap_or_else(|_| unreachable!());
    let created = repository.create_license(duplicate).await;
    assert!(matches!(created, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn listing_filters_by_product_and_deletes_are_team_scoped() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresLicenseRepository::new(pool);
    let team_id = TeamId::new();
    let now = at("2024-01-01T00:00:00Z");
    let desktop = issue(
        team_id,
        LicenseSettings {
            product_ids: vec!["desktop".to_owned()],
            ..LicenseSettings::default()
        },
        now,
    );
    let server = issue(
        team_id,
        LicenseSettings {
            product_ids: vec!["server".to_owned()],
            ..LicenseSettings::default()
        },
        now,
    );
    assert!(repository.create_license(desktop.clone()).await.is_ok());
    assert!(repository.create_license(server.clone()).await.is_ok());

    let listed = repository
        .list_licenses(
            team_id,
            LicenseFilter {
                product_id: Some("desktop".to_owned()),
                customer_id: None,
            },
        )
        .await
        .unwrap_or_default();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id(), desktop.id());

    assert!(
        repository
            .delete_license(TeamId::new(), server.id())
            .await
            .is_err()
    );
    assert!(repository.delete_license(team_id, server.id()).await.is_ok());
    let remaining = repository
        .list_licenses(team_id, LicenseFilter::default())
        .await
        .unwrap_or_default();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn expired_listing_only_returns_expiring_types_before_cutoff() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresLicenseRepository::new(pool);
    let team_id = TeamId::new();
    let created_at = at("1990-01-01T00:00:00Z");
    let expired = issue(
        team_id,
        LicenseSettings {
            expiration: ExpirationPolicy::after_days(1, ExpirationStart::Creation),
            ..LicenseSettings::default()
        },
        created_at,
    );
    let never = issue(team_id, LicenseSettings::default(), created_at);
    assert!(repository.create_license(expired.clone()).await.is_ok());
    assert!(repository.create_license(never.clone()).await.is_ok());

    let listed = repository
        .list_licenses_expired_before(at("1990-01-05T00:00:00Z"), 1_000)
        .await
        .unwrap_or_default();
    assert!(listed.iter().any(|license| license.id() == expired.id()));
    assert!(listed.iter().all(|license| license.id() != never.id()));
}

#[tokio::test]
async fn stale_activity_write_cannot_undo_a_suspension() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresLicenseRepository::new(pool);
    let team_id = TeamId::new();
    let now = at("2024-01-01T00:00:00Z");
    let evaluator = LicenseExpirationEvaluator::default();
    let loaded = issue(team_id, LicenseSettings::default(), now);
    assert!(repository.create_license(loaded.clone()).await.is_ok());

    let mut suspended = loaded.clone();
    suspended.set_suspended(true, now);
    let saved = repository.save_license(suspended).await;
    assert_eq!(saved.map(|license| license.revision()).ok(), Some(1));

    let mut stale = loaded.clone();
    stale.record_activity(&evaluator, now);
    let rejected = repository.record_activity(stale).await;
    assert!(matches!(rejected, Err(AppError::Conflict(_))));

    let current = repository
        .find_license(team_id, loaded.id())
        .await
        .unwrap_or_default()
        .unwrap_or_else(|| unreachable!());
    assert!(current.settings().suspended);
    assert_eq!(current.last_active_at(), None);

    let missing = repository
        .save_license(issue(team_id, LicenseSettings::default(), now))
        .await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}
