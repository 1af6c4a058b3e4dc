use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_application::{LicenseFilter, LicenseRepository};
use keyward_core::{AppError, AppResult, TeamId};
use keyward_domain::{License, LicenseId, LicenseKey};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

mod rows;

use rows::{FingerprintRow, LicenseRow, to_db_count, to_db_revision};

const LICENSE_COLUMNS: &str = r#"
    id,
    team_id,
    license_key,
    product_ids,
    customer_ids,
    expiration_type,
    expiration_start,
    expiration_days,
    expiration_date,
    hwid_limit,
    ip_limit,
    hwid_timeout_minutes,
    ip_timeout_minutes,
    metadata,
    suspended,
    expires_at,
    first_activated_at,
    last_active_at,
    created_at,
    updated_at,
    revision
"#;

/// PostgreSQL-backed license repository.
#[derive(Clone)]
pub struct PostgresLicenseRepository {
    pool: PgPool,
}

impl PostgresLicenseRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_licenses(&self, rows: Vec<LicenseRow>) -> AppResult<Vec<License>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let license_ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let fingerprint_rows = sqlx::query_as::<_, FingerprintRow>(
            r#"
            SELECT license_id, kind, value, first_seen_at, last_seen_at
            FROM license_fingerprints
            WHERE license_id = ANY($1)
            ORDER BY first_seen_at, value
            "#,
        )
        .bind(license_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load license fingerprints: {error}"))
        })?;

        let mut fingerprints: HashMap<Uuid, Vec<FingerprintRow>> = HashMap::new();
        for row in fingerprint_rows {
            fingerprints.entry(row.license_id).or_default().push(row);
        }

        rows.into_iter()
            .map(|row| {
                let bindings = fingerprints.remove(&row.id).unwrap_or_default();
                row.into_license(bindings)
            })
            .collect()
    }
}

#[async_trait]
impl LicenseRepository for PostgresLicenseRepository {
    async fn create_license(&self, license: License) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin transaction: {error}"))
        })?;

        ensure_team(&mut transaction, license.team_id()).await?;

        let settings = license.settings();
        let expiration = settings.expiration;
        let limits = settings.limits;
        let inserted = sqlx::query(
            r#"
            INSERT INTO licenses (
                id,
                team_id,
                license_key,
                product_ids,
                customer_ids,
                expiration_type,
                expiration_start,
                expiration_days,
                expiration_date,
                hwid_limit,
                ip_limit,
                hwid_timeout_minutes,
                ip_timeout_minutes,
                metadata,
                suspended,
                expires_at,
                first_activated_at,
                last_active_at,
                created_at,
                updated_at,
                revision
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
                $21
            )
            ON CONFLICT (team_id, license_key) DO NOTHING
            "#,
        )
        .bind(license.id().as_uuid())
        .bind(license.team_id().as_uuid())
        .bind(license.key().as_str())
        .bind(&settings.product_ids)
        .bind(&settings.customer_ids)
        .bind(expiration.expiration_type.as_str())
        .bind(expiration.expiration_start.as_str())
        .bind(to_db_count(expiration.expiration_days, "expiration_days")?)
        .bind(expiration.expiration_date)
        .bind(to_db_count(limits.hwid_limit, "hwid_limit")?)
        .bind(to_db_count(limits.ip_limit, "ip_limit")?)
        .bind(to_db_count(limits.hwid_timeout_minutes, "hwid_timeout_minutes")?)
        .bind(to_db_count(limits.ip_timeout_minutes, "ip_timeout_minutes")?)
        .bind(Json(&settings.metadata))
        .bind(settings.suspended)
        .bind(license.expires_at())
        .bind(license.first_activated_at())
        .bind(license.last_active_at())
        .bind(license.created_at())
        .bind(license.updated_at())
        .bind(to_db_revision(license.revision())?)
        .execute(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to create license: {error}")))?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "license key '{}' already exists for team '{}'",
                license.key(),
                license.team_id()
            )));
        }

        replace_fingerprints(&mut transaction, &license).await?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        Ok(())
    }

    async fn save_license(&self, mut license: License) -> AppResult<License> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin transaction: {error}"))
        })?;

        let settings = license.settings();
        let expiration = settings.expiration;
        let limits = settings.limits;
        let updated = sqlx::query(
            r#"
            UPDATE licenses
            SET
                product_ids = $4,
                customer_ids = $5,
                expiration_type = $6,
                expiration_start = $7,
                expiration_days = $8,
                expiration_date = $9,
                hwid_limit = $10,
                ip_limit = $11,
                hwid_timeout_minutes = $12,
                ip_timeout_minutes = $13,
                metadata = $14,
                suspended = $15,
                expires_at = $16,
                first_activated_at = $17,
                last_active_at = $18,
                updated_at = $19,
                revision = revision + 1
            WHERE id = $1 AND team_id = $2 AND revision = $3
            "#,
        )
        .bind(license.id().as_uuid())
        .bind(license.team_id().as_uuid())
        .bind(to_db_revision(license.revision())?)
        .bind(&settings.product_ids)
        .bind(&settings.customer_ids)
        .bind(expiration.expiration_type.as_str())
        .bind(expiration.expiration_start.as_str())
        .bind(to_db_count(expiration.expiration_days, "expiration_days")?)
        .bind(expiration.expiration_date)
        .bind(to_db_count(limits.hwid_limit, "hwid_limit")?)
        .bind(to_db_count(limits.ip_limit, "ip_limit")?)
        .bind(to_db_count(limits.hwid_timeout_minutes, "hwid_timeout_minutes")?)
        .bind(to_db_count(limits.ip_timeout_minutes, "ip_timeout_minutes")?)
        .bind(Json(&settings.metadata))
        .bind(settings.suspended)
        .bind(license.expires_at())
        .bind(license.first_activated_at())
        .bind(license.last_active_at())
        .bind(license.updated_at())
        .execute(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to save license: {error}")))?;

        if updated.rows_affected() == 0 {
            return Err(stale_or_missing(&mut transaction, &license).await);
        }

        replace_fingerprints(&mut transaction, &license).await?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        license.advance_revision();
        Ok(license)
    }

    async fn record_activity(&self, mut license: License) -> AppResult<License> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin transaction: {error}"))
        })?;

        let updated = sqlx::query(
            r#"
            UPDATE licenses
            SET
                expires_at = $4,
                first_activated_at = $5,
                last_active_at = $6,
                revision = revision + 1
            WHERE id = $1 AND team_id = $2 AND revision = $3
            "#,
        )
        .bind(license.id().as_uuid())
        .bind(license.team_id().as_uuid())
        .bind(to_db_revision(license.revision())?)
        .bind(license.expires_at())
        .bind(license.first_activated_at())
        .bind(license.last_active_at())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to record license activity: {error}"))
        })?;

        if updated.rows_affected() == 0 {
            return Err(stale_or_missing(&mut transaction, &license).await);
        }

        replace_fingerprints(&mut transaction, &license).await?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        license.advance_revision();
        Ok(license)
    }

    async fn find_license(
        &self,
        team_id: TeamId,
        license_id: LicenseId,
    ) -> AppResult<Option<License>> {
        let sql = format!("SELECT {LICENSE_COLUMNS} FROM licenses WHERE team_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, LicenseRow>(sql.as_str())
            .bind(team_id.as_uuid())
            .bind(license_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to find license: {error}")))?;

        Ok(self
            .load_licenses(row.into_iter().collect())
            .await?
            .into_iter()
            .next())
    }

    async fn find_license_by_key(
        &self,
        team_id: TeamId,
        key: &LicenseKey,
    ) -> AppResult<Option<License>> {
        let sql = format!(
            "SELECT {LICENSE_COLUMNS} FROM licenses WHERE team_id = $1 AND license_key = $2"
        );
        let row = sqlx::query_as::<_, LicenseRow>(sql.as_str())
            .bind(team_id.as_uuid())
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to find license by key: {error}"))
            })?;

        Ok(self
            .load_licenses(row.into_iter().collect())
            .await?
            .into_iter()
            .next())
    }

    async fn list_licenses(
        &self,
        team_id: TeamId,
        filter: LicenseFilter,
    ) -> AppResult<Vec<License>> {
        let sql = format!(
            r#"
            SELECT {LICENSE_COLUMNS}
            FROM licenses
            WHERE team_id = $1
              AND ($2::TEXT IS NULL OR $2 = ANY(product_ids))
              AND ($3::TEXT IS NULL OR $3 = ANY(customer_ids))
            ORDER BY created_at DESC, id DESC
            "#
        );
        let rows = sqlx::query_as::<_, LicenseRow>(sql.as_str())
            .bind(team_id.as_uuid())
            .bind(filter.product_id)
            .bind(filter.customer_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to list licenses: {error}")))?;

        self.load_licenses(rows).await
    }

    async fn delete_license(&self, team_id: TeamId, license_id: LicenseId) -> AppResult<()> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM licenses
            WHERE team_id = $1 AND id = $2
            "#,
        )
        .bind(team_id.as_uuid())
        .bind(license_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to delete license: {error}")))?;

        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "license '{license_id}' does not exist"
            )));
        }

        Ok(())
    }

    async fn list_licenses_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<License>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            r#"
            SELECT {LICENSE_COLUMNS}
            FROM licenses
            WHERE expiration_type <> 'never'
              AND expires_at IS NOT NULL
              AND expires_at <= $1
            ORDER BY expires_at ASC, id ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, LicenseRow>(sql.as_str())
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to list expired licenses: {error}"))
            })?;

        self.load_licenses(rows).await
    }
}

/// Creates the team row on first use so licenses and webhooks can reference it.
pub(crate) async fn ensure_team(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: TeamId,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO teams (id, name)
        VALUES ($1, $2)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(team_id.as_uuid())
    .bind(team_id.to_string())
    .execute(&mut **transaction)
    .await
    .map_err(|error| AppError::Internal(format!("failed to ensure team: {error}")))?;

    Ok(())
}

/// Tells a revision mismatch apart from a license that is gone.
async fn stale_or_missing(
    transaction: &mut Transaction<'_, Postgres>,
    license: &License,
) -> AppError {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM licenses WHERE id = $1 AND team_id = $2
        )
        "#,
    )
    .bind(license.id().as_uuid())
    .bind(license.team_id().as_uuid())
    .fetch_one(&mut **transaction)
    .await;

    match exists {
        Ok(true) => AppError::Conflict(format!(
            "license '{}' changed since revision {}",
            license.id(),
            license.revision()
        )),
        Ok(false) => AppError::NotFound(format!("license '{}' does not exist", license.id())),
        Err(error) => AppError::Internal(format!("failed to check license revision: {error}")),
    }
}

async fn replace_fingerprints(
    transaction: &mut Transaction<'_, Postgres>,
    license: &License,
) -> AppResult<()> {
    sqlx::query(
        r#"
        DELETE FROM license_fingerprints
        WHERE license_id = $1
        "#,
    )
    .bind(license.id().as_uuid())
    .execute(&mut **transaction)
    .await
    .map_err(|error| {
        AppError::Internal(format!("failed to clear license fingerprints: {error}"))
    })?;

    for binding in license.fingerprints() {
        sqlx::query(
            r#"
            INSERT INTO license_fingerprints (
                license_id,
                kind,
                value,
                first_seen_at,
                last_seen_at
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(license.id().as_uuid())
        .bind(binding.kind.as_str())
        .bind(binding.value.as_str())
        .bind(binding.first_seen_at)
        .bind(binding.last_seen_at)
        .execute(&mut **transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to store license fingerprint: {error}"))
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests;
