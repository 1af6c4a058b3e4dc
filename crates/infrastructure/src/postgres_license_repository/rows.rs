use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use keyward_core::{AppError, AppResult, TeamId};
use keyward_domain::{
    ExpirationPolicy, ExpirationStart, ExpirationType, FingerprintBinding, FingerprintKind,
    License, LicenseId, LicenseKey, LicenseLimits, LicenseSettings, LicenseSnapshot,
};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Debug, FromRow)]
pub(super) struct LicenseRow {
    pub(super) id: Uuid,
    team_id: Uuid,
    license_key: String,
    product_ids: Vec<String>,
    customer_ids: Vec<String>,
    expiration_type: String,
    expiration_start: String,
    expiration_days: Option<i32>,
    expiration_date: Option<DateTime<Utc>>,
    hwid_limit: Option<i32>,
    ip_limit: Option<i32>,
    hwid_timeout_minutes: Option<i32>,
    ip_timeout_minutes: Option<i32>,
    metadata: Json<BTreeMap<String, String>>,
    suspended: bool,
    expires_at: Option<DateTime<Utc>>,
    first_activated_at: Option<DateTime<Utc>>,
    last_active_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    revision: i64,
}

#[derive(Debug, FromRow)]
pub(super) struct FingerprintRow {
    pub(super) license_id: Uuid,
    kind: String,
    value: String,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl LicenseRow {
    pub(super) fn into_license(self, fingerprints: Vec<FingerprintRow>) -> AppResult<License> {
        let fingerprints = fingerprints
            .into_iter()
            .map(|row| {
                Ok(FingerprintBinding {
                    kind: FingerprintKind::from_str(row.kind.as_str())?,
                    value: row.value,
                    first_seen_at: row.first_seen_at,
                    last_seen_at: row.last_seen_at,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(License::restore(LicenseSnapshot {
            id: LicenseId::from_uuid(self.id),
            team_id: TeamId::from_uuid(self.team_id),
            key: LicenseKey::parse(self.license_key.as_str())?,
            settings: LicenseSettings {
                product_ids: self.product_ids,
                customer_ids: self.customer_ids,
                expiration: ExpirationPolicy {
                    expiration_type: ExpirationType::from_str(self.expiration_type.as_str())?,
                    expiration_start: ExpirationStart::from_str(self.expiration_start.as_str())?,
                    expiration_days: from_db_count(self.expiration_days, "expiration_days")?,
                    expiration_date: self.expiration_date,
                },
                limits: LicenseLimits {
                    hwid_limit: from_db_count(self.hwid_limit, "hwid_limit")?,
                    ip_limit: from_db_count(self.ip_limit, "ip_limit")?,
                    hwid_timeout_minutes: from_db_count(
                        self.hwid_timeout_minutes,
                        "hwid_timeout_minutes",
                    )?,
                    ip_timeout_minutes: from_db_count(
                        self.ip_timeout_minutes,
                        "ip_timeout_minutes",
                    )?,
                },
                metadata: self.metadata.0,
                suspended: self.suspended,
            },
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            first_activated_at: self.first_activated_at,
            last_active_at: self.last_active_at,
            fingerprints,
            revision: u64::try_from(self.revision).map_err(|_| {
                AppError::Internal(format!("stored revision {} is negative", self.revision))
            })?,
        }))
    }
}

pub(super) fn to_db_count(value: Option<u32>, column: &str) -> AppResult<Option<i32>> {
    value
        .map(|value| {
            i32::try_from(value).map_err(|_| {
                AppError::Validation(format!("{column} value {value} is out of range"))
            })
        })
        .transpose()
}

fn from_db_count(value: Option<i32>, column: &str) -> AppResult<Option<u32>> {
    value
        .map(|value| {
            u32::try_from(value).map_err(|_| {
                AppError::Internal(format!("stored {column} value {value} is negative"))
            })
        })
        .transpose()
}

pub(super) fn to_db_revision(revision: u64) -> AppResult<i64> {
    i64::try_from(revision)
        .map_err(|_| AppError::Internal(format!("license revision {revision} is out of range")))
}
