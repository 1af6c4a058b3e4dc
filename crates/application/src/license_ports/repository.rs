use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_core::{AppResult, TeamId};
use keyward_domain::{License, LicenseId, LicenseKey};

/// Storage-level filters for license listing.
///
/// Status is time-dependent and is filtered by the service, not the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseFilter {
    /// Only licenses linked to this product.
    pub product_id: Option<String>,
    /// Only licenses issued to this customer.
    pub customer_id: Option<String>,
}

/// Repository port for license persistence.
#[async_trait]
pub trait LicenseRepository: Send + Sync {
    /// Inserts a new license. Fails with a conflict when the key is taken in the team.
    async fn create_license(&self, license: License) -> AppResult<()>;

    /// Replaces a stored license, including its fingerprint bindings.
    ///
    /// The write only lands when the stored revision still equals
    /// `license.revision()`; otherwise it fails with a conflict. Returns the
    /// license at its new revision.
    async fn save_license(&self, license: License) -> AppResult<License>;

    /// Stores validation activity only: activity timestamps, the expiration
    /// resolved on first activation and fingerprint bindings.
    ///
    /// Same revision check as [`LicenseRepository::save_license`].
    async fn record_activity(&self, license: License) -> AppResult<License>;

    /// Finds a license by identifier inside a team.
    async fn find_license(
        &self,
        team_id: TeamId,
        license_id: LicenseId,
    ) -> AppResult<Option<License>>;

    /// Finds a license by its canonical key inside a team.
    async fn find_license_by_key(
        &self,
        team_id: TeamId,
        key: &LicenseKey,
    ) -> AppResult<Option<License>>;

    /// Lists a team's licenses, newest first.
    async fn list_licenses(
        &self,
        team_id: TeamId,
        filter: LicenseFilter,
    ) -> AppResult<Vec<License>>;

    /// Deletes a license. Fails with not found when it does not exist in the team.
    async fn delete_license(&self, team_id: TeamId, license_id: LicenseId) -> AppResult<()>;

    /// Lists expiring licenses of every team whose resolved expiration is at or
    /// before `cutoff`, oldest expiration first.
    async fn list_licenses_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<License>>;
}
