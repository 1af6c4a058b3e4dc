use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_application::{LicenseFilter, LicenseRepository};
use keyward_core::{AppError, AppResult, TeamId};
use keyward_domain::{License, LicenseId, LicenseKey};
use tokio::sync::RwLock;

/// In-memory license repository implementation.
#[derive(Debug, Default)]
pub struct InMemoryLicenseRepository {
    licenses: RwLock<HashMap<LicenseId, License>>,
    keys: RwLock<HashMap<(TeamId, LicenseKey), LicenseId>>,
}

impl InMemoryLicenseRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn compare_and_swap(&self, mut license: License) -> AppResult<License> {
        let mut licenses = self.licenses.write().await;
        let Some(stored) = licenses
            .get_mut(&license.id())
            .filter(|stored| stored.team_id() == license.team_id())
        else {
            return Err(AppError::NotFound(format!(
                "license '{}' does not exist",
                license.id()
            )));
        };

        if stored.revision() != license.revision() {
            return Err(AppError::Conflict(format!(
                "license '{}' changed since revision {}",
                license.id(),
                license.revision()
            )));
        }

        license.advance_revision();
        *stored = license.clone();
        Ok(license)
    }
}

#[async_trait]
impl LicenseRepository for InMemoryLicenseRepository {
    async fn create_license(&self, license: License) -> AppResult<()> {
        let key = (license.team_id(), license.key().clone());
        let mut keys = self.keys.write().await;

        if keys.contains_key(&key) {
            return Err(AppError::Conflict(format!(
                "license key '{}' already exists for team '{}'",
                key.1, key.0
            )));
        }

        keys.insert(key, license.id());
        self.licenses.write().await.insert(license.id(), license);
        Ok(())
    }

    async fn save_license(&self, license: License) -> AppResult<License> {
        self.compare_and_swap(license).await
    }

    // A matching revision means nothing else was written since the load, so the
    // whole record can be swapped.
    async fn record_activity(&self, license: License) -> AppResult<License> {
        self.compare_and_swap(license).await
    }

    async fn find_license(
        &self,
        team_id: TeamId,
        license_id: LicenseId,
    ) -> AppResult<Option<License>> {
        Ok(self
            .licenses
            .read()
            .await
            .get(&license_id)
            .filter(|license| license.team_id() == team_id)
            .cloned())
    }

    async fn find_license_by_key(
        &self,
        team_id: TeamId,
        key: &LicenseKey,
    ) -> AppResult<Option<License>> {
        let Some(license_id) = self
            .keys
            .read()
            .await
            .get(&(team_id, key.clone()))
            .copied()
        else {
            return Ok(None);
        };

        Ok(self.licenses.read().await.get(&license_id).cloned())
    }

    async fn list_licenses(
        &self,
        team_id: TeamId,
        filter: LicenseFilter,
    ) -> AppResult<Vec<License>> {
        let licenses = self.licenses.read().await;

        let mut values: Vec<License> = licenses
            .values()
            .filter(|license| license.team_id() == team_id)
            .filter(|license| {
                filter
                    .product_id
                    .as_deref()
                    .is_none_or(|product_id| license.covers_product(product_id))
                    && filter
                        .customer_id
                        .as_deref()
                        .is_none_or(|customer_id| license.belongs_to_customer(customer_id))
            })
            .cloned()
            .collect();
        values.sort_by(|left, right| {
            right
                .created_at()
                .cmp(&left.created_at())
                .then_with(|| right.id().cmp(&left.id()))
        });

        Ok(values)
    }

    async fn delete_license(&self, team_id: TeamId, license_id: LicenseId) -> AppResult<()> {
        let mut keys = self.keys.write().await;
        let mut licenses = self.licenses.write().await;

        let removed = match licenses.get(&license_id) {
            Some(license) if license.team_id() == team_id => licenses.remove(&license_id),
            _ => None,
        };
        let Some(removed) = removed else {
            return Err(AppError::NotFound(format!(
                "license '{license_id}' does not exist"
            )));
        };

        keys.remove(&(removed.team_id(), removed.key().clone()));
        Ok(())
    }

    async fn list_licenses_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<License>> {
        let licenses = self.licenses.read().await;

        let mut values: Vec<License> = licenses
            .values()
            .filter(|license| {
                license.settings().expiration.expiration_type.can_expire()
                    && license
                        .expires_at()
                        .is_some_and(|expires_at| expires_at <= cutoff)
            })
            .cloned()
            .collect();
        values.sort_by_key(License::expires_at);
        values.truncate(limit);

        Ok(values)
    }
}
