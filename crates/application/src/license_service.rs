//! Team-scoped license management.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyward_core::{Actor, AppError, AppResult};
use keyward_domain::{
    AuditAction, License, LicenseExpirationEvaluator, LicenseId, LicenseKey, LicenseSettings,
    LicenseStatus, WebhookEvent,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::license_ports::{AuditEvent, AuditRepository, LicenseFilter, LicenseRepository};
use crate::webhook_service::WebhookService;

mod keys;
mod payload;

/// Page size used when a listing query does not set one.
pub const LICENSE_LIST_DEFAULT_LIMIT: usize = 50;

/// Largest accepted page size for license listings.
pub const LICENSE_LIST_MAX_LIMIT: usize = 200;

/// Reload-and-retry rounds for a write that lost a revision race.
pub(crate) const LICENSE_WRITE_ATTEMPTS: usize = 3;

/// Input payload for license creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateLicenseInput {
    /// Caller-provided key. A random key is generated when absent.
    pub key: Option<String>,
    /// Initial settings.
    pub settings: LicenseSettings,
}

/// Listing query for a team's licenses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseListQuery {
    /// Only licenses classified with this status at the request instant.
    pub status: Option<LicenseStatus>,
    /// Only licenses linked to this product.
    pub product_id: Option<String>,
    /// Only licenses issued to this customer.
    pub customer_id: Option<String>,
    /// Page size, clamped to `1..=LICENSE_LIST_MAX_LIMIT`.
    pub limit: usize,
    /// Number of matching licenses to skip.
    pub offset: usize,
}

impl Default for LicenseListQuery {
    fn default() -> Self {
        Self {
            status: None,
            product_id: None,
            customer_id: None,
            limit: LICENSE_LIST_DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// License together with its status at the request instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseView {
    /// License record.
    pub license: License,
    /// Computed status.
    pub status: LicenseStatus,
}

/// One page of a license listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicensePage {
    /// Licenses on this page.
    pub items: Vec<LicenseView>,
    /// Number of licenses matching the query across all pages.
    pub total: usize,
}

/// Application service for license management.
#[derive(Clone)]
pub struct LicenseService {
    repository: Arc<dyn LicenseRepository>,
    audit_repository: Arc<dyn AuditRepository>,
    webhooks: WebhookService,
    evaluator: LicenseExpirationEvaluator,
}

impl LicenseService {
    /// Creates a new license service.
    #[must_use]
    pub fn new(
        repository: Arc<dyn LicenseRepository>,
        audit_repository: Arc<dyn AuditRepository>,
        webhooks: WebhookService,
        evaluator: LicenseExpirationEvaluator,
    ) -> Self {
        Self {
            repository,
            audit_repository,
            webhooks,
            evaluator,
        }
    }

    /// Issues a license for the actor's team.
    pub async fn create_license(
        &self,
        actor: &Actor,
        input: CreateLicenseInput,
        now: DateTime<Utc>,
    ) -> AppResult<LicenseView> {
        let settings = input.settings.validated()?;

        let license = match input.key {
            Some(raw_key) => {
                let key = LicenseKey::parse(raw_key.as_str())?;
                let license = License::issue(actor.team_id(), key, settings, &self.evaluator, now)?;
                self.repository.create_license(license.clone()).await?;
                license
            }
            None => self.issue_with_generated_key(actor, settings, now).await?,
        };

        self.append_audit(
            actor,
            AuditAction::LicenseCreated,
            &license,
            Some(format!("issued license '{}'", license.key())),
        )
        .await?;

        let view = self.view(license, now);
        let created = payload::license_payload(&view);
        self.notify(actor, WebhookEvent::LicenseCreated, created, now).await;

        info!(team_id = %actor.team_id(), license_id = %view.license.id(), "license created");
        Ok(view)
    }

    /// Replaces the settings of a license and recomputes its expiration.
    ///
    /// The suspension flag in `settings` is ignored; see [`Self::set_suspended`].
    pub async fn update_license(
        &self,
        actor: &Actor,
        license_id: LicenseId,
        settings: LicenseSettings,
        now: DateTime<Utc>,
    ) -> AppResult<LicenseView> {
        let (license, _) = self
            .modify_license(actor, license_id, |license| {
                license.apply_settings(settings.clone(), &self.evaluator, now)?;
                Ok(true)
            })
            .await?;

        self.append_audit(actor, AuditAction::LicenseUpdated, &license, None)
            .await?;

        let view = self.view(license, now);
        let updated = payload::license_payload(&view);
        self.notify(actor, WebhookEvent::LicenseUpdated, updated, now).await;

        Ok(view)
    }

    /// Suspends or reinstates a license.
    ///
    /// Setting the flag to its current value is a no-op without audit or event.
    pub async fn set_suspended(
        &self,
        actor: &Actor,
        license_id: LicenseId,
        suspended: bool,
        now: DateTime<Utc>,
    ) -> AppResult<LicenseView> {
        let (license, changed) = self
            .modify_license(actor, license_id, |license| {
                Ok(license.set_suspended(suspended, now))
            })
            .await?;
        if !changed {
            return Ok(self.view(license, now));
        }

        let (action, event) = if suspended {
            (AuditAction::LicenseSuspended, WebhookEvent::LicenseSuspended)
        } else {
            (AuditAction::LicenseReinstated, WebhookEvent::LicenseReinstated)
        };
        self.append_audit(actor, action, &license, None).await?;

        let view = self.view(license, now);
        self.notify(actor, event, payload::license_payload(&view), now).await;

        Ok(view)
    }

    /// Deletes a license of the actor's team.
    pub async fn delete_license(
        &self,
        actor: &Actor,
        license_id: LicenseId,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let license = self.require_license(actor, license_id).await?;
        self.repository
            .delete_license(actor.team_id(), license_id)
            .await?;

        self.append_audit(actor, AuditAction::LicenseDeleted, &license, None)
            .await?;
        self.notify(
            actor,
            WebhookEvent::LicenseDeleted,
            payload::deleted_payload(&license),
            now,
        )
        .await;

        Ok(())
    }

    /// Returns one license with its status at `now`.
    pub async fn get_license(
        &self,
        actor: &Actor,
        license_id: LicenseId,
        now: DateTime<Utc>,
    ) -> AppResult<LicenseView> {
        let license = self.require_license(actor, license_id).await?;
        Ok(self.view(license, now))
    }

    /// Lists the actor's team licenses, newest first.
    pub async fn list_licenses(
        &self,
        actor: &Actor,
        query: LicenseListQuery,
        now: DateTime<Utc>,
    ) -> AppResult<LicensePage> {
        let limit = query.limit.clamp(1, LICENSE_LIST_MAX_LIMIT);
        let matching: Vec<LicenseView> = self
            .repository
            .list_licenses(
                actor.team_id(),
                LicenseFilter {
                    product_id: query.product_id,
                    customer_id: query.customer_id,
                },
            )
            .await?
            .into_iter()
            .map(|license| self.view(license, now))
            .filter(|view| query.status.is_none_or(|status| view.status == status))
            .collect();

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .collect();

        Ok(LicensePage { items, total })
    }

    /// Loads, changes and saves a license, reloading when a concurrent write
    /// moved its revision. `change` reports whether anything changed; nothing
    /// is written otherwise.
    async fn modify_license<F>(
        &self,
        actor: &Actor,
        license_id: LicenseId,
        mut change: F,
    ) -> AppResult<(License, bool)>
    where
        F: FnMut(&mut License) -> AppResult<bool>,
    {
        for attempt in 1..=LICENSE_WRITE_ATTEMPTS {
            let mut license = self.require_license(actor, license_id).await?;
            if !change(&mut license)? {
                return Ok((license, false));
            }

            match self.repository.save_license(license).await {
                Ok(saved) => return Ok((saved, true)),
                Err(AppError::Conflict(reason)) => {
                    debug!(license_id = %license_id, attempt, %reason, "license write raced");
                }
                Err(error) => return Err(error),
            }
        }

        Err(AppError::Conflict(format!(
            "license '{license_id}' kept changing concurrently, retry the request"
        )))
    }

    async fn require_license(&self, actor: &Actor, license_id: LicenseId) -> AppResult<License> {
        self.repository
            .find_license(actor.team_id(), license_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("license '{license_id}' does not exist")))
    }

    fn view(&self, license: License, now: DateTime<Utc>) -> LicenseView {
        let status = license.status(&self.evaluator, now);
        LicenseView { license, status }
    }

    async fn append_audit(
        &self,
        actor: &Actor,
        action: AuditAction,
        license: &License,
        detail: Option<String>,
    ) -> AppResult<()> {
        self.audit_repository
            .append_event(AuditEvent {
                team_id: actor.team_id(),
                subject: actor.subject().to_owned(),
                action,
                resource_type: "license".to_owned(),
                resource_id: license.id().to_string(),
                detail,
            })
            .await
    }

    // The license change is already persisted, so a queue failure is only logged.
    async fn notify(&self, actor: &Actor, event: WebhookEvent, payload: Value, now: DateTime<Utc>) {
        if let Err(error) = self
            .webhooks
            .enqueue(actor.team_id(), event, payload, now)
            .await
        {
            warn!(
                team_id = %actor.team_id(),
                event = event.as_str(),
                %error,
                "failed to queue webhook deliveries"
            );
        }
    }
}
