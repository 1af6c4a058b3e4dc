use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use keyward_core::{AppError, AppResult, TeamId};
use keyward_domain::{
    DeliveryOutcome, License, LicenseId, LicenseKey, Webhook, WebhookDelivery,
    WebhookDeliveryStatus, WebhookId,
};

use crate::license_ports::{
    AuditEvent, AuditRepository, LicenseFilter, LicenseRepository, WebhookDispatchRequest,
    WebhookDispatcher, WebhookRepository,
};

pub(crate) fn at(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(|_| unreachable!())
}

#[derive(Default)]
pub(crate) struct FakeLicenseRepository {
    pub(crate) licenses: Mutex<HashMap<LicenseId, License>>,
}

impl FakeLicenseRepository {
    async fn swap_license(&self, mut license: License) -> AppResult<License> {
        let mut licenses = self.licenses.lock().await;
        let Some(stored) = licenses
            .get_mut(&license.id())
            .filter(|stored| stored.team_id() == license.team_id())
        else {
            return Err(AppError::NotFound("license".to_owned()));
        };
        if stored.revision() != license.revision() {
            return Err(AppError::Conflict("license revision is stale".to_owned()));
        }

        license.advance_revision();
        *stored = license.clone();
        Ok(license)
    }
}

#[async_trait]
impl LicenseRepository for FakeLicenseRepository {
    async fn create_license(&self, license: License) -> AppResult<()> {
        let mut licenses = self.licenses.lock().await;
        if licenses.values().any(|stored| {
            stored.team_id() == license.team_id() && stored.key() == license.key()
        }) {
            return Err(AppError::Conflict("license key already exists".to_owned()));
        }

        licenses.insert(license.id(), license);
        Ok(())
    }

    async fn save_license(&self, license: License) -> AppResult<License> {
        self.swap_license(license).await
    }

    async fn record_activity(&self, license: License) -> AppResult<License> {
        self.swap_license(license).await
    }

    async fn find_license(
        &self,
        team_id: TeamId,
        license_id: LicenseId,
    ) -> AppResult<Option<License>> {
        Ok(self
            .licenses
            .lock()
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
        Ok(self
            .licenses
            .lock()
            .await
            .values()
            .find(|license| license.team_id() == team_id && license.key() == key)
            .cloned())
    }

    async fn list_licenses(
        &self,
        team_id: TeamId,
        filter: LicenseFilter,
    ) -> AppResult<Vec<License>> {
        let mut listed: Vec<License> = self
            .licenses
            .lock()
            .await
            .values()
            .filter(|license| license.team_id() == team_id)
            .filter(|license| {
                filter
                    .product_id
                    .as_deref()
                    .is_none_or(|product_id| license.covers_product(product_id))
            })
            .filter(|license| {
                filter
                    .customer_id
                    .as_deref()
                    .is_none_or(|customer_id| license.belongs_to_customer(customer_id))
            })
            .cloned()
            .collect();
        listed.sort_by_key(|license| std::cmp::Reverse(license.created_at()));
        Ok(listed)
    }

    async fn delete_license(&self, team_id: TeamId, license_id: LicenseId) -> AppResult<()> {
        let mut licenses = self.licenses.lock().await;
        match licenses.get(&license_id) {
            Some(license) if license.team_id() == team_id => {
                licenses.remove(&license_id);
                Ok(())
            }
            _ => Err(AppError::NotFound("license".to_owned())),
        }
    }

    async fn list_licenses_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<License>> {
        let mut listed: Vec<License> = self
            .licenses
            .lock()
            .await
            .values()
            .filter(|license| {
                license.settings().expiration.expiration_type.can_expire()
                    && license
                        .expires_at()
                        .is_some_and(|expires_at| expires_at <= cutoff)
            })
            .cloned()
            .collect();
        listed.sort_by_key(License::expires_at);
        listed.truncate(limit);
        Ok(listed)
    }
}

#[derive(Default)]
pub(crate) struct FakeAuditRepository {
    pub(crate) events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditRepository for FakeAuditRepository {
    async fn append_event(&self, event: AuditEvent) -> AppResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeWebhookRepository {
    pub(crate) webhooks: Mutex<Vec<Webhook>>,
    pub(crate) deliveries: Mutex<Vec<WebhookDelivery>>,
    /// Webhooks whose lookup fails as if storage were down.
    pub(crate) unreadable: Mutex<Vec<WebhookId>>,
}

#[async_trait]
impl WebhookRepository for FakeWebhookRepository {
    async fn save_webhook(&self, webhook: Webhook) -> AppResult<()> {
        let mut webhooks = self.webhooks.lock().await;
        webhooks.retain(|stored| stored.id() != webhook.id());
        webhooks.push(webhook);
        Ok(())
    }

    async fn list_webhooks(&self, team_id: TeamId) -> AppResult<Vec<Webhook>> {
        Ok(self
            .webhooks
            .lock()
            .await
            .iter()
            .filter(|webhook| webhook.team_id() == team_id)
            .cloned()
            .collect())
    }

    async fn find_webhook(&self, webhook_id: WebhookId) -> AppResult<Option<Webhook>> {
        if self.unreadable.lock().await.contains(&webhook_id) {
            return Err(AppError::Internal("webhook storage unavailable".to_owned()));
        }

        Ok(self
            .webhooks
            .lock()
            .await
            .iter()
            .find(|webhook| webhook.id() == webhook_id)
            .cloned())
    }

    async fn delete_webhook(&self, team_id: TeamId, webhook_id: WebhookId) -> AppResult<()> {
        let mut webhooks = self.webhooks.lock().await;
        let before = webhooks.len();
        webhooks.retain(|webhook| !(webhook.id() == webhook_id && webhook.team_id() == team_id));
        if webhooks.len() == before {
            return Err(AppError::NotFound("webhook".to_owned()));
        }

        self.deliveries
            .lock()
            .await
            .retain(|delivery| delivery.webhook_id != webhook_id);
        Ok(())
    }

    async fn enqueue_deliveries(&self, deliveries: Vec<WebhookDelivery>) -> AppResult<()> {
        self.deliveries.lock().await.extend(deliveries);
        Ok(())
    }

    async fn list_pending_deliveries(&self, limit: usize) -> AppResult<Vec<WebhookDelivery>> {
        Ok(self
            .deliveries
            .lock()
            .await
            .iter()
            .filter(|delivery| delivery.status == WebhookDeliveryStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_delivery(&self, delivery: &WebhookDelivery) -> AppResult<()> {
        let mut deliveries = self.deliveries.lock().await;
        match deliveries.iter_mut().find(|stored| stored.id == delivery.id) {
            Some(stored) => {
                *stored = delivery.clone();
                Ok(())
            }
            None => Err(AppError::NotFound("webhook delivery".to_owned())),
        }
    }
}

/// Dispatcher that replays scripted outcomes and succeeds once they run out.
#[derive(Default)]
pub(crate) struct ScriptedDispatcher {
    pub(crate) outcomes: Mutex<VecDeque<DeliveryOutcome>>,
    pub(crate) requests: Mutex<Vec<WebhookDispatchRequest>>,
}

impl ScriptedDispatcher {
    pub(crate) fn failing(times: usize) -> Self {
        let outcomes = (0..times)
            .map(|_| DeliveryOutcome::Rejected {
                status_code: Some(502),
                error: "bad gateway".to_owned(),
            })
            .collect();

        Self {
            outcomes: Mutex::new(outcomes),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl WebhookDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, request: WebhookDispatchRequest) -> DeliveryOutcome {
        self.requests.lock().await.push(request);
        self.outcomes
            .lock()
            .await
            .pop_front()
            .unwrap_or(DeliveryOutcome::Delivered { status_code: 200 })
    }
}
