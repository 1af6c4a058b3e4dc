//! Webhook subscriptions and delivery attempts.
//!
//! Deliveries are attempted one at a time from the worker loop. There is no
//! backoff schedule: a failed delivery stays pending and is picked up again on
//! the next pass until it reaches the configured attempt limit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyward_core::{Actor, AppError, AppResult, TeamId};
use keyward_domain::{
    AuditAction, Webhook, WebhookDelivery, WebhookDeliveryStatus, WebhookEvent, WebhookId,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::license_ports::{
    AuditEvent, AuditRepository, WebhookDispatchRequest, WebhookDispatcher, WebhookRepository,
};

/// Default number of attempts before a delivery is marked failed.
pub const DEFAULT_WEBHOOK_MAX_ATTEMPTS: u32 = 5;

/// Input payload for webhook registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterWebhookInput {
    /// Endpoint URL.
    pub url: String,
    /// Shared signing secret.
    pub secret: String,
    /// Subscribed events.
    pub events: Vec<WebhookEvent>,
    /// Enabled flag.
    pub enabled: bool,
}

/// Counters for one delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    /// Deliveries accepted by their endpoint.
    pub delivered: u32,
    /// Deliveries that reached the attempt limit or lost their webhook.
    pub failed: u32,
    /// Deliveries that failed and remain pending.
    pub retrying: u32,
    /// Deliveries left untouched after a storage error; they stay pending.
    pub skipped: u32,
}

/// Application service for webhook subscriptions and deliveries.
#[derive(Clone)]
pub struct WebhookService {
    repository: Arc<dyn WebhookRepository>,
    dispatcher: Arc<dyn WebhookDispatcher>,
    audit_repository: Arc<dyn AuditRepository>,
    max_attempts: u32,
}

impl WebhookService {
    /// Creates a new webhook service.
    #[must_use]
    pub fn new(
        repository: Arc<dyn WebhookRepository>,
        dispatcher: Arc<dyn WebhookDispatcher>,
        audit_repository: Arc<dyn AuditRepository>,
        max_attempts: u32,
    ) -> Self {
        Self {
            repository,
            dispatcher,
            audit_repository,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Registers a webhook endpoint for the actor's team.
    pub async fn register_webhook(
        &self,
        actor: &Actor,
        input: RegisterWebhookInput,
    ) -> AppResult<Webhook> {
        let webhook = Webhook::new(
            WebhookId::new(),
            actor.team_id(),
            input.url.as_str(),
            input.secret,
            input.events,
            input.enabled,
        )?;

        self.repository.save_webhook(webhook.clone()).await?;

        self.audit_repository
            .append_event(AuditEvent {
                team_id: actor.team_id(),
                subject: actor.subject().to_owned(),
                action: AuditAction::WebhookCreated,
                resource_type: "webhook".to_owned(),
                resource_id: webhook.id().to_string(),
                detail: Some(format!("registered webhook for '{}'", webhook.url())),
            })
            .await?;

        Ok(webhook)
    }

    /// Lists the actor's team webhooks.
    pub async fn list_webhooks(&self, actor: &Actor) -> AppResult<Vec<Webhook>> {
        self.repository.list_webhooks(actor.team_id()).await
    }

    /// Deletes a webhook of the actor's team.
    pub async fn delete_webhook(&self, actor: &Actor, webhook_id: WebhookId) -> AppResult<()> {
        self.repository
            .delete_webhook(actor.team_id(), webhook_id)
            .await?;

        self.audit_repository
            .append_event(AuditEvent {
                team_id: actor.team_id(),
                subject: actor.subject().to_owned(),
                action: AuditAction::WebhookDeleted,
                resource_type: "webhook".to_owned(),
                resource_id: webhook_id.to_string(),
                detail: None,
            })
            .await
    }

    /// Queues one delivery per enabled team webhook subscribed to `event`.
    pub async fn enqueue(
        &self,
        team_id: TeamId,
        event: WebhookEvent,
        payload: Value,
        now: DateTime<Utc>,
    ) -> AppResult<usize> {
        let deliveries: Vec<WebhookDelivery> = self
            .repository
            .list_webhooks(team_id)
            .await?
            .iter()
            .filter(|webhook| webhook.subscribes_to(event))
            .map(|webhook| WebhookDelivery::pending(webhook, event, payload.clone(), now))
            .collect();

        let queued = deliveries.len();
        if queued > 0 {
            self.repository.enqueue_deliveries(deliveries).await?;
            debug!(team_id = %team_id, event = event.as_str(), queued, "queued webhook deliveries");
        }

        Ok(queued)
    }

    /// Attempts every pending delivery once, up to `limit` deliveries.
    pub async fn deliver_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> AppResult<DeliverySummary> {
        if limit == 0 {
            return Err(AppError::Validation(
                "delivery batch limit must be greater than zero".to_owned(),
            ));
        }

        let mut summary = DeliverySummary::default();
        for delivery in self.repository.list_pending_deliveries(limit).await? {
            let delivery_id = delivery.id;
            let status = match self.attempt(delivery, now).await {
                Ok(status) => status,
                Err(error) => {
                    warn!(%delivery_id, %error, "skipping webhook delivery after storage error");
                    summary.skipped = summary.skipped.saturating_add(1);
                    continue;
                }
            };

            match status {
                WebhookDeliveryStatus::Delivered => {
                    summary.delivered = summary.delivered.saturating_add(1);
                }
                WebhookDeliveryStatus::Failed => {
                    summary.failed = summary.failed.saturating_add(1);
                }
                WebhookDeliveryStatus::Pending => {
                    summary.retrying = summary.retrying.saturating_add(1);
                }
            }
        }

        if summary != DeliverySummary::default() {
            info!(
                delivered = summary.delivered,
                failed = summary.failed,
                retrying = summary.retrying,
                skipped = summary.skipped,
                "webhook delivery pass finished"
            );
        }

        Ok(summary)
    }

    async fn attempt(
        &self,
        mut delivery: WebhookDelivery,
        now: DateTime<Utc>,
    ) -> AppResult<WebhookDeliveryStatus> {
        let webhook = self
            .repository
            .find_webhook(delivery.webhook_id)
            .await?
            .filter(Webhook::enabled);

        let Some(webhook) = webhook else {
            delivery.status = WebhookDeliveryStatus::Failed;
            delivery.last_error = Some("webhook was removed or disabled".to_owned());
            self.repository.save_delivery(&delivery).await?;
            return Ok(delivery.status);
        };

        let outcome = self
            .dispatcher
            .dispatch(WebhookDispatchRequest {
                delivery_id: delivery.id,
                url: webhook.url().to_string(),
                secret: webhook.secret().to_owned(),
                event: delivery.event,
                payload: delivery.payload.clone(),
                created_at: delivery.created_at,
            })
            .await;

        delivery.record_attempt(outcome, now, self.max_attempts);
        self.repository.save_delivery(&delivery).await?;

        if delivery.status == WebhookDeliveryStatus::Failed {
            warn!(
                delivery_id = %delivery.id,
                webhook_id = %delivery.webhook_id,
                attempts = delivery.attempts,
                error = delivery.last_error.as_deref().unwrap_or_default(),
                "webhook delivery gave up"
            );
        }

        Ok(delivery.status)
    }
}
