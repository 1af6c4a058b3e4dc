use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_core::{AppResult, TeamId};
use keyward_domain::{DeliveryOutcome, Webhook, WebhookDelivery, WebhookEvent, WebhookId};
use serde_json::Value;
use uuid::Uuid;

/// Repository port for webhook subscriptions and their delivery queue.
#[async_trait]
pub trait WebhookRepository: Send + Sync {
    /// Saves a webhook subscription.
    async fn save_webhook(&self, webhook: Webhook) -> AppResult<()>;

    /// Lists a team's webhook subscriptions.
    async fn list_webhooks(&self, team_id: TeamId) -> AppResult<Vec<Webhook>>;

    /// Finds a webhook by identifier across teams.
    async fn find_webhook(&self, webhook_id: WebhookId) -> AppResult<Option<Webhook>>;

    /// Deletes a webhook and its queued deliveries.
    async fn delete_webhook(&self, team_id: TeamId, webhook_id: WebhookId) -> AppResult<()>;

    /// Queues new deliveries.
    async fn enqueue_deliveries(&self, deliveries: Vec<WebhookDelivery>) -> AppResult<()>;

    /// Returns pending deliveries, oldest first.
    async fn list_pending_deliveries(&self, limit: usize) -> AppResult<Vec<WebhookDelivery>>;

    /// Persists the bookkeeping of a delivery after an attempt.
    async fn save_delivery(&self, delivery: &WebhookDelivery) -> AppResult<()>;
}

/// One outbound webhook call.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookDispatchRequest {
    /// Delivery identifier, stable across attempts.
    pub delivery_id: Uuid,
    /// Endpoint URL.
    pub url: String,
    /// Signing secret.
    pub secret: String,
    /// Delivered event.
    pub event: WebhookEvent,
    /// Event payload.
    pub payload: Value,
    /// Enqueue instant of the delivery.
    pub created_at: DateTime<Utc>,
}

/// Port for outbound webhook delivery.
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    /// Makes exactly one delivery attempt and reports its outcome.
    async fn dispatch(&self, request: WebhookDispatchRequest) -> DeliveryOutcome;
}
