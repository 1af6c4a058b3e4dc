use async_trait::async_trait;
use keyward_application::WebhookRepository;
use keyward_core::{AppError, AppResult, TeamId};
use keyward_domain::{Webhook, WebhookDelivery, WebhookDeliveryStatus, WebhookId};
use tokio::sync::RwLock;

/// In-memory webhook repository with an insertion-ordered delivery queue.
#[derive(Debug, Default)]
pub struct InMemoryWebhookRepository {
    webhooks: RwLock<Vec<Webhook>>,
    deliveries: RwLock<Vec<WebhookDelivery>>,
}

impl InMemoryWebhookRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookRepository for InMemoryWebhookRepository {
    async fn save_webhook(&self, webhook: Webhook) -> AppResult<()> {
        let mut webhooks = self.webhooks.write().await;
        match webhooks.iter_mut().find(|stored| stored.id() == webhook.id()) {
            Some(stored) => *stored = webhook,
            None => webhooks.push(webhook),
        }

        Ok(())
    }

    async fn list_webhooks(&self, team_id: TeamId) -> AppResult<Vec<Webhook>> {
        Ok(self
            .webhooks
            .read()
            .await
            .iter()
            .filter(|webhook| webhook.team_id() == team_id)
            .cloned()
            .collect())
    }

    async fn find_webhook(&self, webhook_id: WebhookId) -> AppResult<Option<Webhook>> {
        Ok(self
            .webhooks
            .read()
            .await
            .iter()
            .find(|webhook| webhook.id() == webhook_id)
            .cloned())
    }

    async fn delete_webhook(&self, team_id: TeamId, webhook_id: WebhookId) -> AppResult<()> {
        let mut webhooks = self.webhooks.write().await;
        let Some(position) = webhooks
            .iter()
            .position(|webhook| webhook.id() == webhook_id && webhook.team_id() == team_id)
        else {
            return Err(AppError::NotFound(format!(
                "webhook '{webhook_id}' does not exist"
            )));
        };

        webhooks.remove(position);
        self.deliveries
            .write()
            .await
            .retain(|delivery| delivery.webhook_id != webhook_id);
        Ok(())
    }

    async fn enqueue_deliveries(&self, deliveries: Vec<WebhookDelivery>) -> AppResult<()> {
        self.deliveries.write().await.extend(deliveries);
        Ok(())
    }

    async fn list_pending_deliveries(&self, limit: usize) -> AppResult<Vec<WebhookDelivery>> {
        Ok(self
            .deliveries
            .read()
            .await
            .iter()
            .filter(|delivery| delivery.status == WebhookDeliveryStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_delivery(&self, delivery: &WebhookDelivery) -> AppResult<()> {
        let mut deliveries = self.deliveries.write().await;
        let Some(stored) = deliveries.iter_mut().find(|stored| stored.id == delivery.id) else {
            return Err(AppError::NotFound(format!(
                "webhook delivery '{}' does not exist",
                delivery.id
            )));
        };

        *stored = delivery.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use keyward_application::WebhookRepository;
    use keyward_core::TeamId;
    use keyward_domain::{
        DeliveryOutcome, Webhook, WebhookDelivery, WebhookDeliveryStatus, WebhookEvent, WebhookId,
    };
    use serde_json::json;

    use super::InMemoryWebhookRepository;

    fn webhook(team_id: TeamId) -> Webhook {
        Webhook::new(
            WebhookId::new(),
            team_id,
            "https://hooks.example.com/keyward",
            "whsec_0123456789abcdef",
            vec![WebhookEvent::LicenseCreated],
            true,
        )
        .unwrap_or_else(|_| unreachable!())
    }

    #[tokio::test]
    async fn pending_queue_excludes_finished_deliveries() {
        let repository = InMemoryWebhookRepository::new();
        let webhook = webhook(TeamId::new());
        assert!(repository.save_webhook(webhook.clone()).await.is_ok());

        let now = DateTime::<Utc>::UNIX_EPOCH;
        let first = WebhookDelivery::pending(&webhook, WebhookEvent::LicenseCreated, json!({}), now);
        let second =
            WebhookDelivery::pending(&webhook, WebhookEvent::LicenseCreated, json!({}), now);
        assert!(
            repository
                .enqueue_deliveries(vec![first.clone(), second.clone()])
                .await
                .is_ok()
        );

        let mut delivered = first.clone();
        delivered.record_attempt(DeliveryOutcome::Delivered { status_code: 204 }, now, 3);
        assert!(repository.save_delivery(&delivered).await.is_ok());

        let pending = repository
            .list_pending_deliveries(10)
            .await
            .unwrap_or_default();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[0].status, WebhookDeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn delete_is_team_scoped_and_drops_deliveries() {
        let repository = InMemoryWebhookRepository::new();
        let team_id = TeamId::new();
        let webhook = webhook(team_id);
        assert!(repository.save_webhook(webhook.clone()).await.is_ok());
        let delivery = WebhookDelivery::pending(
            &webhook,
            WebhookEvent::LicenseCreated,
            json!({}),
            DateTime::<Utc>::UNIX_EPOCH,
        );
        assert!(repository.enqueue_deliveries(vec![delivery]).await.is_ok());

        assert!(
            repository
                .delete_webhook(TeamId::new(), webhook.id())
                .await
                .is_err()
        );
        assert!(repository.delete_webhook(team_id, webhook.id()).await.is_ok());
        assert!(
            repository
                .list_pending_deliveries(10)
                .await
                .unwrap_or_default()
                .is_empty()
        );
        assert!(
            repository
                .find_webhook(webhook.id())
                .await
                .unwrap_or_default()
                .is_none()
        );
    }
}
