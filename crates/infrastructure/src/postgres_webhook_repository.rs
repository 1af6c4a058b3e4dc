use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_application::WebhookRepository;
use keyward_core::{AppError, AppResult, TeamId};
use keyward_domain::{Webhook, WebhookDelivery, WebhookDeliveryStatus, WebhookEvent, WebhookId};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::postgres_license_repository::ensure_team;

/// PostgreSQL-backed webhook subscriptions and delivery queue.
#[derive(Clone)]
pub struct PostgresWebhookRepository {
    pool: PgPool,
}

impl PostgresWebhookRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct WebhookRow {
    id: Uuid,
    team_id: Uuid,
    url: String,
    secret: String,
    events: Vec<String>,
    enabled: bool,
}

impl WebhookRow {
    fn into_webhook(self) -> AppResult<Webhook> {
        let events = self
            .events
            .iter()
            .map(|event| WebhookEvent::from_str(event))
            .collect::<AppResult<Vec<_>>>()?;

        Webhook::new(
            WebhookId::from_uuid(self.id),
            TeamId::from_uuid(self.team_id),
            self.url.as_str(),
            self.secret,
            events,
            self.enabled,
        )
    }
}

#[derive(Debug, FromRow)]
struct DeliveryRow {
    id: Uuid,
    webhook_id: Uuid,
    team_id: Uuid,
    event: String,
    payload: Value,
    status: String,
    attempts: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    last_response_status: Option<i32>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl DeliveryRow {
    fn into_delivery(self) -> AppResult<WebhookDelivery> {
        Ok(WebhookDelivery {
            id: self.id,
            webhook_id: WebhookId::from_uuid(self.webhook_id),
            team_id: TeamId::from_uuid(self.team_id),
            event: WebhookEvent::from_str(self.event.as_str())?,
            payload: self.payload,
            status: WebhookDeliveryStatus::from_str(self.status.as_str())?,
            attempts: u32::try_from(self.attempts).unwrap_or_default(),
            last_attempt_at: self.last_attempt_at,
            last_response_status: self
                .last_response_status
                .and_then(|status| u16::try_from(status).ok()),
            last_error: self.last_error,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl WebhookRepository for PostgresWebhookRepository {
    async fn save_webhook(&self, webhook: Webhook) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin transaction: {error}"))
        })?;

        ensure_team(&mut transaction, webhook.team_id()).await?;

        let events: Vec<String> = webhook
            .events()
            .iter()
            .map(|event| event.as_str().to_owned())
            .collect();
        sqlx::query(
            r#"
            INSERT INTO webhooks (id, team_id, url, secret, events, enabled)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET
                url = EXCLUDED.url,
                secret = EXCLUDED.secret,
                events = EXCLUDED.events,
                enabled = EXCLUDED.enabled
            WHERE webhooks.team_id = EXCLUDED.team_id
            "#,
        )
        .bind(webhook.id().as_uuid())
        .bind(webhook.team_id().as_uuid())
        .bind(webhook.url().as_str())
        .bind(webhook.secret())
        .bind(events)
        .bind(webhook.enabled())
        .execute(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to save webhook: {error}")))?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        Ok(())
    }

    async fn list_webhooks(&self, team_id: TeamId) -> AppResult<Vec<Webhook>> {
        sqlx::query_as::<_, WebhookRow>(
            r#"
            SELECT id, team_id, url, secret, events, enabled
            FROM webhooks
            WHERE team_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(team_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list webhooks: {error}")))?
        .into_iter()
        .map(WebhookRow::into_webhook)
        .collect()
    }

    async fn find_webhook(&self, webhook_id: WebhookId) -> AppResult<Option<Webhook>> {
        sqlx::query_as::<_, WebhookRow>(
            r#"
            SELECT id, team_id, url, secret, events, enabled
            FROM webhooks
            WHERE id = $1
            "#,
        )
        .bind(webhook_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find webhook: {error}")))?
        .map(WebhookRow::into_webhook)
        .transpose()
    }

    async fn delete_webhook(&self, team_id: TeamId, webhook_id: WebhookId) -> AppResult<()> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM webhooks
            WHERE team_id = $1 AND id = $2
            "#,
        )
        .bind(team_id.as_uuid())
        .bind(webhook_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to delete webhook: {error}")))?;

        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "webhook '{webhook_id}' does not exist"
            )));
        }

        Ok(())
    }

    async fn enqueue_deliveries(&self, deliveries: Vec<WebhookDelivery>) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin transaction: {error}"))
        })?;

        for delivery in deliveries {
            sqlx::query(
                r#"
                INSERT INTO webhook_deliveries (
                    id,
                    webhook_id,
                    team_id,
                    event,
                    payload,
                    status,
                    attempts,
                    created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(delivery.id)
            .bind(delivery.webhook_id.as_uuid())
            .bind(delivery.team_id.as_uuid())
            .bind(delivery.event.as_str())
            .bind(delivery.payload)
            .bind(delivery.status.as_str())
            .bind(i32::try_from(delivery.attempts).unwrap_or(i32::MAX))
            .bind(delivery.created_at)
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to enqueue webhook delivery: {error}"))
            })?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit transaction: {error}"))
        })?;

        Ok(())
    }

    async fn list_pending_deliveries(&self, limit: usize) -> AppResult<Vec<WebhookDelivery>> {
        sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT
                id,
                webhook_id,
                team_id,
                event,
                payload,
                status,
                attempts,
                last_attempt_at,
                last_response_status,
                last_error,
                created_at
            FROM webhook_deliveries
            WHERE status = 'pending'
            ORDER BY created_at, id
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list pending webhook deliveries: {error}"))
        })?
        .into_iter()
        .map(DeliveryRow::into_delivery)
        .collect()
    }

    async fn save_delivery(&self, delivery: &WebhookDelivery) -> AppResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET
                status = $2,
                attempts = $3,
                last_attempt_at = $4,
                last_response_status = $5,
                last_error = $6
            WHERE id = $1
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.status.as_str())
        .bind(i32::try_from(delivery.attempts).unwrap_or(i32::MAX))
        .bind(delivery.last_attempt_at)
        .bind(delivery.last_response_status.map(i32::from))
        .bind(delivery.last_error.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to save webhook delivery: {error}"))
        })?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "webhook delivery '{}' does not exist",
                delivery.id
            )));
        }

        Ok(())
    }
}
