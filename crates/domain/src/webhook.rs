//! Webhook subscriptions and delivery bookkeeping.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use keyward_core::{AppError, AppResult, NonEmptyString, TeamId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

/// Minimum length of a webhook signing secret.
pub const WEBHOOK_SECRET_MIN_LENGTH: usize = 16;

/// Unique identifier for a webhook subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(Uuid);

impl WebhookId {
    /// Creates a new random webhook identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a webhook identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for WebhookId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// License lifecycle events a webhook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEvent {
    /// A license was issued.
    #[serde(rename = "license.created")]
    LicenseCreated,
    /// License settings changed.
    #[serde(rename = "license.updated")]
    LicenseUpdated,
    /// A license was suspended.
    #[serde(rename = "license.suspended")]
    LicenseSuspended,
    /// A suspended license was reinstated.
    #[serde(rename = "license.reinstated")]
    LicenseReinstated,
    /// A license was validated for the first time.
    #[serde(rename = "license.activated")]
    LicenseActivated,
    /// A license was deleted by the team.
    #[serde(rename = "license.deleted")]
    LicenseDeleted,
}

impl WebhookEvent {
    /// Returns a stable storage and header value for this event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LicenseCreated => "license.created",
            Self::LicenseUpdated => "license.updated",
            Self::LicenseSuspended => "license.suspended",
            Self::LicenseReinstated => "license.reinstated",
            Self::LicenseActivated => "license.activated",
            Self::LicenseDeleted => "license.deleted",
        }
    }
}

impl FromStr for WebhookEvent {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "license.created" => Ok(Self::LicenseCreated),
            "license.updated" => Ok(Self::LicenseUpdated),
            "license.suspended" => Ok(Self::LicenseSuspended),
            "license.reinstated" => Ok(Self::LicenseReinstated),
            "license.activated" => Ok(Self::LicenseActivated),
            "license.deleted" => Ok(Self::LicenseDeleted),
            _ => Err(AppError::Validation(format!(
                "unknown webhook event '{value}'"
            ))),
        }
    }
}

/// A team's webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
    id: WebhookId,
    team_id: TeamId,
    url: Url,
    secret: NonEmptyString,
    events: Vec<WebhookEvent>,
    enabled: bool,
}

impl Webhook {
    /// Creates a validated webhook subscription.
    pub fn new(
        id: WebhookId,
        team_id: TeamId,
        url: &str,
        secret: impl Into<String>,
        events: Vec<WebhookEvent>,
        enabled: bool,
    ) -> AppResult<Self> {
        let url = Url::parse(url.trim())
            .map_err(|error| AppError::Validation(format!("invalid webhook url: {error}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Validation(
                "webhook url must use http or https".to_owned(),
            ));
        }

        let secret = NonEmptyString::new(secret)?;
        if secret.as_str().len() < WEBHOOK_SECRET_MIN_LENGTH {
            return Err(AppError::Validation(format!(
                "webhook secret must be at least {WEBHOOK_SECRET_MIN_LENGTH} characters"
            )));
        }

        let mut events = events;
        events.sort_by_key(WebhookEvent::as_str);
        events.dedup();
        if events.is_empty() {
            return Err(AppError::Validation(
                "webhook must subscribe to at least one event".to_owned(),
            ));
        }

        Ok(Self {
            id,
            team_id,
            url,
            secret,
            events,
            enabled,
        })
    }

    /// Returns whether an event should produce a delivery for this webhook.
    #[must_use]
    pub fn subscribes_to(&self, event: WebhookEvent) -> bool {
        self.enabled && self.events.contains(&event)
    }

    /// Returns the webhook identifier.
    #[must_use]
    pub fn id(&self) -> WebhookId {
        self.id
    }

    /// Returns the owning team.
    #[must_use]
    pub fn team_id(&self) -> TeamId {
        self.team_id
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the shared signing secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        self.secret.as_str()
    }

    /// Returns subscribed events.
    #[must_use]
    pub fn events(&self) -> &[WebhookEvent] {
        &self.events
    }

    /// Returns whether the webhook is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Delivery state of one webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDeliveryStatus {
    /// Waiting for its next attempt.
    Pending,
    /// Accepted by the endpoint.
    Delivered,
    /// Gave up after the maximum number of attempts.
    Failed,
}

impl WebhookDeliveryStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for WebhookDeliveryStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!(
                "unknown webhook delivery status '{value}'"
            ))),
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint answered with a success status.
    Delivered {
        /// HTTP status returned by the endpoint.
        status_code: u16,
    },
    /// The attempt failed at transport level or with a non-success status.
    Rejected {
        /// HTTP status, absent for transport errors.
        status_code: Option<u16>,
        /// Short error description.
        error: String,
    },
}

/// One event queued for one webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookDelivery {
    /// Delivery identifier, sent to the endpoint for idempotency.
    pub id: Uuid,
    /// Target webhook.
    pub webhook_id: WebhookId,
    /// Owning team.
    pub team_id: TeamId,
    /// Delivered event.
    pub event: WebhookEvent,
    /// JSON payload of the event.
    pub payload: Value,
    /// Current delivery state.
    pub status: WebhookDeliveryStatus,
    /// Attempts made so far.
    pub attempts: u32,
    /// Most recent attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// HTTP status of the most recent attempt.
    pub last_response_status: Option<u16>,
    /// Error of the most recent failed attempt.
    pub last_error: Option<String>,
    /// Enqueue instant.
    pub created_at: DateTime<Utc>,
}

impl WebhookDelivery {
    /// Creates a pending delivery of `event` to `webhook`.
    #[must_use]
    pub fn pending(
        webhook: &Webhook,
        event: WebhookEvent,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            webhook_id: webhook.id(),
            team_id: webhook.team_id(),
            event,
            payload,
            status: WebhookDeliveryStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            last_response_status: None,
            last_error: None,
            created_at: now,
        }
    }

    /// Records one attempt.
    ///
    /// A failed attempt keeps the delivery pending until `max_attempts`
    /// attempts have been made, then marks it failed.
    pub fn record_attempt(
        &mut self,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(now);

        match outcome {
            DeliveryOutcome::Delivered { status_code } => {
                self.status = WebhookDeliveryStatus::Delivered;
                self.last_response_status = Some(status_code);
                self.last_error = None;
            }
            DeliveryOutcome::Rejected { status_code, error } => {
                self.last_response_status = status_code;
                self.last_error = Some(error);
                self.status = if self.attempts >= max_attempts.max(1) {
                    WebhookDeliveryStatus::Failed
                } else {
                    WebhookDeliveryStatus::Pending
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use keyward_core::TeamId;
    use serde_json::json;

    use super::{
        DeliveryOutcome, Webhook, WebhookDelivery, WebhookDeliveryStatus, WebhookEvent, WebhookId,
    };

    fn webhook(events: Vec<WebhookEvent>) -> Webhook {
        Webhook::new(
            WebhookId::new(),
            TeamId::new(),
            "https://hooks.example.com/keyward",
            "0123456789abcdef",
            events,
            true,
        )
        .unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn webhook_requires_http_url_and_events() {
        let team_id = TeamId::new();
        let secret = "0123456789abcdef";

        assert!(
            Webhook::new(
                WebhookId::new(),
                team_id,
                "ftp://example.com",
                secret,
                vec![WebhookEvent::LicenseCreated],
                true
            )
            .is_err()
        );
        assert!(
            Webhook::new(
                WebhookId::new(),
                team_id,
                "https://example.com",
                secret,
                Vec::new(),
                true
            )
            .is_err()
        );
        assert!(
            Webhook::new(
                WebhookId::new(),
                team_id,
                "https://example.com",
                "short",
                vec![WebhookEvent::LicenseCreated],
                true
            )
            .is_err()
        );
    }

    #[test]
    fn subscription_filters_by_event() {
        let webhook = webhook(vec![WebhookEvent::LicenseCreated, WebhookEvent::LicenseCreated]);

        assert_eq!(webhook.events().len(), 1);
        assert!(webhook.subscribes_to(WebhookEvent::LicenseCreated));
        assert!(!webhook.subscribes_to(WebhookEvent::LicenseDeleted));
    }

    #[test]
    fn delivery_fails_exactly_at_max_attempts() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        let webhook = webhook(vec![WebhookEvent::LicenseCreated]);
        let mut delivery =
            WebhookDelivery::pending(&webhook, WebhookEvent::LicenseCreated, json!({}), now);

        for _ in 0..2 {
            delivery.record_attempt(
                DeliveryOutcome::Rejected {
                    status_code: Some(500),
                    error: "upstream error".to_owned(),
                },
                now,
                3,
            );
            assert_eq!(delivery.status, WebhookDeliveryStatus::Pending);
        }

        delivery.record_attempt(
            DeliveryOutcome::Rejected {
                status_code: None,
                error: "connection refused".to_owned(),
            },
            now,
            3,
        );
        assert_eq!(delivery.status, WebhookDeliveryStatus::Failed);
        assert_eq!(delivery.attempts, 3);
        assert_eq!(delivery.last_response_status, None);
    }

    #[test]
    fn successful_attempt_clears_previous_error() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        let webhook = webhook(vec![WebhookEvent::LicenseUpdated]);
        let mut delivery =
            WebhookDelivery::pending(&webhook, WebhookEvent::LicenseUpdated, json!({}), now);

        delivery.record_attempt(
            DeliveryOutcome::Rejected {
                status_code: Some(503),
                error: "unavailable".to_owned(),
            },
            now,
            5,
        );
        delivery.record_attempt(DeliveryOutcome::Delivered { status_code: 204 }, now, 5);

        assert_eq!(delivery.status, WebhookDeliveryStatus::Delivered);
        assert_eq!(delivery.last_error, None);
        assert_eq!(delivery.last_response_status, Some(204));
    }
}
