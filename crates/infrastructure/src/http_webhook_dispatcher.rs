use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use keyward_application::{WebhookDispatchRequest, WebhookDispatcher};
use keyward_core::{AppError, AppResult};
use keyward_domain::DeliveryOutcome;
use reqwest::header::CONTENT_TYPE;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivered event name.
pub const EVENT_HEADER: &str = "X-Keyward-Event";

/// Header carrying the delivery identifier, stable across attempts.
pub const DELIVERY_HEADER: &str = "X-Keyward-Delivery";

/// Header carrying the `sha256=<hex>` HMAC of the request body.
pub const SIGNATURE_HEADER: &str = "X-Keyward-Signature";

/// Computes the signature header value for a request body.
pub fn sign_payload(secret: &str, body: &[u8]) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|error| AppError::Internal(format!("invalid webhook signing key: {error}")))?;
    mac.update(body);

    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// HTTP-based webhook dispatcher making one signed POST per attempt.
pub struct HttpWebhookDispatcher {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpWebhookDispatcher {
    /// Creates a new webhook dispatcher.
    #[must_use]
    pub fn new(http_client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http_client,
            timeout,
        }
    }

    fn encode_body(request: &WebhookDispatchRequest) -> AppResult<Vec<u8>> {
        serde_json::to_vec(&serde_json::json!({
            "event": request.event.as_str(),
            "delivery_id": request.delivery_id,
            "payload": request.payload,
            "created_at": request.created_at.to_rfc3339(),
        }))
        .map_err(|error| AppError::Internal(format!("failed to encode webhook body: {error}")))
    }
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookDispatcher {
    async fn dispatch(&self, request: WebhookDispatchRequest) -> DeliveryOutcome {
        let signed = Self::encode_body(&request).and_then(|body| {
            let signature = sign_payload(request.secret.as_str(), &body)?;
            Ok((body, signature))
        });
        let (body, signature) = match signed {
            Ok(signed) => signed,
            Err(error) => {
                return DeliveryOutcome::Rejected {
                    status_code: None,
                    error: error.to_string(),
                };
            }
        };

        let response = self
            .http_client
            .post(request.url.as_str())
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, request.event.as_str())
            .header(DELIVERY_HEADER, request.delivery_id.to_string())
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                debug!(
                    delivery_id = %request.delivery_id,
                    status = %response.status(),
                    "webhook delivered"
                );
                DeliveryOutcome::Delivered {
                    status_code: response.status().as_u16(),
                }
            }
            Ok(response) => DeliveryOutcome::Rejected {
                status_code: Some(response.status().as_u16()),
                error: format!("endpoint responded with status {}", response.status()),
            },
            Err(error) => DeliveryOutcome::Rejected {
                status_code: None,
                error: format!("webhook transport error: {error}"),
            },
        }
    }
}
