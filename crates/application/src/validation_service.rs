//! Client-facing license validation.
//!
//! Expected rejections (unknown key, expired, seat limits) are reported as
//! [`ValidationCode`] values. Only malformed fingerprints and storage failures
//! surface as errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyward_core::{AppError, AppResult, TeamId};
use keyward_domain::{
    AuditAction, FingerprintKind, FingerprintRegistration, License, LicenseExpirationEvaluator,
    LicenseId, LicenseKey, LicenseStatus, WebhookEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::license_ports::{AuditEvent, AuditRepository, LicenseRepository};
use crate::license_service::LICENSE_WRITE_ATTEMPTS;
use crate::webhook_service::WebhookService;

const VALIDATION_SUBJECT: &str = "license_validation";

/// One validation request sent by a licensed client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateLicenseRequest {
    /// Team that issued the license.
    pub team_id: TeamId,
    /// License key as typed by the user.
    pub license_key: String,
    /// Product the client runs as.
    #[serde(default)]
    pub product_id: Option<String>,
    /// Customer the client runs for.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Hardware identifier of the client machine.
    #[serde(default)]
    pub hwid: Option<String>,
    /// Source IP address of the request.
    #[serde(default)]
    pub ip: Option<String>,
}

/// Outcome code of one validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    /// The key is unknown to the team.
    NotFound,
    /// The license does not unlock the requested product.
    ProductMismatch,
    /// The license is not issued to the requested customer.
    CustomerMismatch,
    /// The license is suspended.
    Suspended,
    /// The license is past its expiration date.
    Expired,
    /// Every hardware slot is held by another machine.
    HwidLimitReached,
    /// Every IP slot is held by another address.
    IpLimitReached,
    /// The license is valid.
    Valid,
}

impl ValidationCode {
    /// Returns the stable wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ProductMismatch => "product_mismatch",
            Self::CustomerMismatch => "customer_mismatch",
            Self::Suspended => "suspended",
            Self::Expired => "expired",
            Self::HwidLimitReached => "hwid_limit_reached",
            Self::IpLimitReached => "ip_limit_reached",
            Self::Valid => "valid",
        }
    }

    /// Returns whether the client may run.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Result returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Outcome code.
    pub code: ValidationCode,
    /// Matched license, when the key was found.
    pub license_id: Option<LicenseId>,
    /// Status of the matched license at the request instant.
    pub status: Option<LicenseStatus>,
    /// Resolved expiration instant of the matched license.
    pub expires_at: Option<DateTime<Utc>>,
    /// License metadata, only filled for valid licenses.
    pub metadata: BTreeMap<String, String>,
}

impl ValidationResult {
    fn not_found() -> Self {
        Self {
            code: ValidationCode::NotFound,
            license_id: None,
            status: None,
            expires_at: None,
            metadata: BTreeMap::new(),
        }
    }

    fn rejected(
        code: ValidationCode,
        license: &License,
        evaluator: &LicenseExpirationEvaluator,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            code,
            license_id: Some(license.id()),
            status: Some(license.status(evaluator, now)),
            expires_at: license.expires_at(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Application service answering license validation requests.
#[derive(Clone)]
pub struct LicenseValidationService {
    repository: Arc<dyn LicenseRepository>,
    audit_repository: Arc<dyn AuditRepository>,
    webhooks: WebhookService,
    evaluator: LicenseExpirationEvaluator,
}

impl LicenseValidationService {
    /// Creates a new validation service.
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

    /// Validates a license key and records client activity on success.
    ///
    /// A concurrent write to the license between the read and the activity
    /// write restarts the evaluation on the fresh state.
    pub async fn validate(
        &self,
        request: ValidateLicenseRequest,
        now: DateTime<Utc>,
    ) -> AppResult<ValidationResult> {
        let hwid = request
            .hwid
            .as_deref()
            .map(|raw| FingerprintKind::Hwid.normalize(raw))
            .transpose()?;
        let ip = request
            .ip
            .as_deref()
            .map(|raw| FingerprintKind::Ip.normalize(raw))
            .transpose()?;

        let Ok(key) = LicenseKey::parse(request.license_key.as_str()) else {
            return self.not_found(request.team_id).await;
        };

        for attempt in 1..=LICENSE_WRITE_ATTEMPTS {
            let Some(license) = self
                .repository
                .find_license_by_key(request.team_id, &key)
                .await?
            else {
                return self.not_found(request.team_id).await;
            };

            if let Some(code) = self.precheck(&license, &request, now) {
                return self.reject(code, &license, now).await;
            }

            let mut activated = license.clone();
            let fingerprints = [
                (FingerprintKind::Hwid, hwid.as_ref(), ValidationCode::HwidLimitReached),
                (FingerprintKind::Ip, ip.as_ref(), ValidationCode::IpLimitReached),
            ];
            for (kind, value, code) in fingerprints {
                let Some(value) = value else {
                    continue;
                };

                if activated.register_fingerprint(kind, value.as_str(), now)
                    == FingerprintRegistration::LimitReached
                {
                    return self.reject(code, &license, now).await;
                }
            }

            let first_activation = activated.record_activity(&self.evaluator, now);
            match self.repository.record_activity(activated).await {
                Ok(recorded) => return self.accept(recorded, first_activation, now).await,
                Err(AppError::Conflict(reason)) => {
                    debug!(
                        license_id = %license.id(),
                        attempt,
                        %reason,
                        "validation raced a license write"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        Err(AppError::Conflict(
            "license kept changing during validation, retry the request".to_owned(),
        ))
    }

    async fn accept(
        &self,
        license: License,
        first_activation: bool,
        now: DateTime<Utc>,
    ) -> AppResult<ValidationResult> {
        self.append_audit(
            license.team_id(),
            AuditAction::LicenseValidated,
            license.id().to_string(),
            ValidationCode::Valid,
        )
        .await?;

        if first_activation {
            self.notify_activation(&license, now).await;
        }

        Ok(ValidationResult {
            code: ValidationCode::Valid,
            license_id: Some(license.id()),
            status: Some(license.status(&self.evaluator, now)),
            expires_at: license.expires_at(),
            metadata: license.settings().metadata.clone(),
        })
    }

    async fn not_found(&self, team_id: TeamId) -> AppResult<ValidationResult> {
        debug!(team_id = %team_id, "validation for unknown license key");
        self.append_audit(
            team_id,
            AuditAction::LicenseValidationRejected,
            "unknown".to_owned(),
            ValidationCode::NotFound,
        )
        .await?;

        Ok(ValidationResult::not_found())
    }

    fn precheck(
        &self,
        license: &License,
        request: &ValidateLicenseRequest,
        now: DateTime<Utc>,
    ) -> Option<ValidationCode> {
        if request
            .product_id
            .as_deref()
            .is_some_and(|product_id| !license.covers_product(product_id))
        {
            return Some(ValidationCode::ProductMismatch);
        }

        if request
            .customer_id
            .as_deref()
            .is_some_and(|customer_id| !license.belongs_to_customer(customer_id))
        {
            return Some(ValidationCode::CustomerMismatch);
        }

        match license.status(&self.evaluator, now) {
            LicenseStatus::Suspended => Some(ValidationCode::Suspended),
            LicenseStatus::Expired => Some(ValidationCode::Expired),
            _ => None,
        }
    }

    async fn reject(
        &self,
        code: ValidationCode,
        license: &License,
        now: DateTime<Utc>,
    ) -> AppResult<ValidationResult> {
        debug!(license_id = %license.id(), code = code.as_str(), "license validation rejected");
        self.append_audit(
            license.team_id(),
            AuditAction::LicenseValidationRejected,
            license.id().to_string(),
            code,
        )
        .await?;

        Ok(ValidationResult::rejected(code, license, &self.evaluator, now))
    }

    async fn append_audit(
        &self,
        team_id: TeamId,
        action: AuditAction,
        resource_id: String,
        code: ValidationCode,
    ) -> AppResult<()> {
        self.audit_repository
            .append_event(AuditEvent {
                team_id,
                subject: VALIDATION_SUBJECT.to_owned(),
                action,
                resource_type: "license".to_owned(),
                resource_id,
                detail: Some(code.as_str().to_owned()),
            })
            .await
    }

    async fn notify_activation(&self, license: &License, now: DateTime<Utc>) {
        let payload = json!({
            "license_id": license.id().to_string(),
            "team_id": license.team_id().to_string(),
            "key": license.key().as_str(),
            "activated_at": now.to_rfc3339(),
            "expires_at": license.expires_at().map(|expires_at| expires_at.to_rfc3339()),
        });

        if let Err(error) = self
            .webhooks
            .enqueue(license.team_id(), WebhookEvent::LicenseActivated, payload, now)
            .await
        {
            warn!(license_id = %license.id(), %error, "failed to queue activation webhook");
        }
    }
}
