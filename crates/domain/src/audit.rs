use std::str::FromStr;

use keyward_core::AppError;
use serde::{Deserialize, Serialize};

/// Stable audit actions emitted by application use-cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A license was issued.
    LicenseCreated,
    /// License settings changed.
    LicenseUpdated,
    /// A license was suspended.
    LicenseSuspended,
    /// A suspended license was reinstated.
    LicenseReinstated,
    /// A license was deleted by the team.
    LicenseDeleted,
    /// The cleanup job removed a license past retention.
    LicensePurged,
    /// A validation request succeeded.
    LicenseValidated,
    /// A validation request was refused.
    LicenseValidationRejected,
    /// A webhook endpoint was registered.
    WebhookCreated,
    /// A webhook endpoint was removed.
    WebhookDeleted,
}

impl AuditAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LicenseCreated => "license.created",
            Self::LicenseUpdated => "license.updated",
            Self::LicenseSuspended => "license.suspended",
            Self::LicenseReinstated => "license.reinstated",
            Self::LicenseDeleted => "license.deleted",
            Self::LicensePurged => "license.purged",
            Self::LicenseValidated => "license.validated",
            Self::LicenseValidationRejected => "license.validation_rejected",
            Self::WebhookCreated => "webhook.created",
            Self::WebhookDeleted => "webhook.deleted",
        }
    }
}

impl FromStr for AuditAction {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "license.created" => Ok(Self::LicenseCreated),
            "license.updated" => Ok(Self::LicenseUpdated),
            "license.suspended" => Ok(Self::LicenseSuspended),
            "license.reinstated" => Ok(Self::LicenseReinstated),
            "license.deleted" => Ok(Self::LicenseDeleted),
            "license.purged" => Ok(Self::LicensePurged),
            "license.validated" => Ok(Self::LicenseValidated),
            "license.validation_rejected" => Ok(Self::LicenseValidationRejected),
            "webhook.created" => Ok(Self::WebhookCreated),
            "webhook.deleted" => Ok(Self::WebhookDeleted),
            _ => Err(AppError::Validation(format!(
                "unknown audit action '{value}'"
            ))),
        }
    }
}
