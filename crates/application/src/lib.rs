//! Application services and ports.

#![forbid(unsafe_code)]

mod cleanup_service;
mod license_ports;
mod license_service;
mod validation_service;
mod webhook_service;

#[cfg(test)]
mod test_support;

pub use cleanup_service::{DEFAULT_LICENSE_RETENTION_DAYS, LicenseCleanupService};
pub use license_ports::{
    AuditEvent, AuditRepository, LicenseFilter, LicenseRepository, WebhookDispatchRequest,
    WebhookDispatcher, WebhookRepository,
};
pub use license_service::{
    CreateLicenseInput, LICENSE_LIST_DEFAULT_LIMIT, LICENSE_LIST_MAX_LIMIT, LicenseListQuery,
    LicensePage, LicenseService, LicenseView,
};
pub use validation_service::{
    LicenseValidationService, ValidateLicenseRequest, ValidationCode, ValidationResult,
};
pub use webhook_service::{
    DEFAULT_WEBHOOK_MAX_ATTEMPTS, DeliverySummary, RegisterWebhookInput, WebhookService,
};
