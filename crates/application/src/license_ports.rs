mod audit;
mod repository;
mod webhooks;

pub use audit::{AuditEvent, AuditRepository};
pub use repository::{LicenseFilter, LicenseRepository};
pub use webhooks::{WebhookDispatchRequest, WebhookDispatcher, WebhookRepository};
