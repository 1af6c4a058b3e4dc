//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_webhook_dispatcher;
mod in_memory_audit_repository;
mod in_memory_license_repository;
mod in_memory_webhook_repository;
mod postgres_audit_repository;
mod postgres_license_repository;
mod postgres_webhook_repository;

pub use http_webhook_dispatcher::{
    DELIVERY_HEADER, EVENT_HEADER, HttpWebhookDispatcher, SIGNATURE_HEADER, sign_payload,
};
pub use in_memory_audit_repository::InMemoryAuditRepository;
pub use in_memory_license_repository::InMemoryLicenseRepository;
pub use in_memory_webhook_repository::InMemoryWebhookRepository;
pub use postgres_audit_repository::PostgresAuditRepository;
pub use postgres_license_repository::PostgresLicenseRepository;
pub use postgres_webhook_repository::PostgresWebhookRepository;
