//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod audit;
mod expiration;
mod fingerprint;
mod license;
mod license_key;
mod webhook;

pub use audit::AuditAction;
pub use expiration::{
    DEFAULT_INACTIVITY_WINDOW_DAYS, ExpirationPolicy, ExpirationStart, ExpirationType,
    LicenseExpirationEvaluator, LicensePolicy, LicenseStatus, MAX_EXPIRATION_DAYS,
    is_past_retention,
};
pub use fingerprint::{
    BindingActivity, FingerprintBinding, FingerprintKind, FingerprintRegistration,
    HWID_MAX_LENGTH,
};
pub use license::{
    LICENSE_MAX_LINKS, LICENSE_METADATA_KEY_MAX_LENGTH, LICENSE_METADATA_MAX_ENTRIES,
    LICENSE_METADATA_VALUE_MAX_LENGTH, License, LicenseId, LicenseLimits, LicenseSettings,
    LicenseSnapshot,
};
pub use license_key::{LICENSE_KEY_SYMBOLS, LicenseKey};
pub use webhook::{
    DeliveryOutcome, WEBHOOK_SECRET_MIN_LENGTH, Webhook, WebhookDelivery, WebhookDeliveryStatus,
    WebhookEvent, WebhookId,
};
