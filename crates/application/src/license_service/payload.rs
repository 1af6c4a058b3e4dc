use keyward_domain::License;
use serde_json::{Value, json};

use super::LicenseView;

pub(super) fn license_payload(view: &LicenseView) -> Value {
    let license = &view.license;
    let settings = license.settings();

    json!({
        "license_id": license.id().to_string(),
        "team_id": license.team_id().to_string(),
        "key": license.key().as_str(),
        "status": view.status.as_str(),
        "product_ids": settings.product_ids,
        "customer_ids": settings.customer_ids,
        "expiration_type": settings.expiration.expiration_type.as_str(),
        "expires_at": license.expires_at().map(|expires_at| expires_at.to_rfc3339()),
        "suspended": settings.suspended,
        "metadata": settings.metadata,
    })
}

pub(super) fn deleted_payload(license: &License) -> Value {
    json!({
        "license_id": license.id().to_string(),
        "team_id": license.team_id().to_string(),
        "key": license.key().as_str(),
    })
}
