use chrono::{DateTime, Utc};
use keyward_core::{Actor, AppError, AppResult};
use keyward_domain::{LICENSE_KEY_SYMBOLS, License, LicenseKey, LicenseSettings};
use tracing::debug;

use super::LicenseService;

/// Generated keys that may collide with existing ones before creation gives up.
const KEY_GENERATION_ATTEMPTS: usize = 5;

/// Random bytes drawn per attempt; about 1.6% of them are rejected.
const KEY_ENTROPY_BYTES: usize = 2 * LICENSE_KEY_SYMBOLS;

pub(super) fn generate_license_key() -> AppResult<LicenseKey> {
    loop {
        let mut entropy = [0_u8; KEY_ENTROPY_BYTES];
        getrandom::fill(&mut entropy).map_err(|error| {
            AppError::Internal(format!("failed to gather license key entropy: {error}"))
        })?;

        if let Some(key) = LicenseKey::from_entropy(&entropy) {
            return Ok(key);
        }
    }
}

impl LicenseService {
    pub(super) async fn issue_with_generated_key(
        &self,
        actor: &Actor,
        settings: LicenseSettings,
        now: DateTime<Utc>,
    ) -> AppResult<License> {
        for attempt in 1..=KEY_GENERATION_ATTEMPTS {
            let license = License::issue(
                actor.team_id(),
                generate_license_key()?,
                settings.clone(),
                &self.evaluator,
                now,
            )?;

            match self.repository.create_license(license.clone()).await {
                Ok(()) => return Ok(license),
                Err(AppError::Conflict(_)) => {
                    debug!(team_id = %actor.team_id(), attempt, "generated license key collided");
                }
                Err(error) => return Err(error),
            }
        }

        Err(AppError::Conflict(format!(
            "could not generate a unique license key after {KEY_GENERATION_ATTEMPTS} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::generate_license_key;

    #[test]
    fn generated_keys_are_canonical_and_distinct() {
        let first = generate_license_key().unwrap_or_else(|_| unreachable!());
        let second = generate_license_key().unwrap_or_else(|_| unreachable!());

        assert_eq!(first.as_str().len(), 29);
        assert_eq!(first.as_str().matches('-').count(), 4);
        assert_ne!(first, second);
    }
}
