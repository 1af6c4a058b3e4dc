//! Hardware and network fingerprints bound to a license.

use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use keyward_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Maximum accepted length of a hardware identifier.
pub const HWID_MAX_LENGTH: usize = 1_000;

/// Fingerprint category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintKind {
    /// Hardware identifier reported by the client.
    Hwid,
    /// Source IP address of the validation request.
    Ip,
}

impl FingerprintKind {
    /// Returns a stable storage value for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hwid => "hwid",
            Self::Ip => "ip",
        }
    }

    /// Normalizes a raw fingerprint value of this kind.
    ///
    /// IP addresses are stored in their canonical textual form so that
    /// `::FFFF:10.0.0.1`-style spellings do not occupy two slots.
    pub fn normalize(&self, raw: &str) -> AppResult<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(format!(
                "{} fingerprint must not be empty",
                self.as_str()
            )));
        }

        match self {
            Self::Hwid => {
                if trimmed.chars().count() > HWID_MAX_LENGTH {
                    return Err(AppError::Validation(format!(
                        "hwid must not exceed {HWID_MAX_LENGTH} characters"
                    )));
                }

                Ok(trimmed.to_owned())
            }
            Self::Ip => IpAddr::from_str(trimmed)
                .map(|address| address.to_canonical().to_string())
                .map_err(|error| {
                    AppError::Validation(format!("invalid ip address '{trimmed}': {error}"))
                }),
        }
    }
}

impl FromStr for FingerprintKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "hwid" => Ok(Self::Hwid),
            "ip" => Ok(Self::Ip),
            _ => Err(AppError::Validation(format!(
                "unknown fingerprint kind '{value}'"
            ))),
        }
    }
}

/// One fingerprint seen on a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintBinding {
    /// Fingerprint category.
    pub kind: FingerprintKind,
    /// Normalized fingerprint value.
    pub value: String,
    /// First validation that carried this fingerprint.
    pub first_seen_at: DateTime<Utc>,
    /// Most recent validation that carried this fingerprint.
    pub last_seen_at: DateTime<Utc>,
}

/// Whether a binding still occupies a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingActivity {
    /// Seen within the timeout, or no timeout configured.
    Active,
    /// Not seen for at least the timeout.
    TimedOut,
}

impl BindingActivity {
    /// Classifies a binding by the time elapsed since it was last seen.
    #[must_use]
    pub fn classify(
        last_seen_at: DateTime<Utc>,
        timeout: Option<TimeDelta>,
        now: DateTime<Utc>,
    ) -> Self {
        match timeout {
            Some(timeout) if now.signed_duration_since(last_seen_at) >= timeout => Self::TimedOut,
            _ => Self::Active,
        }
    }
}

/// Result of presenting a fingerprint to a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintRegistration {
    /// The fingerprint was already bound and has been refreshed.
    Refreshed,
    /// The fingerprint took a free slot.
    Bound,
    /// Every slot of this kind is held by another active fingerprint.
    LimitReached,
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, Utc};

    use super::{BindingActivity, FingerprintKind};

    #[test]
    fn ip_values_are_canonicalized() {
        let normalized = FingerprintKind::Ip.normalize(" ::ffff:10.0.0.1 ");
        assert_eq!(normalized.ok().as_deref(), Some("10.0.0.1"));
        assert!(FingerprintKind::Ip.normalize("10.0.0").is_err());
    }

    #[test]
    fn hwid_rejects_blank_values() {
        assert!(FingerprintKind::Hwid.normalize("   ").is_err());
    }

    #[test]
    fn timeout_boundary_releases_the_binding() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        let timeout = Some(TimeDelta::minutes(60));

        assert_eq!(
            BindingActivity::classify(now - TimeDelta::minutes(59), timeout, now),
            BindingActivity::Active
        );
        assert_eq!(
            BindingActivity::classify(now - TimeDelta::minutes(60), timeout, now),
            BindingActivity::TimedOut
        );
        assert_eq!(
            BindingActivity::classify(now - TimeDelta::days(365), None, now),
            BindingActivity::Active
        );
    }
}
