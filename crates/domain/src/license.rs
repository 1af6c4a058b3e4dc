use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use chrono::{DateTime, TimeDelta, Utc};
use keyward_core::{AppError, AppResult, NonEmptyString, TeamId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::expiration::{ExpirationPolicy, LicenseExpirationEvaluator, LicensePolicy, LicenseStatus};
use crate::fingerprint::{
    BindingActivity, FingerprintBinding, FingerprintKind, FingerprintRegistration,
};
use crate::license_key::LicenseKey;

/// Maximum number of metadata entries on one license.
pub const LICENSE_METADATA_MAX_ENTRIES: usize = 20;

/// Maximum length of one metadata key.
pub const LICENSE_METADATA_KEY_MAX_LENGTH: usize = 64;

/// Maximum length of one metadata value.
pub const LICENSE_METADATA_VALUE_MAX_LENGTH: usize = 512;

/// Maximum number of linked products or customers on one license.
pub const LICENSE_MAX_LINKS: usize = 50;

/// Unique identifier for a license record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LicenseId(Uuid);

impl LicenseId {
    /// Creates a new random license identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a license identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Parses a license identifier from its hyphenated string form.
    pub fn parse(value: &str) -> AppResult<Self> {
        Uuid::parse_str(value.trim()).map(Self).map_err(|error| {
            AppError::Validation(format!("invalid license id '{value}': {error}"))
        })
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LicenseId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for LicenseId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Seat limits and activity timeouts for fingerprint bindings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseLimits {
    /// Maximum concurrently active hardware identifiers, unlimited when absent.
    pub hwid_limit: Option<u32>,
    /// Maximum concurrently active IP addresses, unlimited when absent.
    pub ip_limit: Option<u32>,
    /// Minutes after which an unseen hardware identifier frees its slot.
    pub hwid_timeout_minutes: Option<u32>,
    /// Minutes after which an unseen IP address frees its slot.
    pub ip_timeout_minutes: Option<u32>,
}

impl LicenseLimits {
    /// Rejects zero limits and zero timeouts.
    pub fn validate(&self) -> AppResult<()> {
        let checks = [
            ("hwid_limit", self.hwid_limit),
            ("ip_limit", self.ip_limit),
            ("hwid_timeout_minutes", self.hwid_timeout_minutes),
            ("ip_timeout_minutes", self.ip_timeout_minutes),
        ];

        for (name, value) in checks {
            if value == Some(0) {
                return Err(AppError::Validation(format!(
                    "{name} must be greater than zero when set"
                )));
            }
        }

        Ok(())
    }

    /// Returns the slot limit for a fingerprint kind.
    #[must_use]
    pub fn limit_for(&self, kind: FingerprintKind) -> Option<u32> {
        match kind {
            FingerprintKind::Hwid => self.hwid_limit,
            FingerprintKind::Ip => self.ip_limit,
        }
    }

    /// Returns the activity timeout for a fingerprint kind.
    #[must_use]
    pub fn timeout_for(&self, kind: FingerprintKind) -> Option<TimeDelta> {
        let minutes = match kind {
            FingerprintKind::Hwid => self.hwid_timeout_minutes,
            FingerprintKind::Ip => self.ip_timeout_minutes,
        }?;

        TimeDelta::try_minutes(i64::from(minutes))
    }
}

/// Team-editable license settings used on create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseSettings {
    /// Products the license unlocks.
    #[serde(default)]
    pub product_ids: Vec<String>,
    /// Customers the license is issued to.
    #[serde(default)]
    pub customer_ids: Vec<String>,
    /// Expiration settings.
    #[serde(default)]
    pub expiration: ExpirationPolicy,
    /// Seat limits and timeouts.
    #[serde(default)]
    pub limits: LicenseLimits,
    /// Free-form key/value pairs returned to clients on validation.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Suspension flag.
    #[serde(default)]
    pub suspended: bool,
}

impl LicenseSettings {
    /// Validates and normalizes settings before they reach a license.
    pub fn validated(self) -> AppResult<Self> {
        self.expiration.validate()?;
        self.limits.validate()?;

        if self.metadata.len() > LICENSE_METADATA_MAX_ENTRIES {
            return Err(AppError::Validation(format!(
                "license metadata must not exceed {LICENSE_METADATA_MAX_ENTRIES} entries"
            )));
        }

        let mut metadata = BTreeMap::new();
        for (key, value) in self.metadata {
            let key = NonEmptyString::new(key)?;
            if key.as_str().chars().count() > LICENSE_METADATA_KEY_MAX_LENGTH {
                return Err(AppError::Validation(format!(
                    "metadata key '{key}' must not exceed {LICENSE_METADATA_KEY_MAX_LENGTH} characters"
                )));
            }
            if value.chars().count() > LICENSE_METADATA_VALUE_MAX_LENGTH {
                return Err(AppError::Validation(format!(
                    "metadata value for '{key}' must not exceed {LICENSE_METADATA_VALUE_MAX_LENGTH} characters"
                )));
            }
            metadata.insert(String::from(key), value);
        }

        Ok(Self {
            product_ids: normalize_links("product_ids", self.product_ids)?,
            customer_ids: normalize_links("customer_ids", self.customer_ids)?,
            expiration: self.expiration.normalized(),
            limits: self.limits,
            metadata,
            suspended: self.suspended,
        })
    }
}

fn normalize_links(name: &str, values: Vec<String>) -> AppResult<Vec<String>> {
    let mut unique = BTreeSet::new();
    for value in values {
        unique.insert(String::from(NonEmptyString::new(value)?));
    }

    if unique.len() > LICENSE_MAX_LINKS {
        return Err(AppError::Validation(format!(
            "{name} must not exceed {LICENSE_MAX_LINKS} entries"
        )));
    }

    Ok(unique.into_iter().collect())
}

/// Persisted license state, used by adapters to rebuild a [`License`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseSnapshot {
    /// License identifier.
    pub id: LicenseId,
    /// Owning team.
    pub team_id: TeamId,
    /// Canonical license key.
    pub key: LicenseKey,
    /// Stored settings.
    pub settings: LicenseSettings,
    /// Resolved expiration instant.
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last settings change.
    pub updated_at: DateTime<Utc>,
    /// First recorded activation.
    pub first_activated_at: Option<DateTime<Utc>>,
    /// Most recent validation.
    pub last_active_at: Option<DateTime<Utc>>,
    /// Fingerprints seen on the license.
    pub fingerprints: Vec<FingerprintBinding>,
    /// Stored write counter.
    pub revision: u64,
}

/// A software license issued by a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct License {
    id: LicenseId,
    team_id: TeamId,
    key: LicenseKey,
    settings: LicenseSettings,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    first_activated_at: Option<DateTime<Utc>>,
    last_active_at: Option<DateTime<Utc>>,
    fingerprints: Vec<FingerprintBinding>,
    revision: u64,
}

impl License {
    /// Issues a new license and resolves its expiration instant.
    pub fn issue(
        team_id: TeamId,
        key: LicenseKey,
        settings: LicenseSettings,
        evaluator: &LicenseExpirationEvaluator,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let settings = settings.validated()?;
        let expires_at = evaluator.compute_expiration_date_on_create(&settings.expiration, now);

        Ok(Self {
            id: LicenseId::new(),
            team_id,
            key,
            settings,
            expires_at,
            created_at: now,
            updated_at: now,
            first_activated_at: None,
            last_active_at: None,
            fingerprints: Vec::new(),
            revision: 0,
        })
    }

    /// Rebuilds a license from persisted state without re-validating it.
    #[must_use]
    pub fn restore(snapshot: LicenseSnapshot) -> Self {
        Self {
            id: snapshot.id,
            team_id: snapshot.team_id,
            key: snapshot.key,
            settings: snapshot.settings,
            expires_at: snapshot.expires_at,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            first_activated_at: snapshot.first_activated_at,
            last_active_at: snapshot.last_active_at,
            fingerprints: snapshot.fingerprints,
            revision: snapshot.revision,
        }
    }

    /// Marks the license as written once more.
    ///
    /// Stores call this after a successful compare-and-swap on [`License::revision`].
    pub fn advance_revision(&mut self) {
        self.revision = self.revision.saturating_add(1);
    }

    /// Replaces the settings and recomputes the resolved expiration instant.
    ///
    /// The suspension flag is kept; only [`License::set_suspended`] changes it.
    pub fn apply_settings(
        &mut self,
        settings: LicenseSettings,
        evaluator: &LicenseExpirationEvaluator,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let settings = LicenseSettings {
            suspended: self.settings.suspended,
            ..settings.validated()?
        };
        self.expires_at =
            evaluator.compute_expiration_date_on_update(&settings.expiration, &self.policy(), now);
        self.settings = settings;
        self.updated_at = now;

        Ok(())
    }

    /// Sets the suspension flag and reports whether it changed.
    pub fn set_suspended(&mut self, suspended: bool, now: DateTime<Utc>) -> bool {
        if self.settings.suspended == suspended {
            return false;
        }

        self.settings.suspended = suspended;
        self.updated_at = now;
        true
    }

    /// Records validation traffic and reports whether it was the first activation.
    ///
    /// The first activation resolves activation-anchored expiration dates.
    pub fn record_activity(
        &mut self,
        evaluator: &LicenseExpirationEvaluator,
        now: DateTime<Utc>,
    ) -> bool {
        self.last_active_at = Some(now);

        if self.first_activated_at.is_some() {
            return false;
        }

        self.expires_at = evaluator.compute_expiration_date_on_activation(
            &self.settings.expiration,
            &self.policy(),
            now,
        );
        self.first_activated_at = Some(now);
        true
    }

    /// Presents a normalized fingerprint to the license.
    ///
    /// Timed-out bindings of the same kind are released first.
    pub fn register_fingerprint(
        &mut self,
        kind: FingerprintKind,
        value: &str,
        now: DateTime<Utc>,
    ) -> FingerprintRegistration {
        let timeout = self.settings.limits.timeout_for(kind);
        self.fingerprints.retain(|binding| {
            binding.kind != kind
                || BindingActivity::classify(binding.last_seen_at, timeout, now)
                    == BindingActivity::Active
        });

        if let Some(binding) = self
            .fingerprints
            .iter_mut()
            .find(|binding| binding.kind == kind && binding.value == value)
        {
            binding.last_seen_at = now;
            return FingerprintRegistration::Refreshed;
        }

        if let Some(limit) = self.settings.limits.limit_for(kind) {
            let bound = self
                .fingerprints
                .iter()
                .filter(|binding| binding.kind == kind)
                .count();
            if bound >= usize::try_from(limit).unwrap_or(usize::MAX) {
                return FingerprintRegistration::LimitReached;
            }
        }

        self.fingerprints.push(FingerprintBinding {
            kind,
            value: value.to_owned(),
            first_seen_at: now,
            last_seen_at: now,
        });
        FingerprintRegistration::Bound
    }

    /// Counts bindings of a kind that still hold a slot at `now`.
    #[must_use]
    pub fn active_fingerprint_count(&self, kind: FingerprintKind, now: DateTime<Utc>) -> usize {
        let timeout = self.settings.limits.timeout_for(kind);
        self.fingerprints
            .iter()
            .filter(|binding| {
                binding.kind == kind
                    && BindingActivity::classify(binding.last_seen_at, timeout, now)
                        == BindingActivity::Active
            })
            .count()
    }

    /// Returns the expiration-relevant view of this license.
    #[must_use]
    pub fn policy(&self) -> LicensePolicy {
        LicensePolicy {
            expiration: self.settings.expiration,
            suspended: self.settings.suspended,
            created_at: self.created_at,
            first_activated_at: self.first_activated_at,
            last_active_at: self.last_active_at,
        }
    }

    /// Classifies the license at `now`.
    #[must_use]
    pub fn status(
        &self,
        evaluator: &LicenseExpirationEvaluator,
        now: DateTime<Utc>,
    ) -> LicenseStatus {
        evaluator.classify_status(&self.policy(), self.expires_at, now)
    }

    /// Returns whether the license is past its resolved expiration at `now`.
    #[must_use]
    pub fn is_expired(&self, evaluator: &LicenseExpirationEvaluator, now: DateTime<Utc>) -> bool {
        evaluator.is_expired(&self.policy(), self.expires_at, now)
    }

    /// Returns whether the license unlocks the product.
    #[must_use]
    pub fn covers_product(&self, product_id: &str) -> bool {
        self.settings
            .product_ids
            .iter()
            .any(|candidate| candidate == product_id)
    }

    /// Returns whether the license is issued to the customer.
    #[must_use]
    pub fn belongs_to_customer(&self, customer_id: &str) -> bool {
        self.settings
            .customer_ids
            .iter()
            .any(|candidate| candidate == customer_id)
    }

    /// Returns the license identifier.
    #[must_use]
    pub fn id(&self) -> LicenseId {
        self.id
    }

    /// Returns the owning team.
    #[must_use]
    pub fn team_id(&self) -> TeamId {
        self.team_id
    }

    /// Returns the canonical license key.
    #[must_use]
    pub fn key(&self) -> &LicenseKey {
        &self.key
    }

    /// Returns the current settings.
    #[must_use]
    pub fn settings(&self) -> &LicenseSettings {
        &self.settings
    }

    /// Returns the resolved expiration instant.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns the creation instant.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last settings change.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the first recorded activation.
    #[must_use]
    pub fn first_activated_at(&self) -> Option<DateTime<Utc>> {
        self.first_activated_at
    }

    /// Returns the most recent validation.
    #[must_use]
    pub fn last_active_at(&self) -> Option<DateTime<Utc>> {
        self.last_active_at
    }

    /// Returns every fingerprint binding, including timed-out ones not yet released.
    #[must_use]
    pub fn fingerprints(&self) -> &[FingerprintBinding] {
        &self.fingerprints
    }

    /// Returns the stored write counter this copy was loaded at.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, TimeDelta, Utc};
    use keyward_core::TeamId;

    use super::{License, LicenseLimits, LicenseSettings};
    use crate::expiration::{
        ExpirationPolicy, ExpirationStart, LicenseExpirationEvaluator, LicenseStatus,
    };
    use crate::fingerprint::{FingerprintKind, FingerprintRegistration};
    use crate::license_key::{LICENSE_KEY_SYMBOLS, LicenseKey};

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(|_| unreachable!())
    }

    fn issue(settings: LicenseSettings, now: DateTime<Utc>) -> License {
        License::issue(
            TeamId::new(),
            LicenseKey::from_entropy(&[7_u8; LICENSE_KEY_SYMBOLS])
                .unwrap_or_else(|| unreachable!()),
            settings,
            &LicenseExpirationEvaluator::default(),
            now,
        )
        .unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn issue_rejects_date_policy_without_date() {
        let settings = LicenseSettings {
            expiration: ExpirationPolicy {
                expiration_date: None,
                ..ExpirationPolicy::on_date(at("2025-01-01T00:00:00Z"))
            },
            ..LicenseSettings::default()
        };

        let issued = License::issue(
            TeamId::new(),
            LicenseKey::from_entropy(&[1_u8; LICENSE_KEY_SYMBOLS])
                .unwrap_or_else(|| unreachable!()),
            settings,
            &LicenseExpirationEvaluator::default(),
            at("2024-01-01T00:00:00Z"),
        );
        assert!(issued.is_err());
    }

    #[test]
    fn settings_normalize_links_and_reject_blank_metadata_keys() {
        let settings = LicenseSettings {
            product_ids: vec![" pro ".to_owned(), "pro".to_owned(), "lite".to_owned()],
            ..LicenseSettings::default()
        }
        .validated()
        .unwrap_or_else(|_| unreachable!());
        assert_eq!(settings.product_ids, vec!["lite".to_owned(), "pro".to_owned()]);

        let mut metadata = BTreeMap::new();
        metadata.insert("  ".to_owned(), "value".to_owned());
        let rejected = LicenseSettings {
            metadata,
            ..LicenseSettings::default()
        }
        .validated();
        assert!(rejected.is_err());
    }

    #[test]
    fn update_recomputes_duration_from_creation() {
        let evaluator = LicenseExpirationEvaluator::default();
        let mut license = issue(
            LicenseSettings {
                expiration: ExpirationPolicy::after_days(30, ExpirationStart::Creation),
                ..LicenseSettings::default()
            },
            at("2024-01-01T00:00:00Z"),
        );

        let updated = license.apply_settings(
            LicenseSettings {
                expiration: ExpirationPolicy::after_days(60, ExpirationStart::Creation),
                ..LicenseSettings::default()
            },
            &evaluator,
            at("2024-01-15T00:00:00Z"),
        );

        assert!(updated.is_ok());
        assert_eq!(license.expires_at(), Some(at("2024-03-01T00:00:00Z")));
        assert_eq!(license.updated_at(), at("2024-01-15T00:00:00Z"));
    }

    #[test]
    fn first_activity_resolves_activation_anchor_once() {
        let evaluator = LicenseExpirationEvaluator::default();
        let mut license = issue(
            LicenseSettings {
                expiration: ExpirationPolicy::after_days(14, ExpirationStart::Activation),
                ..LicenseSettings::default()
            },
            at("2024-01-01T00:00:00Z"),
        );
        assert_eq!(license.expires_at(), None);

        assert!(license.record_activity(&evaluator, at("2024-02-01T00:00:00Z")));
        assert!(!license.record_activity(&evaluator, at("2024-02-03T00:00:00Z")));

        assert_eq!(license.expires_at(), Some(at("2024-02-15T00:00:00Z")));
        assert_eq!(license.last_active_at(), Some(at("2024-02-03T00:00:00Z")));
        assert_eq!(
            license.status(&evaluator, at("2024-02-03T00:00:00Z")),
            LicenseStatus::Expiring
        );
    }

    #[test]
    fn known_hwid_never_counts_against_the_limit() {
        let now = at("2024-01-01T00:00:00Z");
        let mut license = issue(
            LicenseSettings {
                limits: LicenseLimits {
                    hwid_limit: Some(1),
                    ..LicenseLimits::default()
                },
                ..LicenseSettings::default()
            },
            now,
        );

        assert_eq!(
            license.register_fingerprint(FingerprintKind::Hwid, "machine-a", now),
            FingerprintRegistration::Bound
        );
        assert_eq!(
            license.register_fingerprint(FingerprintKind::Hwid, "machine-a", now),
            FingerprintRegistration::Refreshed
        );
        assert_eq!(
            license.register_fingerprint(FingerprintKind::Hwid, "machine-b", now),
            FingerprintRegistration::LimitReached
        );
    }

    #[test]
    fn timed_out_binding_frees_its_slot() {
        let now = at("2024-01-01T00:00:00Z");
        let mut license = issue(
            LicenseSettings {
                limits: LicenseLimits {
                    ip_limit: Some(1),
                    ip_timeout_minutes: Some(30),
                    ..LicenseLimits::default()
                },
                ..LicenseSettings::default()
            },
            now,
        );

        assert_eq!(
            license.register_fingerprint(FingerprintKind::Ip, "10.0.0.1", now),
            FingerprintRegistration::Bound
        );

        let later = now + TimeDelta::minutes(30);
        assert_eq!(license.active_fingerprint_count(FingerprintKind::Ip, later), 0);
        assert_eq!(
            license.register_fingerprint(FingerprintKind::Ip, "10.0.0.2", later),
            FingerprintRegistration::Bound
        );
        assert_eq!(license.fingerprints().len(), 1);
    }

    #[test]
    fn settings_update_keeps_the_suspension_flag() {
        let evaluator = LicenseExpirationEvaluator::default();
        let now = at("2024-01-01T00:00:00Z");
        let mut license = issue(LicenseSettings::default(), now);
        assert!(license.set_suspended(true, now));

        let updated = license.apply_settings(
            LicenseSettings {
                expiration: ExpirationPolicy::after_days(30, ExpirationStart::Creation),
                suspended: false,
                ..LicenseSettings::default()
            },
            &evaluator,
            now,
        );
        assert!(updated.is_ok());
        assert!(license.settings().suspended);
        assert_eq!(license.status(&evaluator, now), LicenseStatus::Suspended);

        let mut active = issue(LicenseSettings::default(), now);
        let updated = active.apply_settings(
            LicenseSettings {
                suspended: true,
                ..LicenseSettings::default()
            },
            &evaluator,
            now,
        );
        assert!(updated.is_ok());
        assert!(!active.settings().suspended);
    }

    #[test]
    fn suspension_toggle_reports_changes_only() {
        let now = at("2024-01-01T00:00:00Z");
        let mut license = issue(LicenseSettings::default(), now);

        assert!(license.set_suspended(true, now));
        assert!(!license.set_suspended(true, now));
        assert_eq!(
            license.status(&LicenseExpirationEvaluator::default(), now),
            LicenseStatus::Suspended
        );
    }
}
