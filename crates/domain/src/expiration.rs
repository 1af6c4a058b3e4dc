//! License expiration policies and status classification.
//!
//! Every consumer that needs to know whether a license is still valid (the
//! dashboard listing, the validation endpoint, the cleanup job) goes through
//! [`LicenseExpirationEvaluator`]. The evaluator never reads a clock: the
//! current instant is always passed in.

use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use keyward_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Default width of both the "expiring soon" and the inactivity windows.
pub const DEFAULT_INACTIVITY_WINDOW_DAYS: u32 = 30;

/// Upper bound accepted for duration-based policies on the write path.
pub const MAX_EXPIRATION_DAYS: u32 = 36_500;

/// How a license expiration date is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationType {
    /// The license never expires.
    #[default]
    Never,
    /// The license expires at an explicit instant.
    Date,
    /// The license expires a number of days after an anchor instant.
    Duration,
}

impl ExpirationType {
    /// Returns a stable storage value for this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Date => "date",
            Self::Duration => "duration",
        }
    }

    /// Returns whether licenses with this type can expire at all.
    #[must_use]
    pub fn can_expire(&self) -> bool {
        !matches!(self, Self::Never)
    }
}

impl FromStr for ExpirationType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "date" => Ok(Self::Date),
            "duration" => Ok(Self::Duration),
            _ => Err(AppError::Validation(format!(
                "unknown expiration type '{value}'"
            ))),
        }
    }
}

/// Anchor of a duration-based expiration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationStart {
    /// Counted from the license creation instant.
    #[default]
    Creation,
    /// Counted from the first recorded activation.
    Activation,
}

impl ExpirationStart {
    /// Returns a stable storage value for this anchor.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creation => "creation",
            Self::Activation => "activation",
        }
    }
}

impl FromStr for ExpirationStart {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "creation" => Ok(Self::Creation),
            "activation" => Ok(Self::Activation),
            _ => Err(AppError::Validation(format!(
                "unknown expiration start '{value}'"
            ))),
        }
    }
}

/// Configured expiration settings of a license.
///
/// Fields that do not belong to `expiration_type` are ignored by the
/// evaluator, so a loosely populated value is always safe to evaluate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    /// Expiration strategy.
    pub expiration_type: ExpirationType,
    /// Duration anchor, only read for [`ExpirationType::Duration`].
    #[serde(default)]
    pub expiration_start: ExpirationStart,
    /// Duration length in days, only read for [`ExpirationType::Duration`].
    #[serde(default)]
    pub expiration_days: Option<u32>,
    /// Absolute expiration instant, only read for [`ExpirationType::Date`].
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

impl ExpirationPolicy {
    /// A policy that never expires.
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    /// A policy that expires at a fixed instant.
    #[must_use]
    pub fn on_date(expiration_date: DateTime<Utc>) -> Self {
        Self {
            expiration_type: ExpirationType::Date,
            expiration_date: Some(expiration_date),
            ..Self::default()
        }
    }

    /// A policy that expires `days` after the given anchor.
    #[must_use]
    pub fn after_days(days: u32, start: ExpirationStart) -> Self {
        Self {
            expiration_type: ExpirationType::Duration,
            expiration_start: start,
            expiration_days: Some(days),
            expiration_date: None,
        }
    }

    /// Rejects combinations the evaluator would silently treat as never-expiring.
    ///
    /// The write path calls this before persisting; evaluation itself stays total.
    pub fn validate(&self) -> AppResult<()> {
        match self.expiration_type {
            ExpirationType::Never => Ok(()),
            ExpirationType::Date => {
                if self.expiration_date.is_none() {
                    return Err(AppError::Validation(
                        "expiration_date is required when expiration_type is 'date'".to_owned(),
                    ));
                }

                Ok(())
            }
            ExpirationType::Duration => match self.expiration_days {
                None | Some(0) => Err(AppError::Validation(
                    "expiration_days must be a positive integer when expiration_type is 'duration'"
                        .to_owned(),
                )),
                Some(days) if days > MAX_EXPIRATION_DAYS => Err(AppError::Validation(format!(
                    "expiration_days must not exceed {MAX_EXPIRATION_DAYS}"
                ))),
                Some(_) => Ok(()),
            },
        }
    }

    /// Clears the fields that do not belong to the configured type.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self.expiration_type {
            ExpirationType::Never => Self::never(),
            ExpirationType::Date => Self {
                expiration_start: ExpirationStart::default(),
                expiration_days: None,
                ..self
            },
            ExpirationType::Duration => Self {
                expiration_date: None,
                ..self
            },
        }
    }
}

/// Snapshot of the license fields that drive expiration and status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LicensePolicy {
    /// Expiration settings.
    pub expiration: ExpirationPolicy,
    /// Suspension flag, independent of expiration.
    pub suspended: bool,
    /// Immutable creation instant.
    pub created_at: DateTime<Utc>,
    /// First recorded activation, absent until first use.
    pub first_activated_at: Option<DateTime<Utc>>,
    /// Most recent validation traffic, absent until first use.
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Display and filter classification of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    /// Suspended by the team, regardless of expiration.
    Suspended,
    /// Past its resolved expiration instant.
    Expired,
    /// Expires within the inactivity window.
    Expiring,
    /// Used within the inactivity window.
    Active,
    /// Never used, or not used within the inactivity window.
    Inactive,
}

impl LicenseStatus {
    /// Returns a stable transport value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::Expired => "expired",
            Self::Expiring => "expiring",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    /// Returns all statuses in precedence order.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[LicenseStatus] = &[
            LicenseStatus::Suspended,
            LicenseStatus::Expired,
            LicenseStatus::Expiring,
            LicenseStatus::Active,
            LicenseStatus::Inactive,
        ];

        ALL
    }
}

impl FromStr for LicenseStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "suspended" => Ok(Self::Suspended),
            "expired" => Ok(Self::Expired),
            "expiring" => Ok(Self::Expiring),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            _ => Err(AppError::Validation(format!(
                "unknown license status '{value}'"
            ))),
        }
    }
}

/// Resolves expiration instants and classifies license status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LicenseExpirationEvaluator {
    inactivity_window: TimeDelta,
}

impl Default for LicenseExpirationEvaluator {
    fn default() -> Self {
        Self::with_window_days(DEFAULT_INACTIVITY_WINDOW_DAYS)
    }
}

impl LicenseExpirationEvaluator {
    /// Creates an evaluator with a custom inactivity window.
    ///
    /// The same window bounds the "expiring soon" classification.
    #[must_use]
    pub fn new(inactivity_window: TimeDelta) -> Self {
        Self {
            inactivity_window: inactivity_window.abs(),
        }
    }

    /// Creates an evaluator whose inactivity window is a whole number of days.
    #[must_use]
    pub fn with_window_days(days: u32) -> Self {
        Self::new(TimeDelta::days(i64::from(days)))
    }

    /// Returns the configured inactivity window.
    #[must_use]
    pub fn inactivity_window(&self) -> TimeDelta {
        self.inactivity_window
    }

    /// Resolves the expiration instant stored when a license is created.
    #[must_use]
    pub fn compute_expiration_date_on_create(
        &self,
        policy: &ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match policy.expiration_type {
            ExpirationType::Never => None,
            ExpirationType::Date => policy.expiration_date,
            ExpirationType::Duration => match policy.expiration_start {
                ExpirationStart::Creation => days_after(now, policy.expiration_days),
                ExpirationStart::Activation => None,
            },
        }
    }

    /// Resolves the expiration instant stored when a license is updated.
    ///
    /// Creation-anchored durations are recomputed from `existing.created_at`,
    /// so editing a license never extends it relative to the edit time.
    #[must_use]
    pub fn compute_expiration_date_on_update(
        &self,
        policy: &ExpirationPolicy,
        existing: &LicensePolicy,
        _now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match policy.expiration_type {
            ExpirationType::Never => None,
            ExpirationType::Date => policy.expiration_date,
            ExpirationType::Duration => {
                let anchor = match policy.expiration_start {
                    ExpirationStart::Creation => Some(existing.created_at),
                    ExpirationStart::Activation => existing.first_activated_at,
                };

                anchor.and_then(|anchor| days_after(anchor, policy.expiration_days))
            }
        }
    }

    /// Resolves the expiration instant once the first activation is recorded.
    #[must_use]
    pub fn compute_expiration_date_on_activation(
        &self,
        policy: &ExpirationPolicy,
        existing: &LicensePolicy,
        activated_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let activated = LicensePolicy {
            first_activated_at: existing.first_activated_at.or(Some(activated_at)),
            ..*existing
        };

        self.compute_expiration_date_on_update(policy, &activated, activated_at)
    }

    /// Classifies a license for display and filtering.
    ///
    /// Precedence, first match wins:
    /// 1. suspended
    /// 2. expired: the resolved instant is at or before `now`
    /// 3. expiring: the resolved instant falls in `(now, now + window]`
    /// 4. inactive: never used, or last used at or before `now - window`
    /// 5. active
    ///
    /// Steps 2 and 3 only apply to policies that can expire.
    #[must_use]
    pub fn classify_status(
        &self,
        license: &LicensePolicy,
        resolved_expiration_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> LicenseStatus {
        if license.suspended {
            return LicenseStatus::Suspended;
        }

        if license.expiration.expiration_type.can_expire() {
            if let Some(expires_at) = resolved_expiration_date {
                if expires_at <= now {
                    return LicenseStatus::Expired;
                }

                let expiring = now
                    .checked_add_signed(self.inactivity_window)
                    .is_none_or(|window_end| expires_at <= window_end);
                if expiring {
                    return LicenseStatus::Expiring;
                }
            }
        }

        let inactive = match license.last_active_at {
            None => true,
            Some(last_active_at) => now
                .checked_sub_signed(self.inactivity_window)
                .is_some_and(|cutoff| last_active_at <= cutoff),
        };

        if inactive {
            LicenseStatus::Inactive
        } else {
            LicenseStatus::Active
        }
    }

    /// Returns whether a license is expired at `now`.
    #[must_use]
    pub fn is_expired(
        &self,
        license: &LicensePolicy,
        resolved_expiration_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        license.expiration.expiration_type.can_expire()
            && resolved_expiration_date.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Returns whether an expired license has been kept for at least `retention`.
#[must_use]
pub fn is_past_retention(
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    retention: TimeDelta,
) -> bool {
    expires_at
        .and_then(|expires_at| expires_at.checked_add_signed(retention.abs()))
        .is_some_and(|purge_at| purge_at <= now)
}

fn days_after(anchor: DateTime<Utc>, days: Option<u32>) -> Option<DateTime<Utc>> {
    let days = days.filter(|days| *days > 0)?;
    let span = TimeDelta::try_days(i64::from(days))?;
    anchor.checked_add_signed(span)
}
