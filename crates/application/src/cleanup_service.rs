use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use keyward_core::{Actor, AppError, AppResult};
use keyward_domain::{AuditAction, is_past_retention};
use tracing::info;

use crate::license_ports::{AuditEvent, AuditRepository, LicenseRepository};

/// Default number of days an expired license is kept before it is purged.
pub const DEFAULT_LICENSE_RETENTION_DAYS: u32 = 30;

/// Background service removing licenses that stayed expired past retention.
#[derive(Clone)]
pub struct LicenseCleanupService {
    repository: Arc<dyn LicenseRepository>,
    audit_repository: Arc<dyn AuditRepository>,
}

impl LicenseCleanupService {
    /// Creates a new cleanup service.
    #[must_use]
    pub fn new(
        repository: Arc<dyn LicenseRepository>,
        audit_repository: Arc<dyn AuditRepository>,
    ) -> Self {
        Self {
            repository,
            audit_repository,
        }
    }

    /// Purges up to `batch_size` licenses whose expiration is at least
    /// `retention` in the past and returns how many were removed.
    pub async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        retention: TimeDelta,
        batch_size: usize,
    ) -> AppResult<u64> {
        if batch_size == 0 {
            return Err(AppError::Validation(
                "cleanup batch size must be greater than zero".to_owned(),
            ));
        }

        let Some(cutoff) = now.checked_sub_signed(retention.abs()) else {
            return Ok(0);
        };

        let mut purged = 0_u64;
        for license in self
            .repository
            .list_licenses_expired_before(cutoff, batch_size)
            .await?
        {
            if !is_past_retention(license.expires_at(), now, retention) {
                continue;
            }

            let actor = Actor::system(license.team_id());
            self.repository
                .delete_license(actor.team_id(), license.id())
                .await?;
            self.audit_repository
                .append_event(AuditEvent {
                    team_id: actor.team_id(),
                    subject: actor.subject().to_owned(),
                    action: AuditAction::LicensePurged,
                    resource_type: "license".to_owned(),
                    resource_id: license.id().to_string(),
                    detail: license
                        .expires_at()
                        .map(|expires_at| format!("expired at {}", expires_at.to_rfc3339())),
                })
                .await?;
            purged = purged.saturating_add(1);
        }

        if purged > 0 {
            info!(purged, cutoff = %cutoff, "purged expired licenses");
        }

        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;
    use keyward_core::TeamId;
    use keyward_domain::{
        AuditAction, ExpirationPolicy, ExpirationStart, License, LicenseExpirationEvaluator,
        LicenseKey, LicenseSettings,
    };

    use crate::license_ports::LicenseRepository;
    use crate::test_support::{FakeAuditRepository, FakeLicenseRepository, at};

    use super::LicenseCleanupService;

    async fn seed(repository: &FakeLicenseRepository, key: &str, expiration: ExpirationPolicy) {
        let license = License::issue(
            TeamId::new(),
            LicenseKey::parse(key).unwrap_or_else(|_| unreachable!()),
            LicenseSettings {
                expiration,
                ..LicenseSettings::default()
            },
            &LicenseExpirationEvaluator::default(),
            at("2024-01-01T00:00:00Z"),
        )
        .unwrap_or_else(|_| unreachable!());
        assert!(repository.create_license(license).await.is_ok());
    }

    #[tokio::test]
    async fn purges_only_licenses_past_retention() {
        let repository = Arc::new(FakeLicenseRepository::default());
        let audit = Arc::new(FakeAuditRepository::default());

        seed(
            &repository,
            "AAAAA-AAAAA-AAAAA-AAAAA-AAAAA",
            ExpirationPolicy::after_days(1, ExpirationStart::Creation),
        )
        .await;
        seed(
            &repository,
            "BBBBB-BBBBB-BBBBB-BBBBB-BBBBB",
            ExpirationPolicy::after_days(20, ExpirationStart::Creation),
        )
        .await;
        seed(
            &repository,
            "CCCCC-CCCCC-CCCCC-CCCCC-CCCCC",
            ExpirationPolicy::never(),
        )
        .await;

        let service = LicenseCleanupService::new(repository.clone(), audit.clone());
        let purged = service
            .purge_expired(at("2024-02-01T00:00:00Z"), TimeDelta::days(30), 10)
            .await;

        assert_eq!(purged.ok(), Some(1));
        let remaining = repository.licenses.lock().await;
        assert_eq!(remaining.len(), 2);
        assert!(
            remaining
                .values()
                .all(|license| license.key().as_str() != "AAAAA-AAAAA-AAAAA-AAAAA-AAAAA")
        );

        let events = audit.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::LicensePurged);
        assert_eq!(events[0].subject, "system");
    }

    #[tokio::test]
    async fn retention_boundary_is_inclusive() {
        let repository = Arc::new(FakeLicenseRepository::default());
        let audit = Arc::new(FakeAuditRepository::default());
        seed(
            &repository,
            "AAAAA-AAAAA-AAAAA-AAAAA-AAAAA",
            ExpirationPolicy::after_days(1, ExpirationStart::Creation),
        )
        .await;
        let service = LicenseCleanupService::new(repository.clone(), audit);

        let early = service
            .purge_expired(at("2024-01-31T23:59:59Z"), TimeDelta::days(30), 10)
            .await;
        assert_eq!(early.ok(), Some(0));

        let exact = service
            .purge_expired(at("2024-02-01T00:00:00Z"), TimeDelta::days(30), 10)
            .await;
        assert_eq!(exact.ok(), Some(1));
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let service = LicenseCleanupService::new(
            Arc::new(FakeLicenseRepository::default()),
            Arc::new(FakeAuditRepository::default()),
        );

        let purged = service
            .purge_expired(at("2024-02-01T00:00:00Z"), TimeDelta::days(30), 0)
            .await;
        assert!(purged.is_err());
    }
}
