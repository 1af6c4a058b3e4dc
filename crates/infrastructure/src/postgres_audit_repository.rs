use std::str::FromStr;

use async_trait::async_trait;
use keyward_application::{AuditEvent, AuditRepository};
use keyward_core::{AppError, AppResult, TeamId};
use keyward_domain::AuditAction;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// PostgreSQL-backed append-only audit repository.
///
/// Actions are stored as their dotted storage values, e.g. `license.suspended`.
#[derive(Clone)]
pub struct PostgresAuditRepository {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct AuditEntryRow {
    team_id: Uuid,
    subject: String,
    action: String,
    resource_type: String,
    resource_id: String,
    detail: Option<String>,
}

impl TryFrom<AuditEntryRow> for AuditEvent {
    type Error = AppError;

    fn try_from(row: AuditEntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            team_id: TeamId::from_uuid(row.team_id),
            subject: row.subject,
            action: AuditAction::from_str(row.action.as_str()).map_err(|error| {
                AppError::Internal(format!("stored audit entry is unreadable: {error}"))
            })?,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            detail: row.detail,
        })
    }
}

impl PostgresAuditRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a team's events in append order.
    pub async fn events_for_team(&self, team_id: TeamId) -> AppResult<Vec<AuditEvent>> {
        sqlx::query_as::<_, AuditEntryRow>(
            r#"
            SELECT team_id, subject, action, resource_type, resource_id, detail
            FROM audit_log_entries
            WHERE team_id = $1
            ORDER BY id
            "#,
        )
        .bind(team_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list audit entries: {error}")))?
        .into_iter()
        .map(AuditEvent::try_from)
        .collect()
    }
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
    async fn append_event(&self, event: AuditEvent) -> AppResult<()> {
        let AuditEvent {
            team_id,
            subject,
            action,
            resource_type,
            resource_id,
            detail,
        } = event;

        sqlx::query(
            r#"
            INSERT INTO audit_log_entries (
                team_id,
                subject,
                action,
                resource_type,
                resource_id,
                detail
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(team_id.as_uuid())
        .bind(subject)
        .bind(action.as_str())
        .bind(resource_type)
        .bind(resource_id)
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to append '{}' audit entry: {error}",
                action.as_str()
            ))
        })?;

        Ok(())
    }
}
