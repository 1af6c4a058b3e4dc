use std::env;
use std::time::Duration;

use chrono::TimeDelta;
use keyward_application::{DEFAULT_LICENSE_RETENTION_DAYS, DEFAULT_WEBHOOK_MAX_ATTEMPTS};
use keyward_core::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkerConfig {
    pub(crate) database_url: String,
    pub(crate) poll_interval_ms: u64,
    pub(crate) webhook_batch_size: usize,
    pub(crate) webhook_max_attempts: u32,
    pub(crate) webhook_timeout_seconds: u64,
    pub(crate) license_retention_days: u32,
    pub(crate) cleanup_interval_seconds: u64,
}

impl WorkerConfig {
    pub(crate) fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| AppError::Validation("DATABASE_URL is required".to_owned()))?;

        let config = Self {
            database_url,
            poll_interval_ms: parse_or(&lookup, "WORKER_POLL_INTERVAL_MS", 5_000)?,
            webhook_batch_size: parse_or(&lookup, "WORKER_WEBHOOK_BATCH_SIZE", 50)?,
            webhook_max_attempts: parse_or(
                &lookup,
                "WEBHOOK_MAX_ATTEMPTS",
                DEFAULT_WEBHOOK_MAX_ATTEMPTS,
            )?,
            webhook_timeout_seconds: parse_or(&lookup, "WEBHOOK_TIMEOUT_SECONDS", 10)?,
            license_retention_days: parse_or(
                &lookup,
                "LICENSE_RETENTION_DAYS",
                DEFAULT_LICENSE_RETENTION_DAYS,
            )?,
            cleanup_interval_seconds: parse_or(&lookup, "LICENSE_CLEANUP_INTERVAL_SECONDS", 3_600)?,
        };

        for (name, value) in [
            ("WORKER_POLL_INTERVAL_MS", config.poll_interval_ms),
            ("WEBHOOK_TIMEOUT_SECONDS", config.webhook_timeout_seconds),
            (
                "LICENSE_CLEANUP_INTERVAL_SECONDS",
                config.cleanup_interval_seconds,
            ),
        ] {
            if value == 0 {
                return Err(AppError::Validation(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if config.webhook_batch_size == 0 {
            return Err(AppError::Validation(
                "WORKER_WEBHOOK_BATCH_SIZE must be greater than zero".to_owned(),
            ));
        }

        if config.webhook_max_attempts == 0 {
            return Err(AppError::Validation(
                "WEBHOOK_MAX_ATTEMPTS must be greater than zero".to_owned(),
            ));
        }

        Ok(config)
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_seconds)
    }

    pub(crate) fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub(crate) fn retention(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.license_retention_days))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}
