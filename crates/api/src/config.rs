//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use jobgate_infra::jobs::{JobExecutorConfig, RecurringSchedulerConfig};
use jobgate_metering::MeteringConfig;
use jobgate_observability::LogFormat;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind: SocketAddr,
    /// Postgres URL for the usage ledger; in-memory when unset.
    pub database_url: Option<String>,
    /// JSON plan table; takes precedence over the `user_subscriptions` table.
    pub subscriptions_file: Option<PathBuf>,
    pub log_format: LogFormat,
    pub metering: MeteringConfig,
    pub executor: JobExecutorConfig,
    pub scheduler: RecurringSchedulerConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            subscriptions_file: None,
            log_format: LogFormat::Json,
            metering: MeteringConfig::default(),
            executor: JobExecutorConfig::default(),
            scheduler: RecurringSchedulerConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = parse(&lookup, "JOBGATE_BIND")? {
            config.bind = bind;
        }
        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        config.subscriptions_file = lookup("JOBGATE_SUBSCRIPTIONS_FILE")
            .filter(|path| !path.trim().is_empty())
            .map(|path| PathBuf::from(path.trim()));
        if let Some(format) = parse(&lookup, "JOBGATE_LOG_FORMAT")? {
            config.log_format = format;
        }

        if let Some(service) = lookup("JOBGATE_SERVICE").filter(|s| !s.trim().is_empty()) {
            config.metering = config.metering.with_service(service.trim());
        }
        let daily = parse(&lookup, "JOBGATE_FREE_DAILY_LIMIT")?.unwrap_or(config.metering.free_daily_limit);
        let monthly = parse(&lookup, "JOBGATE_FREE_MONTHLY_LIMIT")?.unwrap_or(config.metering.free_monthly_limit);
        config.metering = config.metering.with_free_limits(daily, monthly);
        if let Some(exempt) = parse(&lookup, "JOBGATE_FIRST_USE_EXEMPTION")? {
            config.metering = config.metering.with_first_use_exemption(exempt);
        }

        if let Some(workers) = parse::<usize>(&lookup, "JOBGATE_WORKERS")? {
            if workers == 0 {
                return Err(invalid("JOBGATE_WORKERS", "0", "must be at least 1"));
            }
            config.executor = config.executor.with_workers(workers);
        }
        if let Some(ms) = parse::<u64>(&lookup, "JOBGATE_POLL_INTERVAL_MS")? {
            config.executor = config.executor.with_poll_interval(Duration::from_millis(ms.max(1)));
        }
        if let Some(secs) = parse::<u64>(&lookup, "JOBGATE_TICK_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(invalid("JOBGATE_TICK_INTERVAL_SECS", "0", "must be at least 1"));
            }
            config.scheduler = config.scheduler.with_tick_interval(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(var, &raw, e.to_string())),
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Result<ApiConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ApiConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = from(&[]).unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert!(config.database_url.is_none());
        assert!(config.subscriptions_file.is_none());
        assert_eq!(config.metering, MeteringConfig::default());
        assert_eq!(config.executor.workers, 4);
        assert_eq!(config.scheduler.tick_interval, Duration::from_secs(1));
    }

    #[test]
    fn overrides_are_applied() {
        let config = from(&[
            ("JOBGATE_BIND", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/jobgate"),
            ("JOBGATE_SUBSCRIPTIONS_FILE", "/etc/jobgate/plans.json"),
            ("JOBGATE_SERVICE", "pattern-scan"),
            ("JOBGATE_FREE_DAILY_LIMIT", "5"),
            ("JOBGATE_FIRST_USE_EXEMPTION", "false"),
            ("JOBGATE_WORKERS", "8"),
            ("JOBGATE_POLL_INTERVAL_MS", "25"),
        ])
        .unwrap();

        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/jobgate"));
        assert_eq!(config.subscriptions_file, Some(PathBuf::from("/etc/jobgate/plans.json")));
        assert_eq!(config.metering.service, "pattern-scan");
        assert_eq!(config.metering.free_daily_limit, 5);
        assert_eq!(config.metering.free_monthly_limit, 10);
        assert!(!config.metering.first_use_exemption);
        assert_eq!(config.executor.workers, 8);
        assert_eq!(config.executor.poll_interval, Duration::from_millis(25));
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = from(&[("JOBGATE_FREE_MONTHLY_LIMIT", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "JOBGATE_FREE_MONTHLY_LIMIT", .. }));

        assert!(from(&[("JOBGATE_WORKERS", "0")]).is_err());
        assert!(from(&[("JOBGATE_FIRST_USE_EXEMPTION", "maybe")]).is_err());
    }
}
