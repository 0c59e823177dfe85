//! Configuration types.

use std::collections::HashSet;
use std::time::Duration;

use chrono::FixedOffset;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Contact id of the internal reporting group; its events never touch the ledger.
pub const REPORTING_GROUP_ID: &str = "4bf3c03a-2d33-439c-8b13-efb50531e9c1";

/// Chat platform connection settings.
#[derive(Debug, Clone)]
pub struct ChatPlatformConfig {
    pub base_url: String,
    pub token: SecretString,
    pub timeout: Duration,
}

/// Retry policy for store lookups.
#[derive(Debug, Clone, Copy)]
pub struct LookupPolicy {
    /// `None` polls until the row shows up.
    pub max_attempts: Option<u32>,
    pub backoff: Duration,
}

impl LookupPolicy {
    pub fn bounded(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    pub fn unbounded(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }
}

/// Settings for the deferred action worker.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of actions executing at once.
    pub workers: usize,
    /// Maximum executions of an action that fails with a retryable error.
    pub max_attempts: u32,
    /// Fixed delay before a retryable failure runs again.
    pub retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Full application configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub chat: ChatPlatformConfig,
    pub directory_url: String,
    pub ops_channel_id: Option<String>,
    pub ignored_ids: HashSet<String>,
    pub db_path: String,
    pub port: u16,
    pub lookup: LookupPolicy,
    pub ticket_poll: LookupPolicy,
    pub recheck_interval: Duration,
    pub scheduler: SchedulerConfig,
    pub utc_offset: FixedOffset,
    pub log_dir: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = required("DIGISAC_API_URL")?;
        let token = SecretString::from(required("TOKEN_DIGISAC_API")?);
        let directory_url = required("COMPANIES_API")?;

        let timeout = Duration::from_secs(parsed("LEDGER_UPSTREAM_TIMEOUT_SECS", 120));

        let ops_channel_id = std::env::var("OPS_GROUP_ID")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let ignored_ids = match std::env::var("IGNORED_CONTACT_IDS") {
            Ok(raw) => split_list(&raw),
            Err(_) => HashSet::from([REPORTING_GROUP_ID.to_string()]),
        };

        let db_path = std::env::var("LEDGER_DB_PATH")
            .unwrap_or_else(|_| "./data/support-ledger.db".to_string());

        let port: u16 = parsed("LEDGER_PORT", 8080);

        let lookup = LookupPolicy::bounded(
            parsed("LEDGER_LOOKUP_ATTEMPTS", 3),
            Duration::from_millis(parsed("LEDGER_LOOKUP_BACKOFF_MS", 100)),
        );
        let ticket_poll =
            LookupPolicy::unbounded(Duration::from_millis(parsed("LEDGER_TICKET_POLL_MS", 500)));

        let recheck_interval =
            Duration::from_secs(parsed("LEDGER_RECHECK_INTERVAL_SECS", 3600).max(1));

        let scheduler = SchedulerConfig {
            workers: parsed::<usize>("LEDGER_WORKERS", 8).max(1),
            max_attempts: parsed::<u32>("LEDGER_ACTION_ATTEMPTS", 3).max(1),
            ..SchedulerConfig::default()
        };

        let offset_hours: i32 = parsed("LEDGER_UTC_OFFSET_HOURS", -3);
        let utc_offset =
            FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| ConfigError::InvalidValue {
                key: "LEDGER_UTC_OFFSET_HOURS".into(),
                message: format!("{offset_hours} is outside -23..=23"),
            })?;

        let log_dir = std::env::var("LEDGER_LOG_DIR").ok();

        Ok(Self {
            chat: ChatPlatformConfig {
                base_url,
                token,
                timeout,
            },
            directory_url,
            ops_channel_id,
            ignored_ids,
            db_path,
            port,
            lookup,
            ticket_poll,
            recheck_interval,
            scheduler,
            utc_offset,
            log_dir,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
