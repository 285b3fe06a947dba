use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};

use crate::{db::PoolSettings, monitoring::Cadence};

// ---------------------------------------------------------------------------
// NotifierConfig
// ---------------------------------------------------------------------------

/// Where alert text is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierConfig {
    /// Write alerts to the service log.
    Log,
    /// POST alerts to a webhook, optionally HMAC-signed. Each request is
    /// bounded by `timeout`.
    Webhook {
        url: String,
        secret: Option<String>,
        timeout: Duration,
    },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs the service against the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Seconds to wait for a pooled connection before a session fails.
    pub db_acquire_timeout_secs: u64,
    pub server_host: String,
    pub server_port: u16,
    /// Condition-check loop cadence in seconds.
    pub condition_check_interval_secs: u64,
    /// Expiry-check loop cadence in seconds.
    pub expiry_check_interval_secs: u64,
    /// Medicines expiring within this many days are reported.
    pub expiry_window_days: i64,
    /// Medicines with fewer units than this are low on stock.
    pub low_stock_threshold: i32,
    pub notifier: NotifierConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: optional_var("DATABASE_URL"),
            db_max_connections: positive("DB_MAX_CONNECTIONS", "10")?,
            db_acquire_timeout_secs: positive("DB_ACQUIRE_TIMEOUT_SECS", "5")?,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: parse_var("SERVER_PORT", "8080")?,
            condition_check_interval_secs: positive("CONDITION_CHECK_INTERVAL_SECS", "10")?,
            expiry_check_interval_secs: positive("EXPIRY_CHECK_INTERVAL_SECS", "86400")?,
            expiry_window_days: window_days(parse_var("EXPIRY_WINDOW_DAYS", "7")?)?,
            low_stock_threshold: parse_var("LOW_STOCK_THRESHOLD", "10")?,
            notifier: notifier_from(
                optional_var("NOTIFY_WEBHOOK_URL"),
                optional_var("NOTIFY_WEBHOOK_SECRET"),
                Duration::from_secs(positive("NOTIFY_TIMEOUT_SECS", "10")?),
            ),
        })
    }

    pub fn cadence(&self) -> Cadence {
        Cadence {
            condition_check: Duration::from_secs(self.condition_check_interval_secs),
            expiry_check: Duration::from_secs(self.expiry_check_interval_secs),
        }
    }

    pub fn expiry_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.expiry_window_days)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.db_max_connections,
            acquire_timeout: Duration::from_secs(self.db_acquire_timeout_secs),
        }
    }
}

fn notifier_from(url: Option<String>, secret: Option<String>, timeout: Duration) -> NotifierConfig {
    match url {
        Some(url) => NotifierConfig::Webhook {
            url,
            secret,
            timeout,
        },
        None => NotifierConfig::Log,
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} must be a valid number, got {raw:?}"))
}

fn parse_var<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parse_value(key, &optional(key, default))
}

/// A zero cadence would spin the loop, so it is rejected.
fn positive<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    check_positive(key, parse_var(key, default)?)
}

fn check_positive<T>(key: &str, value: T) -> Result<T>
where
    T: PartialOrd + Default,
{
    anyhow::ensure!(value > T::default(), "{key} must be a positive integer");
    Ok(value)
}

/// Longest accepted expiry look-ahead.
const MAX_EXPIRY_WINDOW_DAYS: i64 = 3650;

fn window_days(days: i64) -> Result<i64> {
    anyhow::ensure!(
        (0..=MAX_EXPIRY_WINDOW_DAYS).contains(&days),
        "EXPIRY_WINDOW_DAYS must be between 0 and {MAX_EXPIRY_WINDOW_DAYS}, got {days}"
    );
    Ok(days)
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Unset and empty both count as absent.
fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_accepts_numbers() {
        assert_eq!(parse_value::<u16>("SERVER_PORT", "8080").unwrap(), 8080);
        assert_eq!(parse_value::<i64>("EXPIRY_WINDOW_DAYS", " 14 ").unwrap(), 14);
    }

    #[test]
    fn parse_value_error_names_the_variable() {
        let err = parse_value::<u16>("SERVER_PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));
    }

    #[test]
    fn zero_cadence_is_rejected() {
        let err = check_positive("CONDITION_CHECK_INTERVAL_SECS", 0).unwrap_err();
        assert!(err.to_string().contains("positive"));
        assert_eq!(check_positive("CONDITION_CHECK_INTERVAL_SECS", 10).unwrap(), 10);
    }

    #[test]
    fn expiry_window_bounds() {
        assert_eq!(window_days(7).unwrap(), 7);
        assert_eq!(window_days(0).unwrap(), 0);
        assert!(window_days(-1).is_err());
        assert!(window_days(100_000).is_err());
    }

    #[test]
    fn webhook_only_when_url_present() {
        let timeout = Duration::from_secs(3);
        assert_eq!(notifier_from(None, Some("s".into()), timeout), NotifierConfig::Log);
        assert_eq!(
            notifier_from(Some("http://hooks.local/x".into()), None, timeout),
            NotifierConfig::Webhook {
                url: "http://hooks.local/x".into(),
                secret: None,
                timeout,
            }
        );
    }

    #[test]
    fn cadence_and_window_conversions() {
        let config = Config {
            database_url: None,
            db_max_connections: 4,
            db_acquire_timeout_secs: 2,
            server_host: "127.0.0.1".into(),
            server_port: 8080,
            condition_check_interval_secs: 10,
            expiry_check_interval_secs: 86_400,
            expiry_window_days: 7,
            low_stock_threshold: 10,
            notifier: NotifierConfig::Log,
        };
        assert_eq!(config.cadence(), Cadence::default());
        assert_eq!(config.expiry_window(), chrono::Duration::days(7));
        assert_eq!(
            config.pool_settings(),
            PoolSettings {
                max_connections: 4,
                acquire_timeout: Duration::from_secs(2),
            }
        );
    }
}
