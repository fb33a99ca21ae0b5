//! Application configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use common::EventCategory;

use crate::error::{ControllerError, Result};

/// Which handlers to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Ownership,
    Population,
    Alert,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 3] = [
        HandlerKind::Ownership,
        HandlerKind::Population,
        HandlerKind::Alert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Ownership => "ownership",
            HandlerKind::Population => "population",
            HandlerKind::Alert => "alert",
        }
    }
}

impl FromStr for HandlerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ownership" => Ok(HandlerKind::Ownership),
            "population" => Ok(HandlerKind::Population),
            "alert" | "alerts" => Ok(HandlerKind::Alert),
            other => Err(format!("unknown handler '{other}'")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Controller configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`, or `PS2MAP_DB_HOST`/`_PORT`/`_USER`/`_PASS`/`_NAME`
/// - `DB_MAX_CONNECTIONS` (default: `10`)
/// - `POLL_INTERVAL_MS` (default: `1000`)
/// - `SETTLE_AGE_MS` (default: `5000`)
/// - `STORE_TIMEOUT_MS` (default: `10000`)
/// - `ALERT_GRACE_SECS` (default: `600`)
/// - `PRESENCE_WINDOW_SECS` (default: `900`)
/// - `REFERENCE_TTL_SECS` (default: `300`)
/// - `ENABLED_HANDLERS` (default: `ownership,population,alert`)
/// - `EXTRA_CATEGORIES`: categories to claim even without a handler
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `METRICS_ADDR`: Prometheus listen address (default: disabled)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub poll_interval: Duration,
    pub settle_age: Duration,
    pub store_timeout: Duration,
    pub alert_grace: Duration,
    pub presence_window: Duration,
    pub reference_ttl: Duration,
    pub enabled_handlers: Vec<HandlerKind>,
    pub extra_categories: Vec<EventCategory>,
    pub log_format: LogFormat,
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://postgres@127.0.0.1:5432/PS2Map".to_string(),
            db_max_connections: 10,
            poll_interval: Duration::from_millis(1000),
            settle_age: Duration::from_millis(5000),
            store_timeout: Duration::from_millis(10_000),
            alert_grace: Duration::from_secs(600),
            presence_window: Duration::from_secs(900),
            reference_ttl: Duration::from_secs(300),
            enabled_handlers: HandlerKind::ALL.to_vec(),
            extra_categories: Vec::new(),
            log_format: LogFormat::Pretty,
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = match var("DATABASE_URL") {
            Some(url) => url,
            None => {
                let host = var("PS2MAP_DB_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
                let port: u16 = parse(&var, "PS2MAP_DB_PORT", 5432)?;
                let user = var("PS2MAP_DB_USER").unwrap_or_else(|| "postgres".to_string());
                let name = var("PS2MAP_DB_NAME").unwrap_or_else(|| "PS2Map".to_string());
                let pass = var("PS2MAP_DB_PASS").ok_or_else(|| {
                    ControllerError::config(
                        "PS2MAP_DB_PASS",
                        "required when DATABASE_URL is not set",
                    )
                })?;
                format!("postgres://{user}:{pass}@{host}:{port}/{name}")
            }
        };

        let enabled_handlers = match var("ENABLED_HANDLERS") {
            Some(list) => parse_list(&list, "ENABLED_HANDLERS")?,
            None => defaults.enabled_handlers,
        };
        let extra_categories = match var("EXTRA_CATEGORIES") {
            Some(list) => parse_list(&list, "EXTRA_CATEGORIES")?,
            None => Vec::new(),
        };

        let log_format = match var("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
            None => LogFormat::Pretty,
            Some(f) if f == "pretty" || f == "text" => LogFormat::Pretty,
            Some(f) if f == "json" => LogFormat::Json,
            Some(other) => {
                return Err(ControllerError::config(
                    "LOG_FORMAT",
                    format!("expected 'pretty' or 'json', got '{other}'"),
                ));
            }
        };

        let metrics_addr = var("METRICS_ADDR")
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .map_err(|e| ControllerError::config("METRICS_ADDR", e.to_string()))
            })
            .transpose()?;

        let config = Self {
            database_url,
            db_max_connections: parse(&var, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            poll_interval: millis(&var, "POLL_INTERVAL_MS", defaults.poll_interval)?,
            settle_age: millis(&var, "SETTLE_AGE_MS", defaults.settle_age)?,
            store_timeout: millis(&var, "STORE_TIMEOUT_MS", defaults.store_timeout)?,
            alert_grace: secs(&var, "ALERT_GRACE_SECS", defaults.alert_grace)?,
            presence_window: secs(&var, "PRESENCE_WINDOW_SECS", defaults.presence_window)?,
            reference_ttl: secs(&var, "REFERENCE_TTL_SECS", defaults.reference_ttl)?,
            enabled_handlers,
            extra_categories,
            log_format,
            metrics_addr,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.db_max_connections == 0 {
            return Err(ControllerError::config(
                "DB_MAX_CONNECTIONS",
                "must be at least 1",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ControllerError::config(
                "POLL_INTERVAL_MS",
                "must be greater than zero",
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(ControllerError::config(
                "STORE_TIMEOUT_MS",
                "must be greater than zero",
            ));
        }
        if self.presence_window.is_zero() {
            return Err(ControllerError::config(
                "PRESENCE_WINDOW_SECS",
                "must be greater than zero",
            ));
        }
        if self.enabled_handlers.is_empty() && self.extra_categories.is_empty() {
            return Err(ControllerError::config(
                "ENABLED_HANDLERS",
                "at least one handler or category is required",
            ));
        }
        Ok(())
    }

    pub fn is_enabled(&self, kind: HandlerKind) -> bool {
        self.enabled_handlers.contains(&kind)
    }

    /// Returns the database URL with the password masked, for logging.
    pub fn redacted_database_url(&self) -> String {
        let Some((scheme, rest)) = self.database_url.split_once("://") else {
            return self.database_url.clone();
        };
        let Some((credentials, host)) = rest.rsplit_once('@') else {
            return self.database_url.clone();
        };
        match credentials.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => self.database_url.clone(),
        }
    }
}

fn parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ControllerError::config(key, e.to_string())),
        None => Ok(default),
    }
}

fn millis(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration> {
    match var(key) {
        Some(_) => parse(var, key, 0u64).map(Duration::from_millis),
        None => Ok(default),
    }
}

fn secs(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration> {
    match var(key) {
        Some(_) => parse(var, key, 0u64).map(Duration::from_secs),
        None => Ok(default),
    }
}

fn parse_list<T: FromStr>(raw: &str, key: &'static str) -> Result<Vec<T>>
where
    T::Err: std::fmt::Display,
{
    let mut items = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        items.push(
            part.parse()
                .map_err(|e: T::Err| ControllerError::config(key, e.to_string()))?,
        );
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/map")]).unwrap();
        assert_eq!(config.database_url, "postgres://localhost/map");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.settle_age, Duration::from_secs(5));
        assert_eq!(config.alert_grace, Duration::from_secs(600));
        assert_eq!(config.enabled_handlers, HandlerKind::ALL.to_vec());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn test_url_from_parts() {
        let config = load(&[
            ("PS2MAP_DB_HOST", "db"),
            ("PS2MAP_DB_USER", "map"),
            ("PS2MAP_DB_PASS", "secret"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "postgres://map:secret@db:5432/PS2Map");
        assert_eq!(
            config.redacted_database_url(),
            "postgres://map:***@db:5432/PS2Map"
        );
    }

    #[test]
    fn test_password_required_without_url() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("PS2MAP_DB_PASS"));
    }

    #[test]
    fn test_durations_and_lists() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/map"),
            ("POLL_INTERVAL_MS", "250"),
            ("SETTLE_AGE_MS", "0"),
            ("ALERT_GRACE_SECS", "30"),
            ("ENABLED_HANDLERS", "ownership, alert"),
            ("EXTRA_CATEGORIES", "player_blip"),
            ("LOG_FORMAT", "JSON"),
            ("METRICS_ADDR", "0.0.0.0:9000"),
        ])
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(config.settle_age.is_zero());
        assert_eq!(config.alert_grace, Duration::from_secs(30));
        assert!(config.is_enabled(HandlerKind::Alert));
        assert!(!config.is_enabled(HandlerKind::Population));
        assert_eq!(config.extra_categories, vec![EventCategory::PlayerBlip]);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.metrics_addr.unwrap().port(), 9000);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let url = ("DATABASE_URL", "postgres://localhost/map");
        assert!(load(&[url, ("POLL_INTERVAL_MS", "soon")]).is_err());
        assert!(load(&[url, ("POLL_INTERVAL_MS", "0")]).is_err());
        assert!(load(&[url, ("ENABLED_HANDLERS", "ownership,weather")]).is_err());
        assert!(load(&[url, ("LOG_FORMAT", "xml")]).is_err());
        assert!(load(&[url, ("METRICS_ADDR", "not an address")]).is_err());
        assert!(load(&[url, ("DB_MAX_CONNECTIONS", "0")]).is_err());
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/map"),
            ("SETTLE_AGE_MS", "  "),
        ])
        .unwrap();
        assert_eq!(config.settle_age, Duration::from_secs(5));
    }
}
