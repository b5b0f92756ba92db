//! Node configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use outbox::OutboxConfig;
use saga::{CheckoutConfig, ReconcileConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Node configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `FRONTEND_URL`: base of links in outgoing mail
/// - `RPC_TIMEOUT_MS`: request/reply deadline (default 5000)
/// - `PRICING_TIMEOUT_MS`, `PAYMENT_SESSION_TIMEOUT_MS`: checkout deadlines (default 10000)
/// - `OUTBOX_SWEEP_INTERVAL_MS` (default 5000), `OUTBOX_RETENTION_HOURS` (default 48)
/// - `ORDER_PROGRESSION_AGE_SECS` (default 2 days), `ORDER_UNPAID_GRACE_SECS` (default 1 day)
/// - `RECONCILE_INTERVAL_MS` (default 5000)
/// - `DATABASE_URL`: PostgreSQL outbox when set, in-memory otherwise
/// - `CATALOG_PATH`: JSON product list loaded into the catalog at start
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub frontend_url: String,
    pub rpc_timeout: Duration,
    pub pricing_timeout: Duration,
    pub payment_session_timeout: Duration,
    pub outbox_sweep_interval: Duration,
    pub outbox_retention: Duration,
    pub order_progression_age: Duration,
    pub order_unpaid_grace: Duration,
    pub reconcile_interval: Duration,
    pub database_url: Option<String>,
    pub catalog_path: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key/value source.
    ///
    /// Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            parse(&lookup, key).map_or(default, Duration::from_millis)
        };
        let secs = |key: &str, default: Duration| {
            parse(&lookup, key).map_or(default, Duration::from_secs)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            frontend_url: lookup("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            rpc_timeout: millis("RPC_TIMEOUT_MS", defaults.rpc_timeout),
            pricing_timeout: millis("PRICING_TIMEOUT_MS", defaults.pricing_timeout),
            payment_session_timeout: millis(
                "PAYMENT_SESSION_TIMEOUT_MS",
                defaults.payment_session_timeout,
            ),
            outbox_sweep_interval: millis("OUTBOX_SWEEP_INTERVAL_MS", defaults.outbox_sweep_interval),
            outbox_retention: parse::<u64>(&lookup, "OUTBOX_RETENTION_HOURS")
                .map_or(defaults.outbox_retention, |h| Duration::from_secs(h * 60 * 60)),
            order_progression_age: secs("ORDER_PROGRESSION_AGE_SECS", defaults.order_progression_age),
            order_unpaid_grace: secs("ORDER_UNPAID_GRACE_SECS", defaults.order_unpaid_grace),
            reconcile_interval: millis("RECONCILE_INTERVAL_MS", defaults.reconcile_interval),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            catalog_path: lookup("CATALOG_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn checkout(&self) -> CheckoutConfig {
        CheckoutConfig {
            request_timeout: self.rpc_timeout,
            pricing_timeout: self.pricing_timeout,
            session_timeout: self.payment_session_timeout,
            ..CheckoutConfig::default()
        }
    }

    pub fn reconcile(&self) -> ReconcileConfig {
        ReconcileConfig {
            interval: self.reconcile_interval,
            progression_age: self.order_progression_age,
            unpaid_grace: self.order_unpaid_grace,
            request_timeout: self.rpc_timeout,
            ..ReconcileConfig::default()
        }
    }

    pub fn outbox(&self) -> OutboxConfig {
        OutboxConfig {
            sweep_interval: self.outbox_sweep_interval,
            retention: self.outbox_retention,
            ..OutboxConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            frontend_url: "http://localhost:3000/".to_string(),
            rpc_timeout: Duration::from_millis(5000),
            pricing_timeout: Duration::from_millis(10_000),
            payment_session_timeout: Duration::from_millis(10_000),
            outbox_sweep_interval: Duration::from_millis(5000),
            outbox_retention: Duration::from_secs(48 * 60 * 60),
            order_progression_age: Duration::from_secs(2 * 24 * 60 * 60),
            order_unpaid_grace: Duration::from_secs(24 * 60 * 60),
            reconcile_interval: Duration::from_millis(5000),
            database_url: None,
            catalog_path: None,
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.rpc_timeout, Duration::from_secs(5));
        assert_eq!(config.outbox_retention, Duration::from_secs(172_800));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        assert_eq!(from_pairs(&[]), Config::default());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("RPC_TIMEOUT_MS", "250"),
            ("OUTBOX_RETENTION_HOURS", "1"),
            ("ORDER_UNPAID_GRACE_SECS", "60"),
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("CATALOG_PATH", "/etc/shop/catalog.json"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.rpc_timeout, Duration::from_millis(250));
        assert_eq!(config.outbox_retention, Duration::from_secs(3600));
        assert_eq!(config.order_unpaid_grace, Duration::from_secs(60));
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/shop")
        );
        assert_eq!(
            config.catalog_path,
            Some(PathBuf::from("/etc/shop/catalog.json"))
        );
    }

    #[test]
    fn test_garbage_falls_back() {
        let config = from_pairs(&[("PORT", "http"), ("LOG_FORMAT", "xml"), ("DATABASE_URL", "")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_component_configs() {
        let config = from_pairs(&[("RPC_TIMEOUT_MS", "1500"), ("PRICING_TIMEOUT_MS", "3000")]);
        let checkout = config.checkout();
        assert_eq!(checkout.request_timeout, Duration::from_millis(1500));
        assert_eq!(checkout.pricing_timeout, Duration::from_secs(3));
        assert_eq!(config.reconcile().request_timeout, Duration::from_millis(1500));
        assert_eq!(config.outbox().sweep_interval, Duration::from_secs(5));
    }
}
