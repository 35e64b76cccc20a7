//! Application configuration loaded from environment variables.

use saga::SagaConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: Postgres connection string; the in-memory ledger is
///   used when unset
/// - `PAYMENT_METHOD`, `PAYMENT_CURRENCY`, `SHIPPING_METHOD`,
///   `NOTIFICATION_TEMPLATE`, `NOTIFICATION_EMAIL`: saga request values
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub saga: SagaConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let saga = SagaConfig {
            payment_method: lookup("PAYMENT_METHOD").unwrap_or(defaults.saga.payment_method),
            currency: lookup("PAYMENT_CURRENCY").unwrap_or(defaults.saga.currency),
            shipping_method: lookup("SHIPPING_METHOD").unwrap_or(defaults.saga.shipping_method),
            notification_template: lookup("NOTIFICATION_TEMPLATE")
                .unwrap_or(defaults.saga.notification_template),
            notification_email: lookup("NOTIFICATION_EMAIL")
                .unwrap_or(defaults.saga.notification_email),
            compensation_reason_fallback: defaults.saga.compensation_reason_fallback,
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            saga,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            saga: SagaConfig::default(),
        }
    }
}
