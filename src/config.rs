//! Configuration management for the exchange service.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::admission::AttemptCharging;
use crate::error::{ExchangeError, Result};
use crate::processor::is_currency_code;

/// Prefix for environment variable overrides, e.g.
/// `CURRENCY_EXCHANGE__ADMISSION__MAX_ATTEMPTS=5`.
const ENV_PREFIX: &str = "CURRENCY_EXCHANGE";

/// Main configuration for the exchange service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Exchange rate source configuration
    #[serde(default)]
    pub rates: RatesConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Key clients by `ip:port` instead of by IP alone
    #[serde(default)]
    pub identify_by_port: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            identify_by_port: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 12345))
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Requests a client may make before it is blocked
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long a blocked client must wait, in seconds
    #[serde(default = "default_retry_window")]
    pub retry_window_secs: u64,

    /// Which requests consume an attempt
    #[serde(default)]
    pub charging: AttemptCharging,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_window_secs: default_retry_window(),
            charging: AttemptCharging::default(),
        }
    }
}

impl AdmissionConfig {
    pub fn retry_window(&self) -> Duration {
        Duration::from_secs(self.retry_window_secs)
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_window() -> u64 {
    60
}

/// Exchange rate source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesConfig {
    /// Quote provider endpoint; the base currency is appended as a path segment
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Currency all rates are quoted against
    #[serde(default = "default_base_currency")]
    pub base_currency: String,

    /// Seconds between background refreshes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Timeout for a single fetch, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            base_currency: default_base_currency(),
            refresh_interval_secs: default_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl RatesConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_url() -> String {
    crate::rates::DEFAULT_API_URL.to_string()
}

fn default_base_currency() -> String {
    "USD".to_string()
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    10
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ExchangeConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ExchangeConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ExchangeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: ExchangeConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ExchangeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.admission.max_attempts == 0 {
            return Err(ExchangeError::Config(
                "admission.max_attempts must be positive".to_string(),
            ));
        }
        if self.admission.retry_window_secs == 0 {
            return Err(ExchangeError::Config(
                "admission.retry_window_secs must be positive".to_string(),
            ));
        }
        if self.rates.refresh_interval_secs == 0 {
            return Err(ExchangeError::Config(
                "rates.refresh_interval_secs must be positive".to_string(),
            ));
        }
        if !is_currency_code(&self.rates.base_currency) {
            return Err(ExchangeError::Config(format!(
                "rates.base_currency {:?} is not a three-letter code",
                self.rates.base_currency
            )));
        }
        Ok(())
    }
}
