use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::domain::PackageId;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: EngineConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Upper bound for `LISTING_CACHE_TTL_SECS`.
pub const MAX_CACHE_TTL_SECS: u64 = 86_400;

/// Entitlement, cache and sweep settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub free_plan_id: PackageId,
    /// Zero disables listing and profile caching.
    pub listing_cache_ttl_secs: u64,
    pub expiry_sweep_interval: Duration,
    pub expiry_sweep_concurrency: usize,
    pub package_lookup_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            free_plan_id: PackageId("free".to_string()),
            listing_cache_ttl_secs: 30,
            expiry_sweep_interval: Duration::from_secs(3600),
            expiry_sweep_concurrency: 8,
            package_lookup_timeout: Duration::from_millis(2000),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let free_plan_id = env::var("FREE_PLAN_ID")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PackageId)
            .unwrap_or(defaults.free_plan_id);

        let listing_cache_ttl_secs =
            numeric_var("LISTING_CACHE_TTL_SECS", defaults.listing_cache_ttl_secs)?;
        if listing_cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::OutOfRange {
                key: "LISTING_CACHE_TTL_SECS",
                value: listing_cache_ttl_secs,
                max: MAX_CACHE_TTL_SECS,
            });
        }

        let sweep_secs = numeric_var(
            "EXPIRY_SWEEP_INTERVAL_SECS",
            defaults.expiry_sweep_interval.as_secs(),
        )?;
        if sweep_secs == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "EXPIRY_SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        let concurrency = numeric_var(
            "EXPIRY_SWEEP_CONCURRENCY",
            defaults.expiry_sweep_concurrency as u64,
        )?;
        let timeout_ms = numeric_var(
            "PACKAGE_LOOKUP_TIMEOUT_MS",
            defaults.package_lookup_timeout.as_millis() as u64,
        )?;

        Ok(Self {
            free_plan_id,
            listing_cache_ttl_secs,
            expiry_sweep_interval: Duration::from_secs(sweep_secs),
            expiry_sweep_concurrency: usize::try_from(concurrency.max(1)).unwrap_or(1),
            package_lookup_timeout: Duration::from_millis(timeout_ms.max(1)),
        })
    }
}

fn numeric_var(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    OutOfRange { key: &'static str, value: u64, max: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a positive integer, got '{value}'")
            }
            ConfigError::OutOfRange { key, value, max } => {
                write!(f, "{key} must be at most {max}, got {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::OutOfRange { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
