use std::env;
use crate::error::AppError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// Where and how the datastore REST API is reached
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub interval_secs: u64,
    pub max_requests: u64,
    pub cleanup_interval_secs: u64,
    pub max_tracked_keys: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://apis.roblox.com".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_requests: 30,
            cleanup_interval_secs: 300,
            max_tracked_keys: 10_000,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    what: &str,
) -> Result<T, AppError> {
    lookup(name)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse::<T>()
        .map_err(|_| AppError::Configuration(format!("{} must be {}", name, what)))
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        // App config
        let app_name = lookup("APP_NAME").unwrap_or_else(|| "datastore-console".to_string());
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        // Server config
        let server_host = lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let server_port: u16 = parse_var(&lookup, "SERVER_PORT", "8080", "a valid port number")?;

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Upstream datastore API
        let defaults = UpstreamConfig::default();
        let base_url = lookup("DATASTORE_API_BASE_URL")
            .unwrap_or(defaults.base_url)
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url).map_err(|e| {
            AppError::Configuration(format!("DATASTORE_API_BASE_URL must be a valid URL: {}", e))
        })?;

        let timeout_secs: u64 =
            parse_var(&lookup, "DATASTORE_API_TIMEOUT_SECS", "30", "a valid number")?;
        let connect_timeout_secs: u64 =
            parse_var(&lookup, "DATASTORE_API_CONNECT_TIMEOUT_SECS", "10", "a valid number")?;

        // Rate limiting
        let interval_secs: u64 =
            parse_var(&lookup, "RATE_LIMIT_INTERVAL_SECS", "60", "a valid number")?;
        let max_requests: u64 =
            parse_var(&lookup, "RATE_LIMIT_MAX_REQUESTS", "30", "a valid number")?;
        let cleanup_interval_secs: u64 =
            parse_var(&lookup, "RATE_LIMIT_CLEANUP_INTERVAL_SECS", "300", "a valid number")?;
        let max_tracked_keys: usize =
            parse_var(&lookup, "RATE_LIMIT_MAX_TRACKED_KEYS", "10000", "a valid number")?;

        if interval_secs == 0 {
            return Err(AppError::Configuration(
                "RATE_LIMIT_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if cleanup_interval_secs == 0 || max_tracked_keys == 0 {
            return Err(AppError::Configuration(
                "RATE_LIMIT_CLEANUP_INTERVAL_SECS and RATE_LIMIT_MAX_TRACKED_KEYS must be greater than zero"
                    .to_string(),
            ));
        }

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                cors_origins,
            },
            upstream: UpstreamConfig {
                base_url,
                timeout_secs,
                connect_timeout_secs,
            },
            rate_limit: RateLimitConfig {
                interval_secs,
                max_requests,
                cleanup_interval_secs,
                max_tracked_keys,
            },
        })
    }
}
