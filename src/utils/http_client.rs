use reqwest::Client;
use std::time::Duration;

use crate::config::settings::UpstreamConfig;
use crate::error::AppError;

pub fn new_api_client(config: &UpstreamConfig) -> Result<Client, AppError> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        // Below typical upstream keep-alive so stale pooled connections are not reused
        .pool_idle_timeout(Some(Duration::from_secs(50)))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))
}
