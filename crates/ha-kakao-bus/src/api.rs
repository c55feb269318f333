//! HTTP client for Kakao's bus arrival endpoint

use std::time::Duration;

use ha_helpers::UpdateFailed;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::consts::{BUSES_IN_BUS_STOP_PATH, DEFAULT_BASE_URL};
use crate::model::BusesResponse;

#[derive(Debug, Error)]
pub enum KakaoBusError {
    /// The endpoint answered with something other than 200
    #[error("Invalid response from API: {status}")]
    Status { status: u16 },

    /// Connection, TLS or body read failure
    #[error("Error communicating with API: {0}")]
    Transport(#[from] reqwest::Error),

    /// 200 with a body that is not the expected JSON
    #[error("Invalid JSON from API: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<KakaoBusError> for UpdateFailed {
    fn from(err: KakaoBusError) -> Self {
        UpdateFailed::new(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme and host, without a trailing slash
    pub base_url: String,
    /// Whole-request timeout; `None` leaves reqwest's default (no timeout)
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: None,
        }
    }
}

impl ClientConfig {
    /// Point the client somewhere else (tests)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct KakaoBusClient {
    http: reqwest::Client,
    base_url: String,
}

impl KakaoBusClient {
    pub fn new(config: ClientConfig) -> Result<Self, KakaoBusError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: config.base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// All buses currently serving a stop
    pub async fn buses_in_bus_stop(&self, bus_stop_id: &str) -> Result<BusesResponse, KakaoBusError> {
        let url = format!("{}{}", self.base_url, BUSES_IN_BUS_STOP_PATH);
        debug!("GET {} busStopId={}", url, bus_stop_id);

        let response = self
            .http
            .get(&url)
            .query(&[("busStopId", bus_stop_id)])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(KakaoBusError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            KakaoBusError::Status { status: 500 }.to_string(),
            "Invalid response from API: 500"
        );

        let decode = serde_json::from_str::<BusesResponse>("<html>").unwrap_err();
        let failed: UpdateFailed = KakaoBusError::Decode(decode).into();
        assert!(failed.to_string().starts_with("Invalid JSON from API"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = ClientConfig::default().with_base_url("http://127.0.0.1:8080/");
        let client = KakaoBusClient::new(config).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "https://m.map.kakao.com");
        assert!(config.timeout.is_none());
    }
}
