//! Public IP lookup through an IP-echo web service.

use std::net::IpAddr;
use std::time::Duration;

use crate::error::{AppError, DiagError, DiagResult};

pub struct ExternalIpService {
    client: reqwest::Client,
    url: String,
}

impl ExternalIpService {
    pub fn new(url: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("netmond/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }

    /// Ask the echo service which address our requests come from.
    pub async fn lookup(&self) -> DiagResult<IpAddr> {
        tracing::debug!("Looking up external IP via {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| external_failure(&self.url, e))?;

        let body = response
            .text()
            .await
            .map_err(|e| external_failure(&self.url, e))?;

        parse_ip(&body)
    }
}

fn external_failure(url: &str, err: reqwest::Error) -> DiagError {
    tracing::warn!("External IP lookup via {} failed: {}", url, err);
    DiagError::ExternalService("Unable to retrieve external IP address".to_string())
}

fn parse_ip(body: &str) -> DiagResult<IpAddr> {
    body.trim().parse().map_err(|_| {
        tracing::warn!("IP echo service returned an unexpected body: {:?}", body);
        DiagError::ExternalService("Unable to retrieve external IP address".to_string())
    })
}
