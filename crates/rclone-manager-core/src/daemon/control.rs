//! Client for the backing daemon's rc HTTP API.

use crate::config::DaemonConfig;
use crate::error::{ManagerError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Control surface of the backing daemon.
///
/// Implemented over HTTP by [`RcClient`]; tests substitute an in-memory fake.
#[async_trait]
pub trait DaemonControl: Send + Sync {
    /// Readiness probe. `Ok` means the daemon answers requests.
    async fn ping(&self) -> Result<()>;

    /// Full option dump, partitioned by section.
    async fn options(&self) -> Result<Value>;
}

/// [`DaemonControl`] over rclone's rc API (`rclone rcd --rc-no-auth`).
#[derive(Debug, Clone)]
pub struct RcClient {
    client: Client,
    base_url: Url,
}

impl RcClient {
    /// Create a client for the rc API rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DaemonConfig::REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rclone-manager/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ManagerError::Network {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// POST `body` to `endpoint` and return the decoded JSON reply.
    pub async fn call(&self, endpoint: &str, body: Value) -> Result<Value> {
        let url = self.base_url.join(endpoint)?;
        debug!("rc call {} {}", endpoint, body);

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ManagerError::DaemonControl {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
                status_code: None,
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ManagerError::DaemonControl {
            endpoint: endpoint.to_string(),
            message: format!("failed to read response: {}", e),
            status_code: Some(status.as_u16()),
        })?;

        if !status.is_success() {
            return Err(ManagerError::DaemonControl {
                endpoint: endpoint.to_string(),
                message: rc_error_message(&text),
                status_code: Some(status.as_u16()),
            });
        }

        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// rc errors come back as `{"error": "...", ...}`; fall back to the raw body.
fn rc_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl DaemonControl for RcClient {
    async fn ping(&self) -> Result<()> {
        self.call("rc/noop", json!({})).await.map(|_| ())
    }

    async fn options(&self) -> Result<Value> {
        self.call("options/get", json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = RcClient::new("http://localhost:5572").unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:5572/");
        assert_eq!(
            client.base_url().join("options/get").unwrap().as_str(),
            "http://localhost:5572/options/get"
        );
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        assert!(matches!(
            RcClient::new("not a url"),
            Err(ManagerError::Config { .. })
        ));
    }

    #[test]
    fn test_rc_error_message() {
        assert_eq!(
            rc_error_message(r#"{"error":"mount not found","status":500}"#),
            "mount not found"
        );
        assert_eq!(rc_error_message("plain failure\n"), "plain failure");
    }

    #[tokio::test]
    async fn test_ping_unreachable_daemon_fails() {
        // Port 9 (discard) on loopback is closed in any sane test environment.
        let client = RcClient::with_timeout("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        match client.ping().await {
            Err(ManagerError::DaemonControl { endpoint, .. }) => assert_eq!(endpoint, "rc/noop"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
