//! Plain HTTPS GET used for remote WASM, fonts and remote images

use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

/// Body of a successful GET
#[derive(Debug, Clone)]
pub struct Fetched {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Anything that can GET a URL. Non-2xx responses are errors.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn get(&self, url: &str, user_agent: Option<&str>) -> Result<Fetched>;
}

/// `reqwest`-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn get(&self, url: &str, user_agent: Option<&str>) -> Result<Fetched> {
        let mut req = self.client.get(url);
        if let Some(ua) = user_agent {
            req = req.header(reqwest::header::USER_AGENT, ua);
        }
        let res = req
            .send()
            .await
            .map_err(|e| Error::Network(format!("GET {} failed: {}", url, e)))?;

        let status = res.status();
        if !status.is_success() {
            return Err(Error::Network(format!("GET {} returned {}", url, status)));
        }

        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = res
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read body of {}: {}", url, e)))?
            .to_vec();

        log::debug!("fetched {} ({} bytes)", url, body.len());
        Ok(Fetched {
            url: url.to_string(),
            content_type,
            body,
        })
    }
}
