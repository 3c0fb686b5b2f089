//! Control API Client
//!
//! Thin wrapper over the three control-service calls the controller needs:
//! list proxies, ask for a delay test, and switch a selector group.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use tracing::debug;

use crate::error::ApiError;
use crate::models::{DelayResponse, ProxiesResponse, SwitchRequest};

use super::config::AutoclashConfig;

/// Operations consumed from the proxy control service
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// `GET /proxies`
    async fn list_proxies(&self) -> Result<ProxiesResponse, ApiError>;

    /// `GET /proxies/{name}/delay`, returning the reported delay in ms
    async fn proxy_delay(
        &self,
        name: &str,
        test_url: &str,
        timeout: Duration,
    ) -> Result<u32, ApiError>;

    /// `PUT /proxies/{selector}` naming the new member
    async fn switch_proxy(&self, selector: &str, name: &str) -> Result<(), ApiError>;
}

/// reqwest-backed control API client
#[derive(Clone)]
pub struct HttpControlApi {
    client: Client,
    base_url: Url,
    /// Extra slack on top of the service-side delay timeout
    probe_grace: Duration,
}

impl HttpControlApi {
    pub fn new(base_url: &str, api_key: &str, request_timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }

        // every call carries the credential, even an empty one
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", api_key)
                .parse()
                .map_err(|_| ApiError::InvalidUrl("api key is not a valid header value".into()))?,
        );

        let client = Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url,
            probe_grace: Duration::from_secs(1),
        })
    }

    pub fn from_config(config: &AutoclashConfig) -> Result<Self, ApiError> {
        Self::new(&config.api_endpoint, &config.api_key, config.request_timeout())
    }

    /// Base URL with `segments` appended as percent-encoded path segments
    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check_status(resp: Response) -> Result<Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn list_proxies(&self) -> Result<ProxiesResponse, ApiError> {
        let url = self.url(&["proxies"])?;
        let resp = self.client.get(url).send().await?;
        let resp = Self::check_status(resp).await?;
        resp.json::<ProxiesResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn proxy_delay(
        &self,
        name: &str,
        test_url: &str,
        timeout: Duration,
    ) -> Result<u32, ApiError> {
        let url = self.url(&["proxies", name, "delay"])?;
        let timeout_ms = timeout.as_millis().to_string();
        let resp = self
            .client
            .get(url)
            .query(&[("url", test_url), ("timeout", timeout_ms.as_str())])
            .timeout(timeout + self.probe_grace)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let delay = resp
            .json::<DelayResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        debug!(endpoint = name, delay_ms = delay.delay, "delay test");
        Ok(delay.delay)
    }

    async fn switch_proxy(&self, selector: &str, name: &str) -> Result<(), ApiError> {
        let url = self.url(&["proxies", selector])?;
        let body = SwitchRequest {
            name: name.to_string(),
        };
        let resp = self.client.put(url).json(&body).send().await?;
        Self::check_status(resp).await?;
        Ok(())
    }
}
