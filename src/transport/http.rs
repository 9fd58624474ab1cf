use super::{Transport, TransportError, TransportResponse};
use crate::config::DispatcherConfig;
use crate::types::Credentials;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use reqwest::Proxy;
use serde_json::Value;
use std::env;
use std::time::Duration;
use url::Url;

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        // join() drops the last path segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid provider base URL '{}'", base_url),
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_details(e.to_string())
                    .with_source("http_transport"),
            )
        })?;

        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(
                env::var("AI_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &DispatcherConfig) -> Result<Self> {
        Self::new(&config.base_url, config.http_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint_url(&self, path: &str) -> std::result::Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::Other(format!("invalid endpoint path '{}': {}", path, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        path: &str,
        payload: &Value,
        credentials: &Credentials,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let url = self.endpoint_url(path)?;
        let mut request = self.client.post(url).json(payload);
        for (name, value) in credentials.headers() {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = match serde_json::from_slice(&bytes) {
            Ok(body) => body,
            // error pages from proxies and gateways keep their status
            Err(_) if !(200..300).contains(&status) => {
                if bytes.is_empty() {
                    Value::Null
                } else {
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                }
            }
            Err(e) => {
                return Err(TransportError::Decode(format!(
                    "HTTP {} returned a non-JSON body: {}",
                    status, e
                )))
            }
        };

        Ok(TransportResponse { status, body })
    }
}
