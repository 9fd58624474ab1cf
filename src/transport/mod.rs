//! 传输层：向模型服务商发送单次 HTTP 请求。
//!
//! # Transport Module
//!
//! The dispatcher only needs "send a request, get a status and a JSON body, or
//! a transport error". [`Transport`] is that seam; [`HttpTransport`] is the
//! reqwest-backed implementation used in production. Tests substitute a
//! scripted implementation.

mod http;

pub use http::HttpTransport;

use crate::types::Credentials;
use async_trait::async_trait;
use serde_json::Value;

/// Raw outcome of a completed HTTP exchange. Classification (provider error,
/// rate limit, success) is the dispatcher's job.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `payload` as JSON to `path` (relative to the provider base URL),
    /// forwarding `credentials` as headers.
    async fn send(
        &self,
        path: &str,
        payload: &Value,
        credentials: &Credentials,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Other(String),
}
