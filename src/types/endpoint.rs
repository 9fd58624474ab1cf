use crate::tokens::EstimateError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shape category of a provider request. Governs cost estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Chat,
    Completion,
    Embedding,
}

static VERSIONED_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[^/]+(/.+)?/v\d+/(.+)$").expect("static endpoint regex is valid")
});

impl EndpointKind {
    /// Default request path relative to the provider base URL.
    pub fn path(&self) -> &'static str {
        match self {
            EndpointKind::Chat => "chat/completions",
            EndpointKind::Completion => "completions",
            EndpointKind::Embedding => "embeddings",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Chat => "chat",
            EndpointKind::Completion => "completion",
            EndpointKind::Embedding => "embedding",
        }
    }

    /// Resolve an endpoint path such as `chat/completions` or `/embeddings`.
    ///
    /// Any path ending in `completions` that is not under `chat/` is a plain
    /// completion endpoint.
    pub fn from_path(path: &str) -> Result<Self, EstimateError> {
        let trimmed = path.trim_matches('/');
        if trimmed.ends_with("completions") {
            if trimmed.starts_with("chat/") {
                Ok(EndpointKind::Chat)
            } else {
                Ok(EndpointKind::Completion)
            }
        } else if trimmed == "embeddings" {
            Ok(EndpointKind::Embedding)
        } else {
            Err(EstimateError::UnsupportedEndpoint(path.to_string()))
        }
    }

    /// Resolve the endpoint of a full versioned URL,
    /// e.g. `https://api.openai.com/v1/chat/completions`.
    pub fn from_url(url: &str) -> Result<Self, EstimateError> {
        match split_request_url(url) {
            Some((_, endpoint)) => Self::from_path(endpoint),
            None => Err(EstimateError::UnsupportedEndpoint(url.to_string())),
        }
    }
}

/// Split a versioned request URL into `(base_url, endpoint_path)`.
///
/// The base keeps its trailing slash: `https://host/v1/chat/completions`
/// yields `("https://host/v1/", "chat/completions")`.
pub fn split_request_url(url: &str) -> Option<(&str, &str)> {
    let caps = VERSIONED_URL.captures(url)?;
    let endpoint = caps.get(2)?;
    Some((&url[..endpoint.start()], endpoint.as_str()))
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointKind {
    type Err = EstimateError;

    /// Accepts the short names (`chat`, `completion`, `embedding`) or an endpoint path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chat" => Ok(EndpointKind::Chat),
            "completion" => Ok(EndpointKind::Completion),
            "embedding" => Ok(EndpointKind::Embedding),
            _ => Self::from_path(s),
        }
    }
}
