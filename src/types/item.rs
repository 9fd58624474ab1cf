use super::EndpointKind;
use serde_json::Value;
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItemId(Uuid);

impl WorkItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque provider credentials, forwarded as request headers.
///
/// The dispatcher never inspects these beyond forwarding them; `Debug` output
/// redacts the values.
#[derive(Clone, Default)]
pub struct Credentials {
    headers: Vec<(String, String)>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Authorization: Bearer <api_key>`
    pub fn bearer(api_key: impl AsRef<str>) -> Self {
        Self::new().with_header("Authorization", format!("Bearer {}", api_key.as_ref()))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.headers.iter().map(|(k, _)| (k, "<redacted>")))
            .finish()
    }
}

/// A single request submitted to the dispatcher. Consumed exactly once.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub endpoint: EndpointKind,
    /// Request path relative to the provider base URL.
    pub path: String,
    pub payload: Value,
    pub credentials: Credentials,
    /// Caller metadata copied into the error log on terminal failure.
    pub metadata: Option<Value>,
    pub created_at: SystemTime,
}

impl WorkItem {
    pub fn new(endpoint: EndpointKind, payload: Value, credentials: Credentials) -> Self {
        Self {
            id: WorkItemId::new(),
            endpoint,
            path: endpoint.path().to_string(),
            payload,
            credentials,
            metadata: None,
            created_at: SystemTime::now(),
        }
    }

    /// Override the request path (e.g. a provider-specific route for the same shape).
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bearer_credentials() {
        let creds = Credentials::bearer("sk-secret");
        let headers: Vec<_> = creds.headers().collect();
        assert_eq!(headers, vec![("Authorization", "Bearer sk-secret")]);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::bearer("sk-secret").with_header("OpenAI-Organization", "org-1");
        let dbg = format!("{:?}", creds);
        assert!(!dbg.contains("sk-secret"));
        assert!(!dbg.contains("org-1"));
        assert!(dbg.contains("Authorization"));
    }

    #[test]
    fn test_work_item_defaults() {
        let item = WorkItem::new(
            EndpointKind::Embedding,
            json!({"input": "hello"}),
            Credentials::new(),
        );
        assert_eq!(item.path, "embeddings");
        assert!(item.metadata.is_none());

        let other = WorkItem::new(EndpointKind::Embedding, json!({}), Credentials::new())
            .with_path("v2/embeddings")
            .with_metadata(json!({"row": 7}));
        assert_ne!(item.id, other.id);
        assert_eq!(other.path, "v2/embeddings");
        assert_eq!(other.metadata, Some(json!({"row": 7})));
    }
}
