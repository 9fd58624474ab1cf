use crate::tokens::EstimateError;
use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "max_attempts", "payload.messages[0]")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "encoder_registry")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the dispatcher.
///
/// Retryable kinds (`Transport`, `ProviderRateLimited`, `Provider`) are handled
/// inside the dispatch loop; callers only ever observe terminal outcomes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] EstimateError),

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Provider rate limited: {message}")]
    ProviderRateLimited { message: String },

    #[error("Provider error{}: {message}", format_status(.status))]
    Provider { status: Option<u16>, message: String },

    #[error("Attempts exhausted after {attempts} attempt(s): {}", .errors.join("; "))]
    AttemptsExhausted { attempts: u32, errors: Vec<String> },

    #[error("Request cancelled by caller")]
    Cancelled,

    #[error("Request queue is closed")]
    QueueClosed,

    #[error("Request queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Dispatcher shut down before the request completed")]
    Shutdown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

impl Error {
    /// Create a new configuration error without context
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::configuration_with_context(msg, ErrorContext::new())
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether the dispatch loop may spend another attempt on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::ProviderRateLimited { .. } | Error::Provider { .. }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::ProviderRateLimited { .. })
    }

    /// Terminal failures that must be persisted to the error sink.
    ///
    /// Caller cancellation and shutdown are terminal but never logged.
    pub fn is_loggable_failure(&self) -> bool {
        !matches!(self, Error::Cancelled | Error::Shutdown)
    }
}
