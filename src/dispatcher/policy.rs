use crate::transport::TransportResponse;
use crate::Error;
use serde_json::Value;
use std::time::Duration;

/// Internal decision for how to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Retry policy for the dispatch loop.
///
/// - every retryable error gets another attempt while attempts remain
/// - a rate-limit signal adds a fixed pause before the next attempt
/// - nothing is slept after the final attempt
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, rate_limit_backoff: Duration) -> Self {
        Self {
            max_attempts,
            rate_limit_backoff,
        }
    }

    /// `attempts_left` counts attempts still available after the one that failed.
    pub fn decide(&self, err: &Error, attempts_left: u32) -> Decision {
        if !err.is_retryable() || attempts_left == 0 {
            return Decision::Fail;
        }
        let delay = if err.is_rate_limited() {
            self.rate_limit_backoff
        } else {
            Duration::ZERO
        };
        Decision::Retry { delay }
    }
}

pub(crate) fn is_rate_limit_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("rate limit")
}

/// Turn a completed HTTP exchange into the provider's answer or a provider error.
///
/// A body with an `error` field is a failure even under a 2xx status.
pub(crate) fn classify(response: TransportResponse) -> Result<Value, Error> {
    let status = response.status;
    if let Some(error) = response.body.get("error").filter(|e| !e.is_null()) {
        let message = provider_message(error);
        if status == 429 || is_rate_limit_message(&message) {
            return Err(Error::ProviderRateLimited { message });
        }
        return Err(Error::Provider {
            status: Some(status),
            message,
        });
    }

    if !response.is_success() {
        let message = match &response.body {
            Value::String(text) if !text.trim().is_empty() => {
                format!("HTTP {}: {}", status, excerpt(text))
            }
            _ => format!("HTTP {}", status),
        };
        if status == 429 || is_rate_limit_message(&message) {
            return Err(Error::ProviderRateLimited { message });
        }
        return Err(Error::Provider {
            status: Some(status),
            message,
        });
    }

    Ok(response.body)
}

const EXCERPT_CHARS: usize = 200;

// Plain-text error pages are kept short in logs.
fn excerpt(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn provider_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => error.to_string(),
        },
        other => other.to_string(),
    }
}
