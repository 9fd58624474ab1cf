//! Request cost estimation.

use super::TokenEncoder;
use crate::types::EndpointKind;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Framing overhead of every chat message (`<im_start>{role/name}\n{content}<im_end>\n`).
pub const MESSAGE_OVERHEAD_TOKENS: u64 = 4;
/// Every reply is primed with `<im_start>assistant`.
pub const REPLY_PRIMING_TOKENS: u64 = 2;
pub const DEFAULT_MAX_TOKENS: u64 = 15;
pub const DEFAULT_COMPLETION_COUNT: u64 = 1;

const OVERFLOW_EXPECTATION: &str = "a completion budget (n * max_tokens) that fits in 64 bits";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EstimateError {
    #[error("unsupported endpoint '{0}'")]
    UnsupportedEndpoint(String),

    #[error("invalid payload shape at `{field}`: expected {expected}")]
    InvalidPayloadShape {
        field: String,
        expected: &'static str,
    },
}

impl EstimateError {
    fn shape(field: impl Into<String>, expected: &'static str) -> Self {
        EstimateError::InvalidPayloadShape {
            field: field.into(),
            expected,
        }
    }
}

/// Predicts the token consumption of a request before it is sent.
///
/// The estimate covers both the prompt side (encoded with the configured
/// [`TokenEncoder`]) and the completion budget (`n * max_tokens`), since the
/// provider charges the per-interval token limit for both.
#[derive(Clone)]
pub struct CostEstimator {
    encoder: Arc<dyn TokenEncoder>,
}

impl CostEstimator {
    pub fn new(encoder: Arc<dyn TokenEncoder>) -> Self {
        Self { encoder }
    }

    pub fn encoder(&self) -> &Arc<dyn TokenEncoder> {
        &self.encoder
    }

    pub fn estimate(&self, payload: &Value, kind: EndpointKind) -> Result<u64, EstimateError> {
        let body = payload
            .as_object()
            .ok_or_else(|| EstimateError::shape("$", "a JSON object"))?;
        match kind {
            EndpointKind::Chat => self.chat(body),
            EndpointKind::Completion => self.completion(body),
            EndpointKind::Embedding => self.embedding(body),
        }
    }

    /// Same as [`estimate`](Self::estimate), resolving the endpoint from a request path.
    pub fn estimate_for_path(&self, payload: &Value, path: &str) -> Result<u64, EstimateError> {
        self.estimate(payload, EndpointKind::from_path(path)?)
    }

    fn chat(&self, body: &Map<String, Value>) -> Result<u64, EstimateError> {
        let messages = body
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| EstimateError::shape("messages", "an array of message objects"))?;

        let mut tokens = 0u64;
        for (i, message) in messages.iter().enumerate() {
            let fields = message
                .as_object()
                .ok_or_else(|| EstimateError::shape(format!("messages[{}]", i), "an object"))?;
            tokens = tokens.saturating_add(MESSAGE_OVERHEAD_TOKENS);
            for (key, value) in fields {
                tokens = tokens.saturating_add(self.encode_value(value));
                // name replaces the role token
                if key == "name" {
                    tokens = tokens.saturating_sub(1);
                }
            }
        }
        tokens = tokens.saturating_add(REPLY_PRIMING_TOKENS);
        tokens
            .checked_add(completion_budget(body)?)
            .ok_or_else(|| EstimateError::shape("n", OVERFLOW_EXPECTATION))
    }

    fn completion(&self, body: &Map<String, Value>) -> Result<u64, EstimateError> {
        let prompts = text_inputs(body, "prompt")?;
        let prompt_tokens = prompts
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(self.encode(p)));
        completion_budget(body)?
            .checked_mul(prompts.len() as u64)
            .and_then(|budget| budget.checked_add(prompt_tokens))
            .ok_or_else(|| EstimateError::shape("n", OVERFLOW_EXPECTATION))
    }

    fn embedding(&self, body: &Map<String, Value>) -> Result<u64, EstimateError> {
        let inputs = text_inputs(body, "input")?;
        Ok(inputs
            .iter()
            .fold(0u64, |acc, i| acc.saturating_add(self.encode(i))))
    }

    fn encode(&self, text: &str) -> u64 {
        self.encoder.count(text) as u64
    }

    // Non-string message fields (tool calls, content parts) are counted on
    // their compact JSON text.
    fn encode_value(&self, value: &Value) -> u64 {
        match value {
            Value::Null => 0,
            Value::String(s) => self.encode(s),
            other => self.encode(&other.to_string()),
        }
    }
}

impl std::fmt::Debug for CostEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostEstimator").finish_non_exhaustive()
    }
}

/// `n * max_tokens`, with the usual defaults when either field is absent.
/// A budget that does not fit in a `u64` is rejected, never clamped.
fn completion_budget(body: &Map<String, Value>) -> Result<u64, EstimateError> {
    let max_tokens = optional_u64(body, "max_tokens")?.unwrap_or(DEFAULT_MAX_TOKENS);
    let n = optional_u64(body, "n")?.unwrap_or(DEFAULT_COMPLETION_COUNT);
    n.checked_mul(max_tokens)
        .ok_or_else(|| EstimateError::shape("n", OVERFLOW_EXPECTATION))
}

fn optional_u64(body: &Map<String, Value>, field: &str) -> Result<Option<u64>, EstimateError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| EstimateError::shape(field, "a non-negative integer")),
    }
}

fn text_inputs<'a>(
    body: &'a Map<String, Value>,
    field: &str,
) -> Result<Vec<&'a str>, EstimateError> {
    const EXPECTED: &str = "a string or a list of strings";
    match body.get(field) {
        Some(Value::String(s)) => Ok(vec![s.as_str()]),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_str()
                    .ok_or_else(|| EstimateError::shape(format!("{}[{}]", field, i), "a string"))
            })
            .collect(),
        _ => Err(EstimateError::shape(field, EXPECTED)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// One token per whitespace-separated word; "hi" and "user" are both 1.
    fn word_estimator() -> CostEstimator {
        CostEstimator::new(Arc::new(|text: &str| text.split_whitespace().count()))
    }

    #[test]
    fn test_chat_cost_example() {
        let payload = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 10,
            "n": 1
        });
        let cost = word_estimator()
            .estimate(&payload, EndpointKind::Chat)
            .unwrap();
        // 4 overhead + 1 role + 1 content + 2 priming + 10 completion
        assert_eq!(cost, 18);
    }

    #[test]
    fn test_chat_name_replaces_role_token() {
        let payload = json!({
            "messages": [{"role": "user", "name": "alice", "content": "hello there"}],
            "max_tokens": 0
        });
        let cost = word_estimator()
            .estimate(&payload, EndpointKind::Chat)
            .unwrap();
        // 4 + 1 + (1 - 1) + 2 + 2 priming
        assert_eq!(cost, 4 + 1 + 1 - 1 + 2 + 2);
    }

    #[test]
    fn test_chat_defaults_to_fifteen_tokens_one_completion() {
        let payload = json!({"messages": []});
        let cost = word_estimator()
            .estimate(&payload, EndpointKind::Chat)
            .unwrap();
        assert_eq!(cost, REPLY_PRIMING_TOKENS + DEFAULT_MAX_TOKENS);

        let payload = json!({"messages": [], "n": 3, "max_tokens": null});
        let cost = word_estimator()
            .estimate(&payload, EndpointKind::Chat)
            .unwrap();
        assert_eq!(cost, 2 + 3 * 15);
    }

    #[test]
    fn test_chat_non_string_fields() {
        let payload = json!({
            "messages": [{"role": "assistant", "content": null, "tool_calls": [{"id": "a b"}]}],
            "max_tokens": 0
        });
        let cost = word_estimator()
            .estimate(&payload, EndpointKind::Chat)
            .unwrap();
        // role 1, content 0, tool_calls `[{"id":"a b"}]` is 2 words
        assert_eq!(cost, 4 + 1 + 0 + 2 + 2);
    }

    #[test]
    fn test_oversized_completion_budget_is_rejected() {
        let est = word_estimator();
        let overflow = EstimateError::shape("n", OVERFLOW_EXPECTATION);

        let chat = json!({"messages": [], "n": u64::MAX, "max_tokens": 2});
        assert_eq!(est.estimate(&chat, EndpointKind::Chat), Err(overflow.clone()));

        // the budget alone fits; adding the priming tokens does not
        let chat = json!({"messages": [], "n": u64::MAX, "max_tokens": 1});
        assert_eq!(est.estimate(&chat, EndpointKind::Chat), Err(overflow.clone()));

        let completion = json!({"prompt": ["a", "b"], "n": u64::MAX / 2 + 1, "max_tokens": 1});
        assert_eq!(
            est.estimate(&completion, EndpointKind::Completion),
            Err(overflow)
        );

        let fits = json!({"prompt": "a", "n": u64::MAX - 1, "max_tokens": 1});
        assert_eq!(
            est.estimate(&fits, EndpointKind::Completion).unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn test_chat_rejects_bad_messages() {
        let est = word_estimator();
        let err = est
            .estimate(&json!({"messages": "hi"}), EndpointKind::Chat)
            .unwrap_err();
        assert!(matches!(err, EstimateError::InvalidPayloadShape { ref field, .. } if field == "messages"));

        let err = est
            .estimate(&json!({"messages": ["hi"]}), EndpointKind::Chat)
            .unwrap_err();
        assert!(matches!(err, EstimateError::InvalidPayloadShape { ref field, .. } if field == "messages[0]"));

        let err = est
            .estimate(
                &json!({"messages": [], "max_tokens": "ten"}),
                EndpointKind::Chat,
            )
            .unwrap_err();
        assert!(matches!(err, EstimateError::InvalidPayloadShape { ref field, .. } if field == "max_tokens"));
    }

    #[test]
    fn test_completion_single_and_multiple_prompts() {
        let est = word_estimator();
        let single = json!({"prompt": "translate this text", "max_tokens": 5});
        assert_eq!(est.estimate(&single, EndpointKind::Completion).unwrap(), 3 + 5);

        let multi = json!({"prompt": ["one two", "three"], "max_tokens": 5, "n": 2});
        // prompts 2 + 1, completion budget 2*5 per prompt
        assert_eq!(est.estimate(&multi, EndpointKind::Completion).unwrap(), 3 + 10 * 2);
    }

    #[test]
    fn test_completion_rejects_non_text_prompt() {
        let est = word_estimator();
        let err = est
            .estimate(&json!({"prompt": 42}), EndpointKind::Completion)
            .unwrap_err();
        assert_eq!(
            err,
            EstimateError::InvalidPayloadShape {
                field: "prompt".into(),
                expected: "a string or a list of strings"
            }
        );
        let err = est
            .estimate(&json!({"prompt": ["ok", 1]}), EndpointKind::Completion)
            .unwrap_err();
        assert!(matches!(err, EstimateError::InvalidPayloadShape { ref field, .. } if field == "prompt[1]"));
        assert!(est
            .estimate(&json!({}), EndpointKind::Completion)
            .is_err());
    }

    #[test]
    fn test_embedding_inputs() {
        let est = word_estimator();
        assert_eq!(
            est.estimate(&json!({"input": "a b c"}), EndpointKind::Embedding)
                .unwrap(),
            3
        );
        assert_eq!(
            est.estimate(&json!({"input": ["a b", "c"]}), EndpointKind::Embedding)
                .unwrap(),
            3
        );
        assert!(est
            .estimate(&json!({"input": {"text": "a"}}), EndpointKind::Embedding)
            .is_err());
    }

    #[test]
    fn test_payload_must_be_object() {
        let err = word_estimator()
            .estimate(&json!([1, 2]), EndpointKind::Embedding)
            .unwrap_err();
        assert!(matches!(err, EstimateError::InvalidPayloadShape { ref field, .. } if field == "$"));
    }

    #[test]
    fn test_estimate_for_path() {
        let est = word_estimator();
        assert_eq!(
            est.estimate_for_path(&json!({"input": "x"}), "embeddings")
                .unwrap(),
            1
        );
        assert_eq!(
            est.estimate_for_path(&json!({}), "audio/speech"),
            Err(EstimateError::UnsupportedEndpoint("audio/speech".into()))
        );
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let est = CostEstimator::new(Arc::new(super::super::CharacterEstimator::new()));
        let payload = json!({
            "messages": [
                {"role": "system", "content": "You are terse."},
                {"role": "user", "content": "Summarize the plot of Hamlet."}
            ],
            "max_tokens": 64
        });
        let first = est.estimate(&payload, EndpointKind::Chat).unwrap();
        for _ in 0..10 {
            assert_eq!(est.estimate(&payload, EndpointKind::Chat).unwrap(), first);
        }
    }
}
