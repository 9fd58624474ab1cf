//! Token 计数与请求成本估算模块。
//!
//! # Token Counting and Cost Estimation Module
//!
//! This module predicts how many tokens a request will consume before it is
//! sent, so the dispatcher can admit it against the per-interval token budget.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TokenEncoder`] | Trait for "text -> token count" implementations |
//! | [`TiktokenEncoder`] | BPE encoder backed by `tiktoken-rs` |
//! | [`CharacterEstimator`] | Fast character-based approximation (4 chars ≈ 1 token) |
//! | [`CachingEncoder`] | LRU-caching wrapper around any encoder |
//! | [`CostEstimator`] | Per-endpoint request cost (chat, completion, embedding) |
//!
//! ## Example
//!
//! ```rust
//! use ai_dispatch::tokens::{CharacterEstimator, CostEstimator};
//! use ai_dispatch::types::EndpointKind;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let estimator = CostEstimator::new(Arc::new(CharacterEstimator::new()));
//! let cost = estimator
//!     .estimate(&json!({"input": ["abcd", "efgh"]}), EndpointKind::Embedding)
//!     .unwrap();
//! assert_eq!(cost, 2);
//! ```

mod counter;
mod estimator;

pub use counter::{
    encoder_for, CachingEncoder, CharacterEstimator, TiktokenEncoder, TokenEncoder,
};
pub use estimator::{
    CostEstimator, EstimateError, DEFAULT_COMPLETION_COUNT, DEFAULT_MAX_TOKENS,
    MESSAGE_OVERHEAD_TOKENS, REPLY_PRIMING_TOKENS,
};
