//! # ai-dispatch
//!
//! 在请求数与令牌数双重配额下，向大模型服务商并发提交请求的调度器。
//!
//! Bounded-concurrency dispatcher for LLM provider HTTP APIs. Requests are
//! admitted against two independently capped budgets (requests per interval
//! and tokens per interval) and transient failures are retried with backoff.
//!
//! ## Core Ideas
//!
//! - **Predict, then admit**: every request's token cost is estimated locally
//!   before it is sent, and only admitted when both budgets can cover it
//! - **Reset-style budgets**: capacity is restored to its maximum once per
//!   interval, never drip-fed
//! - **Terminal outcomes only**: retries happen inside the dispatcher; callers
//!   see a response, [`Error::AttemptsExhausted`], [`Error::MalformedPayload`]
//!   or a cancellation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_dispatch::{Credentials, Dispatcher, DispatcherConfig, EndpointKind};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> ai_dispatch::Result<()> {
//!     let config = DispatcherConfig::default()
//!         .with_max_requests_per_interval(500)
//!         .with_max_tokens_per_interval(40_000)
//!         .apply_env_overrides();
//!     let dispatcher = Dispatcher::start(config)?;
//!
//!     let handle = dispatcher.submit(
//!         EndpointKind::Embedding,
//!         json!({"model": "text-embedding-3-small", "input": "hello"}),
//!         Credentials::bearer(std::env::var("OPENAI_API_KEY").unwrap_or_default()),
//!     )?;
//!     let response = handle.await?;
//!     println!("{}", response);
//!
//!     dispatcher.drain().await;
//!     println!("{:?}", dispatcher.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Dispatcher configuration (YAML + env) |
//! | [`dispatcher`] | Worker pool, admission, retry and failure logging |
//! | [`queue`] | FIFO request queue with close signal |
//! | [`resilience`] | Dual-resource capacity tracker |
//! | [`sink`] | Append-only error log |
//! | [`status`] | Dispatch counters |
//! | [`tokens`] | Token encoders and request cost estimation |
//! | [`transport`] | Outbound HTTP call |
//! | [`types`] | Endpoints, work items, credentials |

pub mod config;
pub mod dispatcher;
pub mod queue;
pub mod resilience;
pub mod sink;
pub mod status;
pub mod tokens;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::DispatcherConfig;
pub use dispatcher::{CancelHandle, DispatchHandle, Dispatcher, DispatcherBuilder};
pub use resilience::{CapacitySnapshot, CapacityTracker};
pub use sink::{ErrorLogEntry, ErrorSink, InMemoryErrorSink, JsonlErrorSink};
pub use status::{StatusSnapshot, StatusTracker};
pub use tokens::{CostEstimator, EstimateError, TokenEncoder};
pub use transport::{Transport, TransportError, TransportResponse};
pub use types::{Credentials, EndpointKind, WorkItem, WorkItemId};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
