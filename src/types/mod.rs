//! 类型模块：端点类型、工作项与调用凭据。
//!
//! # Types Module
//!
//! Core data types shared by the queue, the cost estimator and the dispatcher.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EndpointKind`] | Request shape category (chat, completion, embedding) |
//! | [`WorkItem`] | A single unit of work submitted to the dispatcher |
//! | [`WorkItemId`] | Unique identifier assigned at submission |
//! | [`Credentials`] | Opaque headers forwarded with every outbound call |
//!
//! ## Example
//!
//! ```rust
//! use ai_dispatch::types::{Credentials, EndpointKind, WorkItem};
//! use serde_json::json;
//!
//! let kind = EndpointKind::from_path("chat/completions").unwrap();
//! assert_eq!(kind, EndpointKind::Chat);
//!
//! let item = WorkItem::new(
//!     kind,
//!     json!({"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "hi"}]}),
//!     Credentials::bearer("sk-test"),
//! );
//! assert_eq!(item.path, "chat/completions");
//! ```

pub mod endpoint;
pub mod item;

pub use endpoint::{split_request_url, EndpointKind};
pub use item::{Credentials, WorkItem, WorkItemId};
