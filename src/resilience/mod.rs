//! 弹性模块：按时间窗口的请求数与 Token 数双重容量控制。
//!
//! # Resilience Primitives Module
//!
//! Admission control for provider rate limits. Providers cap both the number
//! of requests and the number of tokens per interval; [`CapacityTracker`]
//! accounts for both and is shared by every dispatch worker.
//!
//! ## Capacity Tracker
//!
//! ```rust
//! use ai_dispatch::resilience::CapacityTracker;
//!
//! let tracker = CapacityTracker::new(2, 100);
//! assert!(tracker.try_consume(1, 60));
//! assert!(!tracker.try_consume(1, 60)); // only 40 tokens left
//! tracker.replenish();                  // hard reset to the maxima
//! assert!(tracker.try_consume(1, 60));
//! ```
//!
//! The replenishment policy is a reset, not a refill: all capacity becomes
//! available at once on every tick of the replenisher.

pub mod capacity;

pub use capacity::{CapacitySnapshot, CapacityTracker};
