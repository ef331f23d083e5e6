//! Per-caller admission control.
//!
//! Three algorithms share the [`RateLimiter`] trait:
//!
//! - [`TokenBucketLimiter`] tolerates bursts up to its capacity and refills
//!   at a fixed rate.
//! - [`SlidingWindowLimiter`] admits at most a fixed weight in any window.
//! - [`AdaptiveLimiter`] is a sliding window whose capacity rises and falls
//!   with the caller's recent success rate, read from the
//!   [`MetricsFeed`](crate::metrics::MetricsFeed).
//!
//! A denial is a normal answer. It carries a retry hint whenever the request
//! could succeed later.

mod adaptive;
mod controller;
mod decision;
mod sliding_window;
mod token_bucket;

pub use adaptive::{adjust_capacity, AdaptiveConfig, AdaptiveLimiter, LOWER_BELOW, RAISE_ABOVE};
pub use controller::{spawn_adjuster, AdmissionConfig, AdmissionController};
pub use decision::{AdmissionDecision, RateLimiter};
pub use sliding_window::{SlidingWindowConfig, SlidingWindowLimiter};
pub use token_bucket::{TokenBucketConfig, TokenBucketLimiter};
