//! Retry engine building blocks.
//!
//! - [`RetryContext`] - immutable history of one logical request's retries
//! - [`RetryStrategy`] - context to backoff delay ([`FixedDelay`], [`ExponentialBackoff`])
//! - [`RetryCondition`] - error and context to "retry or not"
//!
//! The loop that ties them together lives in the pipeline's retry middleware.

mod condition;
mod context;
mod strategy;

pub use condition::RetryCondition;
pub use context::RetryContext;
pub use strategy::{ExponentialBackoff, FixedDelay, NoDelay, RetryStrategy};
