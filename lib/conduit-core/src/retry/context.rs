//! Immutable retry history for one logical request.

use std::sync::Arc;
use std::time::Duration;

use crate::{Error, Request};

/// Retry state of one logical request.
///
/// `attempt` counts retries already consumed (the initial try is not counted)
/// and `max_attempts` bounds the number of retries, so at most
/// `max_attempts + 1` tries are made. `delays_used` and `errors_seen` always
/// hold exactly `attempt` entries.
///
/// Contexts never change in place: [`RetryContext::next_attempt`] returns the
/// successor state.
#[derive(Debug, Clone)]
pub struct RetryContext {
    request: Arc<Request>,
    attempt: u32,
    max_attempts: u32,
    last_error: Option<Arc<Error>>,
    delays_used: Vec<Duration>,
    errors_seen: Vec<Arc<Error>>,
}

impl RetryContext {
    /// Fresh context for the first try of `request`.
    #[must_use]
    pub fn new(request: impl Into<Arc<Request>>, max_attempts: u32) -> Self {
        Self {
            request: request.into(),
            attempt: 0,
            max_attempts,
            last_error: None,
            delays_used: Vec::new(),
            errors_seen: Vec::new(),
        }
    }

    /// Successor context after `error` was retried with `delay`.
    #[must_use]
    pub fn next_attempt(&self, error: Arc<Error>, delay: Duration) -> Self {
        let mut delays_used = Vec::with_capacity(self.delays_used.len() + 1);
        delays_used.extend_from_slice(&self.delays_used);
        delays_used.push(delay);

        let mut errors_seen = Vec::with_capacity(self.errors_seen.len() + 1);
        errors_seen.extend(self.errors_seen.iter().cloned());
        errors_seen.push(Arc::clone(&error));

        Self {
            request: Arc::clone(&self.request),
            attempt: self.attempt.saturating_add(1),
            max_attempts: self.max_attempts,
            last_error: Some(error),
            delays_used,
            errors_seen,
        }
    }

    /// The original request, as first seen by the retry middleware.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Number of retries already consumed.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Configured ceiling on retries.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `true` once no retry is left.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Error that triggered the most recent retry.
    #[must_use]
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_deref()
    }

    /// Delays applied so far, one per retry.
    #[must_use]
    pub fn delays_used(&self) -> &[Duration] {
        &self.delays_used
    }

    /// Errors seen so far, one per retry.
    #[must_use]
    pub fn errors_seen(&self) -> &[Arc<Error>] {
        &self.errors_seen
    }

    /// Sum of every delay applied so far.
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        self.delays_used.iter().sum()
    }
}
