//! Predicates deciding whether a failed attempt is retried.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::RetryContext;
use crate::{Error, ErrorKind};

type PredicateFn = Arc<dyn Fn(&Error, &RetryContext) -> bool + Send + Sync>;

#[derive(Clone)]
enum Predicate {
    AnyError,
    Kinds(HashSet<ErrorKind>),
    Statuses(HashSet<u16>),
    Custom(PredicateFn),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyError => f.write_str("AnyError"),
            Self::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            Self::Statuses(statuses) => f.debug_tuple("Statuses").field(statuses).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Predicate {
    fn accepts(&self, error: &Error, context: &RetryContext) -> bool {
        match self {
            Self::AnyError => true,
            Self::Kinds(kinds) => kinds.contains(&error.kind()),
            Self::Statuses(statuses) => error.status().is_some_and(|s| statuses.contains(&s)),
            Self::Custom(predicate) => predicate(error, context),
        }
    }
}

/// OR-combination of retry predicates.
///
/// Evaluation order:
/// 1. if the context has no retry left, the answer is `false`;
/// 2. predicates are tried in registration order, the first `true` wins;
/// 3. with no predicate registered the answer is `false`.
///
/// # Example
///
/// ```
/// use conduit_core::{ErrorKind, RetryCondition};
///
/// let condition = RetryCondition::new()
///     .on_kinds([ErrorKind::Network, ErrorKind::Timeout])
///     .on_statuses([429]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RetryCondition {
    predicates: Vec<Predicate>,
}

impl RetryCondition {
    /// Condition with no predicate; it never retries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry network failures, timeouts, 5xx statuses and 429.
    #[must_use]
    pub fn transient() -> Self {
        Self::new()
            .on_kinds([ErrorKind::Network, ErrorKind::Timeout, ErrorKind::ServerError])
            .on_statuses([429])
    }

    /// Accept every error.
    #[must_use]
    pub fn on_any_error(mut self) -> Self {
        self.predicates.push(Predicate::AnyError);
        self
    }

    /// Accept errors whose [`ErrorKind`] is in `kinds`.
    #[must_use]
    pub fn on_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.predicates
            .push(Predicate::Kinds(kinds.into_iter().collect()));
        self
    }

    /// Accept HTTP errors whose status is in `statuses`.
    #[must_use]
    pub fn on_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.predicates
            .push(Predicate::Statuses(statuses.into_iter().collect()));
        self
    }

    /// Accept errors for which `predicate` returns `true`.
    #[must_use]
    pub fn on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error, &RetryContext) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Predicate::Custom(Arc::new(predicate)));
        self
    }

    /// Number of registered predicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// `true` when no predicate is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Decide whether `error` should be retried given `context`.
    #[must_use]
    pub fn should_retry(&self, error: &Error, context: &RetryContext) -> bool {
        if context.is_exhausted() {
            return false;
        }
        self.predicates
            .iter()
            .any(|predicate| predicate.accepts(error, context))
    }
}
