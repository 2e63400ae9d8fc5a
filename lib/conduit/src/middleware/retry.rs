//! Retry middleware.
//!
//! Wraps the rest of the pipeline in a retry loop driven by a
//! [`RetryCondition`] and a [`RetryStrategy`]:
//!
//! - success is returned unchanged;
//! - a first failure the condition rejects is returned unchanged;
//! - a later failure the condition rejects becomes
//!   [`Error::RetryExhausted`], carrying the whole [`RetryContext`] and the
//!   last error as its source;
//! - otherwise the middleware waits for the strategy's delay and re-sends
//!   the same request it originally received.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::{
    Error, Event, EventDispatcher, EventPayload, Request, Response, Result, RetryCondition,
    RetryContext, RetryStrategy, ServiceFuture,
};

struct RetryPolicy {
    strategy: Arc<dyn RetryStrategy>,
    condition: RetryCondition,
    max_attempts: u32,
    events: Option<Arc<dyn EventDispatcher>>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("condition", &self.condition)
            .field("max_attempts", &self.max_attempts)
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    async fn run<S>(self: Arc<Self>, inner: S, request: Request) -> Result<Response>
    where
        S: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        S::Future: Send,
    {
        let token = request.extensions().get::<CancellationToken>().cloned();
        let request = Arc::new(request);
        let mut context = RetryContext::new(Arc::clone(&request), self.max_attempts);

        loop {
            let error = match inner.clone().oneshot(Request::clone(&request)).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            let attempt = context.attempt() + 1;
            debug!(attempt, error = %error, "attempt failed");
            self.emit(
                &request,
                EventPayload::AttemptFailed {
                    attempt,
                    kind: error.kind(),
                    message: error.to_string(),
                },
            );

            if !self.condition.should_retry(&error, &context) {
                if context.attempt() == 0 {
                    return Err(error);
                }
                warn!(
                    attempts = attempt,
                    total_delay_ms = millis(context.total_delay()),
                    error = %error,
                    "retries exhausted"
                );
                return Err(Error::retry_exhausted(context, Arc::new(error)));
            }

            let delay = self.strategy.delay(&context);
            context = context.next_attempt(Arc::new(error), delay);
            debug!(
                retry = context.attempt(),
                max_attempts = context.max_attempts(),
                delay_ms = millis(delay),
                "retry scheduled"
            );
            self.emit(
                &request,
                EventPayload::RetryScheduled {
                    attempt: context.attempt(),
                    delay,
                },
            );

            backoff(delay, token.as_ref()).await?;
        }
    }

    fn emit(&self, request: &Request, payload: EventPayload) {
        if let Some(events) = &self.events {
            events.dispatch(Event::new(request.method(), request.url().clone(), payload));
        }
    }
}

async fn backoff(delay: Duration, token: Option<&CancellationToken>) -> Result<()> {
    match token {
        Some(token) => token
            .run_until_cancelled(tokio::time::sleep(delay))
            .await
            .ok_or(Error::Cancelled),
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Layer that retries failed requests.
///
/// `max_attempts` bounds the number of *retries*: a request is tried at most
/// `max_attempts + 1` times.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use conduit::middleware::RetryLayer;
/// use conduit::{ExponentialBackoff, RetryCondition};
///
/// let retry = RetryLayer::new(
///     ExponentialBackoff::new(Duration::from_millis(200), 2.0, Duration::from_secs(5))
///         .with_jitter(true),
///     RetryCondition::transient(),
///     3,
/// );
/// ```
#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: Arc<RetryPolicy>,
}

impl RetryLayer {
    /// Create a retry layer.
    pub fn new(
        strategy: impl RetryStrategy + 'static,
        condition: RetryCondition,
        max_attempts: u32,
    ) -> Self {
        Self {
            policy: Arc::new(RetryPolicy {
                strategy: Arc::new(strategy),
                condition,
                max_attempts,
                events: None,
            }),
        }
    }

    /// Report failed attempts and scheduled retries to `events`.
    #[must_use]
    pub fn with_events(self, events: Arc<dyn EventDispatcher>) -> Self {
        let policy = RetryPolicy {
            strategy: Arc::clone(&self.policy.strategy),
            condition: self.policy.condition.clone(),
            max_attempts: self.policy.max_attempts,
            events: Some(events),
        };
        Self {
            policy: Arc::new(policy),
        }
    }
}

impl From<RetryConfig> for RetryLayer {
    fn from(config: RetryConfig) -> Self {
        Self::new(
            config.strategy(),
            RetryCondition::transient(),
            config.max_retries,
        )
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner,
            policy: Arc::clone(&self.policy),
        }
    }
}

/// Service produced by [`RetryLayer`].
#[derive(Debug, Clone)]
pub struct Retry<S> {
    inner: S,
    policy: Arc<RetryPolicy>,
}

impl<S> Service<Request> for Retry<S>
where
    S: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = Error;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        // every attempt drives readiness of its own clone
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let inner = self.inner.clone();
        let policy = Arc::clone(&self.policy);
        Box::pin(policy.run(inner, request))
    }
}
