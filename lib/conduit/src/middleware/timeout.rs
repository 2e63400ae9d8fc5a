//! Timeout tagging middleware.
//!
//! The pipeline does not enforce timeouts itself: this layer tags requests
//! with [`TIMEOUT_HEADER`](crate::TIMEOUT_HEADER) and the transport applies
//! it.

use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::{Error, Request, Response, Result};

/// Layer that tags requests with a desired timeout.
///
/// A request already carrying a timeout keeps it.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    /// Tag requests with `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            timeout: self.timeout,
        }
    }
}

/// Service produced by [`TimeoutLayer`].
#[derive(Debug, Clone)]
pub struct Timeout<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<Request> for Timeout<S>
where
    S: Service<Request, Response = Response, Error = Error>,
{
    type Response = Response;
    type Error = Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let request = if request.timeout().is_some() {
            request
        } else {
            request.with_timeout(self.timeout)
        };
        self.inner.call(request)
    }
}
