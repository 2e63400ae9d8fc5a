//! Status-to-error middleware.

use std::task::{Context, Poll};

use tower::{Layer, Service, ServiceExt};

use crate::{Error, Request, Response, Result, ServiceFuture};

/// Layer turning non-2xx responses into [`Error::Http`].
///
/// The response body is kept on the error. Register it inside a retry layer
/// so that retry conditions can match HTTP status kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorForStatusLayer;

impl ErrorForStatusLayer {
    /// Create the layer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ErrorForStatusLayer {
    type Service = ErrorForStatus<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ErrorForStatus { inner }
    }
}

/// Service produced by [`ErrorForStatusLayer`].
#[derive(Debug, Clone)]
pub struct ErrorForStatus<S> {
    inner: S,
}

impl<S> Service<Request> for ErrorForStatus<S>
where
    S: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = Error;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { inner.oneshot(request).await?.error_for_status() })
    }
}
