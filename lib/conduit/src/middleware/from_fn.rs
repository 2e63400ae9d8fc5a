//! Middleware from an async closure.

use std::fmt;
use std::future::Future;
use std::task::{Context, Poll};

use tower::util::BoxCloneService;
use tower::{Layer, Service, ServiceExt};

use crate::{BoxedService, Error, Request, Response, Result, ServiceFuture};

/// Build a middleware layer from an async function of `(Request, Next)`.
///
/// The function may change the request before calling [`Next::run`], change
/// the response afterwards, or return without calling `next` at all.
///
/// # Example
///
/// ```
/// use conduit::http::HeaderValue;
/// use conduit::middleware::from_fn;
/// use conduit::header::USER_AGENT;
///
/// let user_agent = from_fn(|request: conduit::Request, next| async move {
///     let request = request.with_header(USER_AGENT, HeaderValue::from_static("conduit"));
///     next.run(request).await
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FromFnLayer<F>
where
    F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    FromFnLayer { f }
}

/// Layer produced by [`from_fn`].
#[derive(Clone)]
pub struct FromFnLayer<F> {
    f: F,
}

impl<F> fmt::Debug for FromFnLayer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFnLayer").finish_non_exhaustive()
    }
}

impl<F, S> Layer<S> for FromFnLayer<F>
where
    F: Clone,
    S: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
    S::Future: Send,
{
    type Service = FromFn<F>;

    fn layer(&self, inner: S) -> Self::Service {
        FromFn {
            f: self.f.clone(),
            inner: BoxCloneService::new(inner),
        }
    }
}

/// Service produced by [`FromFnLayer`].
#[derive(Clone)]
pub struct FromFn<F> {
    f: F,
    inner: BoxedService,
}

impl<F> fmt::Debug for FromFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

impl<F, Fut> Service<Request> for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    type Response = Response;
    type Error = Error;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let next = Next {
            inner: self.inner.clone(),
        };
        Box::pin((self.f)(request, next))
    }
}

/// The rest of the pipeline, as seen from a [`from_fn`] middleware.
///
/// [`Next::run`] consumes `self`: the rest of the chain runs at most once
/// per middleware invocation.
pub struct Next {
    inner: BoxedService,
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

impl Next {
    /// Send `request` through the remaining middleware and the terminal.
    pub async fn run(self, request: Request) -> Result<Response> {
        self.inner.oneshot(request).await
    }
}
