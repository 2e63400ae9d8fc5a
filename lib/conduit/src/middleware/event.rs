//! Lifecycle event middleware.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service, ServiceExt};

use crate::{Error, Event, EventDispatcher, EventPayload, Request, Response, Result, ServiceFuture};

/// Layer announcing request lifecycle events to an [`EventDispatcher`].
///
/// For every request it dispatches `RequestSending` before calling the inner
/// service, then `ResponseReceived` or `RequestFailed`, then
/// `RequestCompleted`. Errors are reported, never swallowed.
#[derive(Clone)]
pub struct EventLayer {
    dispatcher: Arc<dyn EventDispatcher>,
}

impl fmt::Debug for EventLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLayer").finish_non_exhaustive()
    }
}

impl EventLayer {
    /// Dispatch events to `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl<S> Layer<S> for EventLayer {
    type Service = Events<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Events {
            inner,
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

/// Service produced by [`EventLayer`].
#[derive(Clone)]
pub struct Events<S> {
    inner: S,
    dispatcher: Arc<dyn EventDispatcher>,
}

impl<S: fmt::Debug> fmt::Debug for Events<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<S> Service<Request> for Events<S>
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
        let dispatcher = Arc::clone(&self.dispatcher);

        Box::pin(async move {
            let method = request.method();
            let url = request.url().clone();
            let emit = |payload| {
                dispatcher.dispatch(Event::new(method, url.clone(), payload));
            };

            emit(EventPayload::RequestSending);
            let start = Instant::now();
            let result = inner.oneshot(request).await;

            let status = match &result {
                Ok(response) => {
                    emit(EventPayload::ResponseReceived {
                        status: response.status(),
                    });
                    Some(response.status())
                }
                Err(error) => {
                    emit(EventPayload::RequestFailed {
                        kind: error.kind(),
                        message: error.to_string(),
                    });
                    None
                }
            };
            emit(EventPayload::RequestCompleted {
                status,
                elapsed: start.elapsed(),
            });

            result
        })
    }
}
