//! Ordered middleware composition around a terminal service.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio_util::sync::CancellationToken;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceExt};
use tower_service::Service;

use crate::{Error, Request, Response, Result, Transport};

/// Type-erased service for middleware composition.
///
/// Every layer of a [`Pipeline`] wraps one of these and produces another.
pub type BoxedService = BoxCloneService<Request, Response, Error>;

/// Future type for Tower Service implementations in this crate.
pub type ServiceFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send + 'static>>;

type LayerFn = Arc<dyn Fn(BoxedService) -> BoxedService + Send + Sync>;

/// Ordered list of middleware layers.
///
/// The first registered layer is the outermost one: it sees the request first
/// and the response last. Composition folds the layers from last to first
/// around the terminal service, so a layer that never calls its inner service
/// prevents every later layer, and the terminal, from running.
///
/// The pipeline holds no per-request state; it can be cloned and shared.
///
/// # Example
///
/// ```
/// use conduit::middleware::{TimeoutLayer, from_fn};
/// use conduit::Pipeline;
/// use std::time::Duration;
///
/// let pipeline = Pipeline::new()
///     .layer(TimeoutLayer::new(Duration::from_secs(5)))
///     .layer(from_fn(|request, next| async move { next.run(request).await }));
/// assert_eq!(pipeline.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    layers: Vec<LayerFn>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("layers_count", &self.layers.len())
            .finish()
    }
}

impl Pipeline {
    /// Empty pipeline; requests go straight to the terminal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a Tower layer; it becomes the innermost layer so far.
    #[must_use]
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<BoxedService> + Send + Sync + 'static,
        L::Service: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        <L::Service as Service<Request>>::Future: Send,
    {
        self.push(layer);
        self
    }

    /// Alias of [`Pipeline::layer`].
    #[must_use]
    pub fn with<L>(self, layer: L) -> Self
    where
        L: Layer<BoxedService> + Send + Sync + 'static,
        L::Service: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        <L::Service as Service<Request>>::Future: Send,
    {
        self.layer(layer)
    }

    /// Append a Tower layer in place.
    pub fn push<L>(&mut self, layer: L)
    where
        L: Layer<BoxedService> + Send + Sync + 'static,
        L::Service: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        <L::Service as Service<Request>>::Future: Send,
    {
        self.layers.push(Arc::new(move |service| {
            BoxCloneService::new(layer.layer(service))
        }));
    }

    /// Number of registered layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// `true` when no layer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wrap `terminal` in every layer, first registered outermost.
    #[must_use]
    pub fn compose<T>(&self, terminal: T) -> BoxedService
    where
        T: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        T::Future: Send,
    {
        self.layers
            .iter()
            .rev()
            .fold(BoxCloneService::new(terminal), |next, layer| layer(next))
    }

    /// Run `request` through the layers and `terminal`.
    ///
    /// Errors from any layer or from the terminal propagate unchanged.
    pub async fn handle<T>(&self, request: Request, terminal: T) -> Result<Response>
    where
        T: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        T::Future: Send,
    {
        self.compose(terminal).oneshot(request).await
    }

    /// Like [`Pipeline::handle`], aborting with [`Error::Cancelled`] once `token`
    /// is cancelled.
    ///
    /// The token is attached to the request extensions so that middleware
    /// (retry backoff in particular) can stop waiting early.
    pub async fn handle_cancellable<T>(
        &self,
        request: Request,
        terminal: T,
        token: CancellationToken,
    ) -> Result<Response>
    where
        T: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        T::Future: Send,
    {
        let service = self.compose(terminal);
        run_cancellable(service, request, token).await
    }
}

pub(crate) async fn run_cancellable(
    service: BoxedService,
    request: Request,
    token: CancellationToken,
) -> Result<Response> {
    let request = request.with_extension(token.clone());
    token
        .run_until_cancelled(service.oneshot(request))
        .await
        .unwrap_or(Err(Error::Cancelled))
}

// ============================================================================
// Terminal adapter
// ============================================================================

/// Tower service sending every request through a [`Transport`].
pub struct TransportService<T> {
    transport: Arc<T>,
}

impl<T> TransportService<T> {
    /// Adapt `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Adapt a shared transport.
    pub const fn from_arc(transport: Arc<T>) -> Self {
        Self { transport }
    }
}

impl<T> Clone for TransportService<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T> fmt::Debug for TransportService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportService").finish_non_exhaustive()
    }
}

impl<T: Transport> Service<Request> for TransportService<T> {
    type Response = Response;
    type Error = Error;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let transport = Arc::clone(&self.transport);
        Box::pin(async move { transport.send(request).await })
    }
}
