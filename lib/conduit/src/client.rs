//! HTTP client built from a pipeline and a transport.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{Client as LegacyClient, connect::HttpConnector},
    rt::TokioExecutor,
};
use tokio_util::sync::CancellationToken;
use tower::{Layer, ServiceExt};
use tower::util::BoxCloneService;
use tower_service::Service;

use crate::config::{ClientConfig, ClientConfigBuilder, RetryConfig};
use crate::middleware::{
    CookieLayer, ErrorForStatusLayer, EventLayer, LoggingLayer, Retry, RetryLayer, TimeoutLayer,
};
use crate::pipeline::{BoxedService, Pipeline, ServiceFuture, TransportService, run_cancellable};
use crate::{
    CookieJar, Error, EventDispatcher, Request, Response, Result, TIMEOUT_HEADER, Transport,
};

// ============================================================================
// Hyper transport
// ============================================================================

/// Create an HTTPS connector with rustls.
///
/// This connector supports both HTTP/1.1 and HTTP/2, with TLS enabled
/// using the Mozilla root certificates.
fn https_connector(config: &ClientConfig) -> HttpsConnector<HttpConnector> {
    let root_store: rustls::RootCertStore =
        webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(config.connect_timeout));

    HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http)
}

/// [`Transport`] over hyper-util's pooled client with rustls.
///
/// The exchange, body included, must finish within the request's
/// [`TIMEOUT_HEADER`] value or the configured timeout. The tag itself is not
/// sent on the wire. HTTP status codes are never turned into errors here.
#[derive(Clone)]
pub struct HyperTransport {
    inner: LegacyClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    config: ClientConfig,
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl HyperTransport {
    /// Create a transport with the given configuration.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let connector = https_connector(&config);

        let inner = LegacyClient::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_idle_per_host)
            .build(connector);

        Self { inner, config }
    }

    /// Get the transport configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build a hyper request from a conduit request.
    fn build_hyper_request(request: Request) -> Result<http::Request<Full<Bytes>>> {
        let (method, url, mut headers, body, extensions) = request.into_parts();
        headers.remove(TIMEOUT_HEADER);

        let uri = url
            .as_str()
            .parse::<http::Uri>()
            .map_err(|e| Error::invalid_request(e.to_string()))?;

        let mut http_request = http::Request::new(body.map_or_else(Full::default, Full::new));
        *http_request.method_mut() = http::Method::from(method);
        *http_request.uri_mut() = uri;
        *http_request.headers_mut() = headers;
        *http_request.extensions_mut() = extensions;

        Ok(http_request)
    }

    async fn exchange(&self, request: http::Request<Full<Bytes>>) -> Result<Response> {
        let response = self
            .inner
            .request(request)
            .await
            .map_err(Self::map_hyper_error)?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| Error::connection(e.to_string()))?
            .to_bytes();

        Ok(Response::new(parts.status.as_u16(), parts.headers, body))
    }

    #[allow(clippy::needless_pass_by_value)]
    fn map_hyper_error(err: hyper_util::client::legacy::Error) -> Error {
        let msg = err.to_string();
        let detail = std::error::Error::source(&err)
            .map(ToString::to_string)
            .unwrap_or_default()
            .to_lowercase();

        if detail.contains("ssl") || detail.contains("tls") || detail.contains("certificate") {
            return Error::tls(format!("{msg}: {detail}"));
        }

        if err.is_connect() {
            return Error::connection(format!("{msg}: {detail}"));
        }

        Error::connection(msg)
    }
}

impl Transport for HyperTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let timeout = request.timeout().unwrap_or(self.config.timeout);
        let hyper_request = Self::build_hyper_request(request)?;

        tokio::time::timeout(timeout, self.exchange(hyper_request))
            .await
            .map_err(|_| Error::Timeout)?
    }
}

// ============================================================================
// Sync wrapper
// ============================================================================

/// Thread-safe wrapper for `BoxedService`.
///
/// `BoxCloneService` is `Send` but not `Sync`; the mutex only guards cloning.
#[derive(Clone)]
struct SyncService {
    inner: Arc<Mutex<BoxedService>>,
}

impl SyncService {
    fn new(service: BoxedService) -> Self {
        Self {
            inner: Arc::new(Mutex::new(service)),
        }
    }

    fn service(&self) -> BoxedService {
        // Lock, clone the service, and release the lock immediately
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ============================================================================
// Public Client
// ============================================================================

/// HTTP client: a middleware [`Pipeline`] composed around a [`Transport`].
///
/// The pipeline is composed once, at build time. Without an explicit
/// transport the client sends through a [`HyperTransport`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use conduit::Client;
///
/// let client = Client::builder()
///     .with_logging()
///     .with_timeout(Duration::from_secs(10))
///     .with_cookies()
///     .with_retry(3)
///     .with_error_for_status()
///     .build();
/// ```
#[derive(Clone)]
pub struct Client {
    service: SyncService,
    layers: usize,
    cookie_jar: Option<Arc<CookieJar>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("layers_count", &self.layers)
            .field("cookies", &self.cookie_jar.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client without middleware over the default transport.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Number of middleware layers.
    #[must_use]
    pub const fn layers_count(&self) -> usize {
        self.layers
    }

    /// Jar installed by [`ClientBuilder::with_cookies`] or
    /// [`ClientBuilder::with_cookie_jar`], if any.
    #[must_use]
    pub fn cookie_jar(&self) -> Option<&Arc<CookieJar>> {
        self.cookie_jar.as_ref()
    }

    /// Send `request` through the pipeline.
    pub fn execute(&self, request: Request) -> ServiceFuture {
        Box::pin(self.service.service().oneshot(request))
    }

    /// Send `request`, aborting with [`Error::Cancelled`] once `token` is
    /// cancelled. Pending retry backoffs stop immediately.
    pub fn execute_cancellable(&self, request: Request, token: CancellationToken) -> ServiceFuture {
        let service = self.service.service();
        Box::pin(run_cancellable(service, request, token))
    }
}

impl Transport for Client {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        self.execute(request)
    }
}

impl Service<Request> for Client {
    type Response = Response;
    type Error = Error;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        self.execute(request)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Client`].
///
/// Layers wrap each other in the order they are added: the first one added
/// is the outermost. Status-based retries need
/// [`with_error_for_status`](Self::with_error_for_status) to be added *after*
/// [`with_retry`](Self::with_retry), so that the status error is raised
/// inside the retry loop.
///
/// The first dispatcher given to [`with_events`](Self::with_events) also
/// receives the `AttemptFailed` and `RetryScheduled` events of every retry
/// layer added by [`with_retry`](Self::with_retry) or
/// [`with_retry_config`](Self::with_retry_config), in whichever order the
/// helpers are called.
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfigBuilder,
    pipeline: Pipeline,
    transport: Option<BoxedService>,
    cookie_jar: Option<Arc<CookieJar>>,
    retry_events: Arc<OnceLock<Arc<dyn EventDispatcher>>>,
}

/// Retry layer whose dispatcher is resolved when the pipeline is composed.
struct BuilderRetryLayer {
    config: RetryConfig,
    events: Arc<OnceLock<Arc<dyn EventDispatcher>>>,
}

impl Layer<BoxedService> for BuilderRetryLayer {
    type Service = Retry<BoxedService>;

    fn layer(&self, inner: BoxedService) -> Self::Service {
        let retry = RetryLayer::from(self.config);
        let retry = match self.events.get() {
            Some(events) => retry.with_events(Arc::clone(events)),
            None => retry,
        };
        retry.layer(inner)
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("layers_count", &self.pipeline.len())
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

impl ClientBuilder {
    // ========================================================================
    // Core Configuration
    // ========================================================================

    /// Set the default transport timeout.
    ///
    /// Ignored when a custom transport is installed.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.timeout(timeout);
        self
    }

    /// Set the connection timeout of the default transport.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connect_timeout(timeout);
        self
    }

    /// Set the maximum idle connections per host of the default transport.
    #[must_use]
    pub fn pool_idle_per_host(mut self, count: usize) -> Self {
        self.config = self.config.pool_idle_per_host(count);
        self
    }

    /// Set the idle connection timeout of the default transport.
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.pool_idle_timeout(timeout);
        self
    }

    /// Send requests through `transport` instead of a [`HyperTransport`].
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(BoxCloneService::new(TransportService::new(transport)));
        self
    }

    // ========================================================================
    // Generic Middleware API
    // ========================================================================

    /// Add a Tower layer to the client.
    ///
    /// Layers are applied in order: first added = outermost (processes requests first).
    #[must_use]
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<BoxedService> + Send + Sync + 'static,
        L::Service: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        <L::Service as Service<Request>>::Future: Send,
    {
        self.pipeline.push(layer);
        self
    }

    /// Alias for [`ClientBuilder::layer`].
    #[must_use]
    pub fn with<L>(self, layer: L) -> Self
    where
        L: Layer<BoxedService> + Send + Sync + 'static,
        L::Service: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        <L::Service as Service<Request>>::Future: Send,
    {
        self.layer(layer)
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    /// Add request/response logging.
    #[must_use]
    pub fn with_logging(self) -> Self {
        self.layer(LoggingLayer::new())
    }

    /// Add debug-level logging (includes redacted headers).
    #[must_use]
    pub fn with_debug_logging(self) -> Self {
        self.layer(LoggingLayer::debug())
    }

    /// Retry transient failures up to `max_retries` times with the default
    /// exponential backoff.
    #[must_use]
    pub fn with_retry(self, max_retries: u32) -> Self {
        self.with_retry_config(RetryConfig::new(max_retries))
    }

    /// Retry transient failures as described by `config`.
    #[must_use]
    pub fn with_retry_config(self, config: RetryConfig) -> Self {
        let events = Arc::clone(&self.retry_events);
        self.layer(BuilderRetryLayer { config, events })
    }

    /// Manage cookies with a fresh jar, reachable via [`Client::cookie_jar`].
    #[must_use]
    pub fn with_cookies(self) -> Self {
        self.with_cookie_jar(Arc::new(CookieJar::new()))
    }

    /// Manage cookies with a shared jar.
    #[must_use]
    pub fn with_cookie_jar(mut self, jar: Arc<CookieJar>) -> Self {
        self.cookie_jar = Some(Arc::clone(&jar));
        self.layer(CookieLayer::new(jar))
    }

    /// Tag requests with a timeout the transport enforces.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.layer(TimeoutLayer::new(timeout))
    }

    /// Announce lifecycle events to `dispatcher`.
    #[must_use]
    pub fn with_events(self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        // only the first dispatcher is wired into the retry layers
        let _ = self.retry_events.set(Arc::clone(&dispatcher));
        self.layer(EventLayer::new(dispatcher))
    }

    /// Turn non-2xx responses into [`Error::Http`].
    #[must_use]
    pub fn with_error_for_status(self) -> Self {
        self.layer(ErrorForStatusLayer::new())
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Build the client with all configured middleware.
    #[must_use]
    pub fn build(self) -> Client {
        let terminal = match self.transport {
            Some(transport) => transport,
            None => BoxCloneService::new(TransportService::new(HyperTransport::new(
                self.config.build(),
            ))),
        };

        Client {
            service: SyncService::new(self.pipeline.compose(terminal)),
            layers: self.pipeline.len(),
            cookie_jar: self.cookie_jar,
        }
    }
}
