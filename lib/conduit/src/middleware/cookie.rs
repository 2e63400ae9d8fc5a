//! Cookie middleware.
//!
//! Adds the jar's cookies to outgoing requests and stores the `Set-Cookie`
//! headers of successful responses.

use std::sync::Arc;
use std::task::{Context, Poll};

use http::header::{COOKIE, HeaderValue, SET_COOKIE};
use tower::{Layer, Service, ServiceExt};
use tracing::debug;

use crate::{CookieJar, Error, Request, Response, Result, ServiceFuture};

/// Layer that manages cookies with a shared [`CookieJar`].
///
/// Jar cookies are appended after any `Cookie` header the request already
/// carries. `Set-Cookie` headers are stored against the *request* URL, and
/// only when the inner service succeeds; errors pass through untouched.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use conduit::CookieJar;
/// use conduit::middleware::CookieLayer;
///
/// let jar = Arc::new(CookieJar::new());
/// let layer = CookieLayer::new(Arc::clone(&jar));
/// ```
#[derive(Debug, Clone)]
pub struct CookieLayer {
    jar: Arc<CookieJar>,
}

impl CookieLayer {
    /// Manage cookies with `jar`.
    #[must_use]
    pub const fn new(jar: Arc<CookieJar>) -> Self {
        Self { jar }
    }

    /// The jar used by this layer.
    #[must_use]
    pub fn jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }
}

impl<S> Layer<S> for CookieLayer {
    type Service = Cookies<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Cookies {
            inner,
            jar: Arc::clone(&self.jar),
        }
    }
}

/// Service produced by [`CookieLayer`].
#[derive(Debug, Clone)]
pub struct Cookies<S> {
    inner: S,
    jar: Arc<CookieJar>,
}

impl<S> Service<Request> for Cookies<S>
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
        let jar = Arc::clone(&self.jar);

        Box::pin(async move {
            let url = request.url().clone();
            let request = attach_cookies(&jar, request)?;

            let response = inner.oneshot(request).await?;

            let stored = jar.add_from_set_cookie_headers(response.header_all(SET_COOKIE), &url);
            if stored > 0 {
                debug!(url = %url, stored, "stored cookies from response");
            }
            Ok(response)
        })
    }
}

fn attach_cookies(jar: &CookieJar, request: Request) -> Result<Request> {
    let Some(from_jar) = jar.cookie_header_for_url(request.url(), None) else {
        return Ok(request);
    };

    // existing values may hold non-UTF-8 obs-text
    let merged = match request.headers().get(COOKIE).map(HeaderValue::as_bytes) {
        Some(existing) if !existing.trim_ascii().is_empty() => {
            [existing, &b"; "[..], from_jar.as_bytes()].concat()
        }
        _ => from_jar.into_bytes(),
    };
    let value =
        HeaderValue::from_bytes(&merged).map_err(|err| Error::invalid_cookie(err.to_string()))?;

    Ok(request.with_header(COOKIE, value))
}
