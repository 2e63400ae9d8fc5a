//! HTTP request values.
//!
//! A [`Request`] is treated as an immutable value by the pipeline: middleware
//! derive new requests with the `with_*` methods rather than sharing mutable
//! state.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use conduit_core::{Method, Request};
//!
//! let request = Request::<Bytes>::builder(Method::Get, "https://api.example.com".parse().unwrap())
//!     .header("Accept", "application/json")
//!     .query("page", "1")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(request.header("accept"), Some("application/json"));
//! ```

use std::time::Duration;

use bytes::Bytes;
use http::header::{AsHeaderName, HeaderMap, HeaderName, HeaderValue};
use http::Extensions;

use crate::{Error, Method, Result};

/// Header used to tag a request with the timeout the transport should enforce,
/// in milliseconds.
pub const TIMEOUT_HEADER: HeaderName = HeaderName::from_static("x-timeout");

/// An HTTP request with method, URL, headers, optional body and typed extensions.
#[derive(Debug, Clone)]
pub struct Request<B = Bytes> {
    method: Method,
    url: url::Url,
    headers: HeaderMap,
    body: Option<B>,
    extensions: Extensions,
}

impl<B> Request<B> {
    /// Creates a new [`RequestBuilder`].
    #[must_use]
    pub fn builder(method: Method, url: url::Url) -> RequestBuilder<B> {
        RequestBuilder::new(method, url)
    }

    /// Rebuild a request from its parts.
    #[must_use]
    pub fn from_parts(
        method: Method,
        url: url::Url,
        headers: HeaderMap,
        body: Option<B>,
        extensions: Extensions,
    ) -> Self {
        Self {
            method,
            url,
            headers,
            body,
            extensions,
        }
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request URL.
    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to headers.
    #[must_use]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// First value of a header, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: impl AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns a copy of this request with `name` set to `value`.
    ///
    /// Any previous values of the header are replaced.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns a copy of this request without the given header.
    #[must_use]
    pub fn without_header(mut self, name: impl AsHeaderName) -> Self {
        self.headers.remove(name);
        self
    }

    /// Timeout requested through [`TIMEOUT_HEADER`], if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.header(TIMEOUT_HEADER)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
    }

    /// Returns a copy of this request tagged with a desired timeout.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.with_header(TIMEOUT_HEADER, HeaderValue::from(millis))
    }

    /// Request body.
    #[must_use]
    pub const fn body(&self) -> Option<&B> {
        self.body.as_ref()
    }

    /// Typed extensions attached to this request.
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access to typed extensions.
    #[must_use]
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Returns a copy of this request carrying `value` as an extension.
    #[must_use]
    pub fn with_extension<T>(mut self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.extensions.insert(value);
        self
    }

    /// Consume into (method, url, headers, body, extensions).
    #[must_use]
    pub fn into_parts(self) -> (Method, url::Url, HeaderMap, Option<B>, Extensions) {
        (
            self.method,
            self.url,
            self.headers,
            self.body,
            self.extensions,
        )
    }
}

/// Builder for constructing [`Request`] instances.
///
/// Header parsing errors are deferred to [`RequestBuilder::build`].
#[derive(Debug)]
pub struct RequestBuilder<B = Bytes> {
    method: Method,
    url: url::Url,
    headers: HeaderMap,
    body: Option<B>,
    error: Option<Error>,
}

impl<B> RequestBuilder<B> {
    /// Creates a new builder.
    #[must_use]
    pub fn new(method: Method, url: url::Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            error: None,
        }
    }

    /// Sets a header, replacing previous values.
    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if self.error.is_some() {
            return self;
        }
        match parse_header(name.as_ref(), value.as_ref()) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Appends a query parameter to the URL.
    #[must_use]
    pub fn query(mut self, name: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: B) -> Self {
        self.body = Some(body);
        self
    }

    /// Builds the [`Request`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if a header name or value was invalid.
    pub fn build(self) -> Result<Request<B>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            extensions: Extensions::new(),
        })
    }
}

impl RequestBuilder<Bytes> {
    /// Set a JSON body.
    pub fn json<T: serde::Serialize>(self, value: &T) -> Result<Self> {
        let body = crate::to_json(value)?;
        Ok(self
            .header(http::header::CONTENT_TYPE, crate::body::CONTENT_TYPE_JSON)
            .body(body))
    }

    /// Set a form-urlencoded body.
    pub fn form<T: serde::Serialize>(self, value: &T) -> Result<Self> {
        let body = crate::to_form(value)?;
        Ok(self
            .header(http::header::CONTENT_TYPE, crate::body::CONTENT_TYPE_FORM)
            .body(body))
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::try_from(name)
        .map_err(|e| Error::invalid_request(format!("invalid header name {name:?}: {e}")))?;
    let header_value = HeaderValue::try_from(value)
        .map_err(|e| Error::invalid_request(format!("invalid value for header {name}: {e}")))?;
    Ok((header_name, header_value))
}
