//! Error types for conduit.

use std::sync::Arc;

use derive_more::{Display, Error, From};

use crate::retry::RetryContext;

// ============================================================================
// Error Kind
// ============================================================================

/// Closed classification of [`Error`] values.
///
/// Retry conditions match on kinds instead of concrete variants, so adding
/// detail to a variant never changes which errors are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    /// Connection refused, reset, DNS or TLS failures.
    #[display("network")]
    Network,
    /// The exchange did not complete in time.
    #[display("timeout")]
    Timeout,
    /// HTTP 4xx status.
    #[display("client error")]
    ClientError,
    /// HTTP 5xx status.
    #[display("server error")]
    ServerError,
    /// Any other non-2xx status.
    #[display("http status")]
    HttpStatus,
    /// Encoding or decoding of a body failed.
    #[display("serialization")]
    Serialization,
    /// The retry middleware gave up.
    #[display("retry exhausted")]
    RetryExhausted,
    /// The caller cancelled the request.
    #[display("cancelled")]
    Cancelled,
    /// Anything else.
    #[display("generic")]
    Generic,
}

// ============================================================================
// Error Type
// ============================================================================

/// Main error type for conduit operations.
#[derive(Debug, Display, Error, From)]
pub enum Error {
    /// HTTP-level errors (non-2xx status codes).
    #[display("HTTP error {status}: {message}")]
    #[from(skip)]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
        /// Response body, if available.
        #[error(not(source))]
        body: Option<bytes::Bytes>,
    },

    /// Network/connection errors.
    #[display("connection error: {_0}")]
    #[from(skip)]
    Connection(#[error(not(source))] String),

    /// TLS/SSL errors.
    #[display("TLS error: {_0}")]
    #[from(skip)]
    Tls(#[error(not(source))] String),

    /// Request timeout.
    #[display("request timeout")]
    #[from(skip)]
    Timeout,

    /// The request was cancelled while waiting.
    #[display("request cancelled")]
    #[from(skip)]
    Cancelled,

    /// Invalid request configuration.
    #[display("invalid request: {_0}")]
    #[from(skip)]
    InvalidRequest(#[error(not(source))] String),

    /// URL parsing error.
    #[display("invalid URL: {_0}")]
    #[from]
    InvalidUrl(url::ParseError),

    /// Malformed cookie or `Set-Cookie` header.
    #[display("invalid cookie: {_0}")]
    #[from(skip)]
    InvalidCookie(#[error(not(source))] String),

    /// JSON serialization error.
    #[display("JSON serialization error: {_0}")]
    #[from]
    JsonSerialization(serde_json::Error),

    /// JSON deserialization error with path context.
    #[display("JSON deserialization error at '{path}': {message}")]
    #[from(skip)]
    JsonDeserialization {
        /// JSON path to the error (e.g., "user.address.city").
        path: String,
        /// Error message.
        message: String,
    },

    /// Form URL-encoded serialization error.
    #[display("form serialization error: {_0}")]
    #[from]
    FormSerialization(serde_urlencoded::ser::Error),

    /// All permitted retries failed.
    ///
    /// `context` holds every delay applied and every error seen along the
    /// way; `source` is the error of the final attempt.
    #[display("retries exhausted on attempt {}: {source}", context.attempt() + 1)]
    #[from(skip)]
    RetryExhausted {
        /// Retry history at the moment the middleware gave up.
        #[error(not(source))]
        context: Box<RetryContext>,
        /// Error raised by the final attempt.
        source: Arc<Error>,
    },

    /// Unclassified error.
    #[display("{_0}")]
    #[from(skip)]
    Other(#[error(not(source))] String),
}

/// Result type alias using [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an HTTP error from status code and message.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            body: None,
        }
    }

    /// Create an HTTP error with body.
    #[must_use]
    pub fn http_with_body(status: u16, message: impl Into<String>, body: bytes::Bytes) -> Self {
        Self::Http {
            status,
            message: message.into(),
            body: Some(body),
        }
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    #[must_use]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an invalid cookie error.
    #[must_use]
    pub fn invalid_cookie(message: impl Into<String>) -> Self {
        Self::InvalidCookie(message.into())
    }

    /// Create a JSON deserialization error with path context.
    #[must_use]
    pub fn json_deserialization(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JsonDeserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unclassified error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Wrap a retry history and the final error into [`Error::RetryExhausted`].
    #[must_use]
    pub fn retry_exhausted(context: RetryContext, source: Arc<Error>) -> Self {
        Self::RetryExhausted {
            context: Box::new(context),
            source,
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http { status, .. } => match status {
                400..=499 => ErrorKind::ClientError,
                500..=599 => ErrorKind::ServerError,
                _ => ErrorKind::HttpStatus,
            },
            Self::Connection(_) | Self::Tls(_) => ErrorKind::Network,
            Self::Timeout => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::JsonSerialization(_)
            | Self::JsonDeserialization { .. }
            | Self::FormSerialization(_) => ErrorKind::Serialization,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::InvalidRequest(_) | Self::InvalidUrl(_) | Self::InvalidCookie(_) | Self::Other(_) => {
                ErrorKind::Generic
            }
        }
    }

    /// Returns `true` if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns `true` if this is a connection error.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Returns `true` if retries were exhausted.
    #[must_use]
    pub const fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// Returns the HTTP status code if this is an HTTP error.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::ClientError
    }

    /// Returns `true` if this is a server error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.kind() == ErrorKind::ServerError
    }

    /// Returns the response body if this is an HTTP error with a body.
    #[must_use]
    pub fn body(&self) -> Option<&bytes::Bytes> {
        match self {
            Self::Http { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    /// Retry history, if this error is [`Error::RetryExhausted`].
    #[must_use]
    pub fn retry_context(&self) -> Option<&RetryContext> {
        match self {
            Self::RetryExhausted { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Try to decode the HTTP error body as JSON.
    ///
    /// Returns `None` if there is no body or this is not an HTTP error.
    pub fn decode_body<T: serde::de::DeserializeOwned>(&self) -> Option<Result<T>> {
        self.body().map(|body| crate::from_json(body))
    }
}
