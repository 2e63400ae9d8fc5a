//! Core types and traits for the conduit HTTP request pipeline.
//!
//! This crate holds everything that does not need an async runtime:
//! - [`Method`], [`Request`], [`RequestBuilder`] and [`Response`] - HTTP messages
//! - [`Error`], [`ErrorKind`] and [`Result`] - error handling
//! - [`Transport`] - the boundary to whatever performs the exchange
//! - [`RetryContext`], [`RetryStrategy`] and [`RetryCondition`] - retry engine parts
//! - [`Cookie`] and [`CookieJar`] - RFC 6265 cookie storage
//! - [`Event`], [`EventDispatcher`] and [`Dispatcher`] - lifecycle notifications
//! - [`StatusCode`] - HTTP status codes (re-exported from `http` crate)
//! - [`header`] - HTTP header names (re-exported from `http` crate)

mod body;
mod cookie;
mod cookie_jar;
mod error;
mod event;
mod method;
pub mod prelude;
mod request;
mod response;
pub mod retry;
mod transport;

pub use body::{CONTENT_TYPE_FORM, CONTENT_TYPE_JSON, from_json, to_form, to_json};
pub use cookie::{Cookie, CookieKey, SameSite};
pub use cookie_jar::CookieJar;
pub use error::{Error, ErrorKind, Result};
pub use event::{
    Dispatcher, Event, EventDispatcher, EventKind, EventListener, EventPayload,
};
pub use method::Method;
pub use request::{Request, RequestBuilder, TIMEOUT_HEADER};
pub use response::Response;
pub use retry::{
    ExponentialBackoff, FixedDelay, NoDelay, RetryCondition, RetryContext, RetryStrategy,
};
pub use transport::Transport;

// Re-export http crate types for status codes and headers
pub use http::{StatusCode, header};
