//! Composable HTTP request pipeline.
//!
//! A [`Client`] sends [`Request`]s through an ordered [`Pipeline`] of Tower
//! middleware before handing them to a [`Transport`]. Middleware for retry
//! with backoff, cookies, timeouts, lifecycle events and logging lives in
//! [`middleware`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use conduit::prelude::*;
//!
//! # async fn run() -> conduit::Result<()> {
//! let client = Client::builder()
//!     .with_logging()
//!     .with_timeout(Duration::from_secs(10))
//!     .with_cookies()
//!     .with_retry(3)
//!     .with_error_for_status()
//!     .build();
//!
//! let url = url::Url::parse("https://api.example.com/users/42")?;
//! let request: Request = Request::builder(Method::Get, url).build()?;
//! let response = client.execute(request).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
pub mod middleware;
mod pipeline;
pub mod prelude;

pub use client::{Client, ClientBuilder, HyperTransport};
pub use config::{ClientConfig, ClientConfigBuilder, RetryConfig};
pub use pipeline::{BoxedService, Pipeline, ServiceFuture, TransportService};

// Re-export core types
pub use conduit_core::{
    CONTENT_TYPE_FORM, CONTENT_TYPE_JSON, Cookie, CookieJar, CookieKey, Dispatcher, Error,
    ErrorKind, Event, EventDispatcher, EventKind, EventListener, EventPayload, ExponentialBackoff,
    FixedDelay, Method, NoDelay, Request, RequestBuilder, Response, Result, RetryCondition,
    RetryContext, RetryStrategy, SameSite, TIMEOUT_HEADER, Transport, from_json, to_form, to_json,
};

// Re-export http types for status codes and headers
pub use conduit_core::{StatusCode, header};

pub use http;
pub use tokio_util::sync::CancellationToken;
pub use tower;
pub use url;
