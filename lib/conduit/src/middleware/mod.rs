//! Tower middleware layers for the conduit pipeline.
//!
//! Layers registered on a [`Pipeline`](crate::Pipeline) or a
//! [`ClientBuilder`](crate::ClientBuilder) wrap each other in registration
//! order: the first added is the outermost and sees the request first.
//!
//! # Available Layers
//!
//! - [`LoggingLayer`] - Logs requests/responses using `tracing`
//! - [`RetryLayer`] - Retries failed requests with backoff
//! - [`CookieLayer`] - Sends and stores cookies through a shared jar
//! - [`EventLayer`] - Announces lifecycle events to a dispatcher
//! - [`TimeoutLayer`] - Tags requests with a timeout for the transport
//! - [`ErrorForStatusLayer`] - Turns non-2xx responses into errors
//! - [`from_fn`] - Middleware from an async closure
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use conduit::Client;
//! use conduit::middleware::TimeoutLayer;
//!
//! // Helper methods
//! let client = Client::builder()
//!     .with_logging()
//!     .with_cookies()
//!     .with_retry(3)
//!     .build();
//!
//! // Raw layer access
//! let client = Client::builder()
//!     .layer(TimeoutLayer::new(Duration::from_secs(5)))
//!     .build();
//! ```

mod cookie;
mod event;
mod from_fn;
mod logging;
mod retry;
mod status;
mod timeout;

pub use cookie::{CookieLayer, Cookies};
pub use event::{EventLayer, Events};
pub use from_fn::{FromFn, FromFnLayer, Next, from_fn};
pub use logging::{LogLevel, Logging, LoggingLayer};
pub use retry::{Retry, RetryLayer};
pub use status::{ErrorForStatus, ErrorForStatusLayer};
pub use timeout::{Timeout, TimeoutLayer};

// Re-export tower types for convenience
pub use tower::{Layer, ServiceBuilder};
