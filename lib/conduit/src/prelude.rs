//! Prelude module for convenient imports.
//!
//! ```
//! use conduit::prelude::*;
//! ```

pub use crate::middleware::{
    CookieLayer, ErrorForStatusLayer, EventLayer, LoggingLayer, RetryLayer, TimeoutLayer, from_fn,
};
pub use crate::{
    CancellationToken, Client, ClientBuilder, Cookie, CookieJar, Dispatcher, Error, ErrorKind,
    Event, EventKind, EventPayload, Method, Pipeline, Request, Response, Result, RetryConfig,
    Transport, url,
};
