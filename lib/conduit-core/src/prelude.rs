//! Prelude module for convenient imports.
//!
//! ```
//! use conduit_core::prelude::*;
//! ```

pub use crate::{
    Cookie, CookieJar, Error, ErrorKind, Event, EventDispatcher, EventKind, ExponentialBackoff,
    FixedDelay, Method, Request, RequestBuilder, Response, Result, RetryCondition, RetryContext,
    RetryStrategy, Transport,
};
