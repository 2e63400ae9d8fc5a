//! The transport boundary.
//!
//! A [`Transport`] physically performs one HTTP exchange. The pipeline never
//! discovers one on its own: callers hand a concrete transport to whatever
//! builds the pipeline.

use std::future::Future;
use std::sync::Arc;

use crate::{Request, Response, Result};

/// Capability to send a request and obtain a response.
///
/// Implementations report network failures, timeouts and TLS problems as
/// [`crate::Error`]; they do not turn HTTP status codes into errors.
pub trait Transport: Send + Sync + 'static {
    /// Send the request and wait for the full response.
    fn send(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
        T::send(self, request)
    }
}
