//! Request lifecycle events.
//!
//! The pipeline's event middleware and the retry middleware emit [`Event`]s
//! through an [`EventDispatcher`]. [`Dispatcher`] is the stock implementation:
//! listeners subscribe to every event or to a set of [`EventKind`]s and run in
//! subscription order until one of them stops propagation.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use derive_more::Display;

use crate::{ErrorKind, Method};

/// Discriminant of an [`EventPayload`], used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum EventKind {
    /// A request is entering the rest of the pipeline.
    #[display("request.sending")]
    RequestSending,
    /// A response came back from the rest of the pipeline.
    #[display("response.received")]
    ResponseReceived,
    /// The request finished, successfully or not.
    #[display("request.completed")]
    RequestCompleted,
    /// The rest of the pipeline returned an error.
    #[display("request.failed")]
    RequestFailed,
    /// One attempt inside the retry middleware failed.
    #[display("attempt.failed")]
    AttemptFailed,
    /// The retry middleware is about to wait and re-send.
    #[display("retry.scheduled")]
    RetryScheduled,
}

/// Data carried by an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// See [`EventKind::RequestSending`].
    RequestSending,
    /// See [`EventKind::ResponseReceived`].
    ResponseReceived {
        /// HTTP status code.
        status: u16,
    },
    /// See [`EventKind::RequestCompleted`].
    RequestCompleted {
        /// Status code when a response was obtained.
        status: Option<u16>,
        /// Wall time spent in the rest of the pipeline.
        elapsed: Duration,
    },
    /// See [`EventKind::RequestFailed`].
    RequestFailed {
        /// Classification of the error.
        kind: ErrorKind,
        /// Rendered error.
        message: String,
    },
    /// See [`EventKind::AttemptFailed`].
    AttemptFailed {
        /// 1-based number of the attempt that failed.
        attempt: u32,
        /// Classification of the error.
        kind: ErrorKind,
        /// Rendered error.
        message: String,
    },
    /// See [`EventKind::RetryScheduled`].
    RetryScheduled {
        /// 1-based number of the retry about to happen.
        attempt: u32,
        /// Backoff before the retry.
        delay: Duration,
    },
}

impl EventPayload {
    /// Kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::RequestSending => EventKind::RequestSending,
            Self::ResponseReceived { .. } => EventKind::ResponseReceived,
            Self::RequestCompleted { .. } => EventKind::RequestCompleted,
            Self::RequestFailed { .. } => EventKind::RequestFailed,
            Self::AttemptFailed { .. } => EventKind::AttemptFailed,
            Self::RetryScheduled { .. } => EventKind::RetryScheduled,
        }
    }
}

/// A lifecycle notification about one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    method: Method,
    url: url::Url,
    payload: EventPayload,
    propagation_stopped: bool,
}

impl Event {
    /// New event about the request `method url`.
    #[must_use]
    pub const fn new(method: Method, url: url::Url, payload: EventPayload) -> Self {
        Self {
            method,
            url,
            payload,
            propagation_stopped: false,
        }
    }

    /// Kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Method of the request concerned.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// URL of the request concerned.
    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Event data.
    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Prevent listeners registered later from seeing this event.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    /// `true` once a listener called [`Event::stop_propagation`].
    #[must_use]
    pub const fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

/// Delivers events to interested parties.
///
/// Returns the event after delivery so callers can inspect its
/// propagation flag.
pub trait EventDispatcher: Send + Sync {
    /// Deliver `event`.
    fn dispatch(&self, event: Event) -> Event;
}

impl<D: EventDispatcher + ?Sized> EventDispatcher for Arc<D> {
    fn dispatch(&self, event: Event) -> Event {
        (**self).dispatch(event)
    }
}

/// Receives events from a [`Dispatcher`].
pub trait EventListener: Send + Sync {
    /// Handle `event`; may call [`Event::stop_propagation`].
    fn on_event(&self, event: &mut Event);
}

impl<F> EventListener for F
where
    F: Fn(&mut Event) + Send + Sync,
{
    fn on_event(&self, event: &mut Event) {
        self(event);
    }
}

#[derive(Debug, Clone)]
enum Subscription {
    All,
    Kinds(HashSet<EventKind>),
}

impl Subscription {
    fn accepts(&self, kind: EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

type Listener = (Subscription, Arc<dyn EventListener>);

/// Listener registry dispatching in subscription order.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// use conduit_core::{Dispatcher, Event, EventDispatcher, EventKind, EventPayload, Method};
///
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
///
/// let dispatcher = Dispatcher::new();
/// dispatcher.listen_to([EventKind::RequestSending], move |_: &mut Event| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// let url = "https://example.com".parse().unwrap();
/// dispatcher.dispatch(Event::new(Method::Get, url, EventPayload::RequestSending));
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct Dispatcher {
    listeners: RwLock<Vec<Listener>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.len())
            .finish()
    }
}

impl Dispatcher {
    /// Dispatcher without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to every event kind.
    pub fn listen_all(&self, listener: impl EventListener + 'static) {
        self.push(Subscription::All, Arc::new(listener));
    }

    /// Subscribe `listener` to the given kinds only.
    pub fn listen_to(
        &self,
        kinds: impl IntoIterator<Item = EventKind>,
        listener: impl EventListener + 'static,
    ) {
        self.push(
            Subscription::Kinds(kinds.into_iter().collect()),
            Arc::new(listener),
        );
    }

    /// Subscribe `listener` to a single kind.
    pub fn listen(&self, kind: EventKind, listener: impl EventListener + 'static) {
        self.listen_to([kind], listener);
    }

    fn push(&self, subscription: Subscription, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((subscription, listener));
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `true` without subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventDispatcher for Dispatcher {
    fn dispatch(&self, mut event: Event) -> Event {
        let kind = event.kind();
        // listeners may subscribe more listeners; never call them under the lock
        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(subscription, _)| subscription.accepts(kind))
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if event.is_propagation_stopped() {
                break;
            }
            listener.on_event(&mut event);
        }
        event
    }
}
