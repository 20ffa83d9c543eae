//! Decorator chains.
//!
//! A [`Decorator`] turns one [`Handler`] into another. [`compose`] folds an
//! ordered list around a terminal handler so `decorators[0]` sees the request
//! first and the response last. The composer does not check ordering
//! dependencies; a role gate placed before an identity resolver will deny
//! every request.

use axum::{body::Body, http::Request, response::Response};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use tower::{util::BoxCloneService, Layer, Service};

/// Type-erased request handler. Errors are always rendered as responses.
pub type Handler = BoxCloneService<Request<Body>, Response, Infallible>;

type Wrap = dyn Fn(Handler) -> Handler + Send + Sync;

/// One cross-cutting behavior, applied by wrapping a handler.
#[derive(Clone)]
pub struct Decorator {
    name: &'static str,
    wrap: Arc<Wrap>,
}

impl Decorator {
    pub fn new<F>(name: &'static str, wrap: F) -> Self
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        Self {
            name,
            wrap: Arc::new(wrap),
        }
    }

    /// Adapt a tower layer whose services never fail.
    pub fn from_layer<L>(name: &'static str, layer: L) -> Self
    where
        L: Layer<Handler> + Send + Sync + 'static,
        L::Service: Service<Request<Body>, Response = Response, Error = Infallible>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<Request<Body>>>::Future: Send + 'static,
    {
        Self::new(name, move |inner| BoxCloneService::new(layer.layer(inner)))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, inner: Handler) -> Handler {
        (self.wrap)(inner)
    }
}

impl fmt::Debug for Decorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Decorator").field(&self.name).finish()
    }
}

/// Wrap `terminal` in `decorators`, outermost first.
pub fn compose(decorators: &[Decorator], terminal: Handler) -> Handler {
    decorators
        .iter()
        .rev()
        .fold(terminal, |handler, decorator| decorator.apply(handler))
}

/// Box an axum handler function bound to its state.
pub fn endpoint<H, T, S>(handler: H, state: S) -> Handler
where
    H: axum::handler::Handler<T, S>,
    T: 'static,
    S: Clone + Send + Sync + 'static,
{
    BoxCloneService::new(axum::handler::Handler::with_state(handler, state))
}
