//! Request dispatch pipeline: middleware chain → router → not-found fallback.

use std::sync::{Arc, Mutex};

use crate::handler::{BoxFuture, BoxedHandler, Handler, IntoHandler};
use crate::request::Request;
use crate::response::Response;
use crate::router::{Params, Resolution, Route, Router};

/// A middleware entry. Returning `Some(response)` short-circuits dispatch:
/// no later middleware runs, the router is never consulted, and the response
/// is sent as-is with empty params.
pub type Middleware = Box<dyn Fn(&Request) -> Option<Response> + Send + Sync>;

/// Orchestrates a single logical request.
///
/// For any given request exactly one of the four stages produces the
/// resolution: a middleware short-circuit, a router match, the not-found
/// route, or the fallback handler. The fallback defaults to a bare 404 and
/// is replaceable by the embedding server.
///
/// All mutators take `&mut self`: registration must finish before traffic
/// starts. Dispatch itself is `&self` and runs concurrently from many
/// worker tasks.
pub struct Dispatcher {
    router: Router,
    middleware: Vec<Middleware>,
    not_found: Option<Arc<dyn Route>>,
    fallback: BoxedHandler,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            middleware: Vec::new(),
            not_found: None,
            fallback: (|_req: Request| async { Response::status(404) }).into_handler(),
        }
    }

    /// The route table.
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Appends a middleware entry. Entries run in registration order.
    pub fn middleware(&mut self, layer: impl Fn(&Request) -> Option<Response> + Send + Sync + 'static) {
        self.middleware.push(Box::new(layer));
    }

    /// Installs the route consulted when the router has no match.
    pub fn set_not_found(&mut self, route: impl Route) {
        self.not_found = Some(Arc::new(route));
    }

    /// Replaces the last-resort handler (default: bare 404). The embedding
    /// server uses this for behavior like static-asset serving.
    pub fn set_fallback(&mut self, handler: impl IntoHandler) {
        self.fallback = handler.into_handler();
    }

    /// Resolves `request` to parameters and a handler.
    pub fn dispatch(&self, request: &Request) -> Resolution {
        for layer in &self.middleware {
            if let Some(response) = layer(request) {
                return Resolution {
                    params: Params::new(),
                    handler: Arc::new(Immediate::new(response)),
                };
            }
        }

        if let Some(resolution) = self.router.dispatch(request) {
            return resolution;
        }

        if let Some(not_found) = &self.not_found {
            if let Some(resolution) = not_found.resolve(request) {
                return resolution;
            }
        }

        Resolution { params: Params::new(), handler: Arc::clone(&self.fallback) }
    }

    /// Propagates abandonment of an in-flight request — used when the
    /// connection dies before the response could be written, so a handler
    /// holding resources (e.g. an open upstream stream) can release them.
    ///
    /// Goes to the not-found route's cancel hook if one is installed,
    /// otherwise to the router-matched handler's, otherwise does nothing.
    pub fn cancel(&self, request: &Request) {
        if let Some(not_found) = &self.not_found {
            not_found.cancel(request);
        } else if let Some(resolution) = self.router.dispatch(request) {
            resolution.handler.cancel(request);
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot handler replaying a response a middleware already produced.
///
/// Dispatch guarantees a resolution's handler is invoked at most once, so
/// the mutex-wrapped slot is only ever taken once; a second call would get
/// a bare 500.
struct Immediate {
    response: Mutex<Option<Response>>,
}

impl Immediate {
    fn new(response: Response) -> Self {
        Self { response: Mutex::new(Some(response)) }
    }
}

impl Handler for Immediate {
    fn call(&self, _req: Request) -> BoxFuture {
        let response = self.response.lock().ok().and_then(|mut slot| slot.take());
        Box::pin(async move { response.unwrap_or_else(|| Response::status(500)) })
    }
}
