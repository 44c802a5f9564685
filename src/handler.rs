//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The route trie needs to hold handlers of *different* types behind a single
//! node type. Rust collections can only hold one concrete type, so handlers
//! are **trait objects** (`Arc<dyn Handler>`) stored uniformly and invoked
//! through one vtable call.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn ping(req: Request) -> Response { … }    ← user writes this
//!        ↓ server.get("/ping", ping)
//! ping.into_handler()                              ← IntoHandler blanket impl
//!        ↓
//! Arc::new(FnHandler(ping))                        ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn Handler>
//! handler.call(req)  at request time               ← one vtable dispatch
//!        ↓
//! Box::pin(async { ping(req).await.into_response() })  ← BoxFuture
//! ```
//!
//! The only runtime cost per request is **one Arc clone** (atomic inc) +
//! **one virtual call** — negligible compared to network I/O.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// `Pin<Box<…>>` is required because the async runtime must be able to poll
/// the future in-place — it cannot move it in memory after the first poll.
/// `Send + 'static` let tokio move the future across worker threads safely.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// A request handler: turns one [`Request`] into one [`Response`].
///
/// Plain `async fn(Request) -> impl IntoResponse` functions satisfy this via
/// [`IntoHandler`]; implement the trait directly only when a handler needs a
/// [`cancel`](Handler::cancel) hook — for example one that holds an open
/// upstream stream it must release if the client connection dies before the
/// response could be written.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture;

    /// Invoked when dispatch is abandoned before a response was produced
    /// (e.g. the response write failed). Default: nothing to release.
    fn cancel(&self, _req: &Request) {}
}

/// A heap-allocated, type-erased handler shared across concurrent requests.
///
/// `Arc` gives cheap, thread-safe shared ownership (one atomic reference
/// count increment per request) without copying the handler.
pub type BoxedHandler = Arc<dyn Handler>;

// ── IntoHandler ───────────────────────────────────────────────────────────────

/// Conversion into a [`BoxedHandler`], satisfied by every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// and for anything that is already a [`BoxedHandler`]. The trait is
/// **sealed** (via the private `Sealed` supertrait): only the impls below can
/// satisfy it, which keeps the API surface stable across versions.
pub trait IntoHandler: private::Sealed {
    #[doc(hidden)]
    fn into_handler(self) -> BoxedHandler;
}

/// The sealing module. Because `Sealed` is private, external crates cannot
/// name it and therefore cannot implement `IntoHandler` on their own types.
mod private {
    pub trait Sealed {}
}

impl private::Sealed for BoxedHandler {}

impl IntoHandler for BoxedHandler {
    fn into_handler(self) -> BoxedHandler {
        self
    }
}

/// Covers named `async fn` items, `async` closures, and any struct
/// implementing `Fn` with the right signature.
impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> IntoHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`Handler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        // Call the wrapped function — this returns the concrete `Fut`.
        // Map it to `Response` via `IntoResponse` and box the whole thing so
        // the return type matches the trait signature.
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
