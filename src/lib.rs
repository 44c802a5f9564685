//! # hearth
//!
//! An embeddable, in-process HTTP server. Nothing more. Nothing less.
//!
//! ## The contract
//!
//! hearth is a library linked into a host application — a local proxy, a
//! media player, a device agent — not a standalone daemon. The host owns
//! process lifecycle, TLS, and anything facing the public internet; hearth
//! owns the only parts that change between applications:
//!
//! - **Connection multiplexing** — one event-loop task owns the listening
//!   socket and the set of live connections; accepted sockets are handed to
//!   worker tasks so a slow handler never blocks accept readiness.
//! - **Trie routing** — literal, `:param`, `*`, and `**` path segments, with
//!   an exact-method table falling back to wildcard-method routes.
//! - **Dispatch pipeline** — middleware chain → router → not-found route →
//!   fallback, with a cancel path for abandoned requests.
//! - **Self-healing listener** — an accept failure (or an explicit
//!   [`Server::request_restart`] from the host) stops the loop and restarts
//!   it after a fixed one-second delay, on the same port.
//!
//! What hearth intentionally ignores: TLS termination, HTTP/2, upstream
//! connection pooling, per-request timeouts. The host or its proxy already
//! owns those.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use hearth::{Request, Response, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hearth::Error> {
//!     let server = Server::new();
//!
//!     server.get("/ping", |_req: Request| async { Response::text("pong") });
//!     server.get("/users/:id", |req: Request| async move {
//!         let id = req.param("id").unwrap_or("unknown");
//!         Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//!     });
//!
//!     let addr = server.start(8080, false).await?;
//!     tracing::info!(%addr, "serving");
//!
//!     // The server runs on its own tasks; the host does host things here.
//!     std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```

mod conn;
mod dispatcher;
mod error;
mod handler;
mod http1;
mod request;
mod response;
mod router;
mod server;

pub use dispatcher::{Dispatcher, Middleware};
pub use error::Error;
pub use handler::{BoxFuture, BoxedHandler, Handler, IntoHandler};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder, SocketSession};
pub use router::{CallbackRoute, Params, Resolution, Route, Router};
pub use server::{Server, State, VERSION};
