//! Server facade and the connection-multiplexing event loop.
//!
//! # Lifecycle
//!
//! `stopped → starting → running → stopped`; restart re-enters `starting`.
//! [`Server::start`] binds and listens, launches the event loop on its own
//! task, and returns once the listener is live. [`Server::stop`] closes the
//! listening socket and every tracked client connection.
//!
//! # Failure policy
//!
//! A per-connection parse/handler/write error never reaches the loop. Only
//! the listening socket's own failure is fatal: the loop stops itself and
//! schedules exactly one restart after a fixed short delay, re-invoking
//! `start` with the same parameters. The delay is deliberately not
//! exponential — the blast radius is a single listening socket. A host that
//! suspects the listener went stale (e.g. after resuming from background)
//! can force the same stop-then-restart cycle with
//! [`Server::request_restart`].

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::conn::{self, Completion};
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::handler::IntoHandler;
use crate::request::Request;
use crate::response::Response;
use crate::router::{CallbackRoute, Resolution, Route};

/// Crate version, for hosts that surface it.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on one readiness wait. Doubles as the check interval for an
/// externally requested restart, so a restart is honored within one tick.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Fixed delay before the listener is restarted after a failure.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Event-loop lifecycle state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Stopped,
    Starting,
    Running,
}

/// An embeddable HTTP server.
///
/// `Clone` shares one underlying server: the host, the event loop, and the
/// delayed-restart task all hold the same core. Register routes and
/// middleware first, then [`start`](Server::start); registration is not
/// designed for concurrent mutation while traffic is in flight.
///
/// ```rust,no_run
/// use hearth::{Request, Response, Server};
///
/// # async fn demo() -> Result<(), hearth::Error> {
/// let server = Server::new();
/// server.get("/ping", |_req: Request| async { Response::text("pong") });
/// server.start(8080, false).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Server {
    core: Arc<ServerCore>,
}

/// Shared state behind every `Server` clone.
///
/// The dispatcher lock is read-per-request, write-per-registration; guards
/// are never held across an await. Lifecycle transitions serialize on the
/// async mutex, with a generation counter (`epoch`) so stop/restart
/// interleavings stay idempotent: a delayed restart only fires if the epoch
/// it captured is still current.
#[derive(Default)]
pub(crate) struct ServerCore {
    dispatcher: RwLock<Dispatcher>,
    lifecycle: Mutex<Lifecycle>,
    restart_requested: AtomicBool,
    next_conn_id: AtomicU64,
}

struct Lifecycle {
    state: State,
    epoch: u64,
    shutdown: Option<watch::Sender<bool>>,
    loop_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self { state: State::Stopped, epoch: 0, shutdown: None, loop_task: None, local_addr: None }
    }
}

impl ServerCore {
    pub(crate) fn dispatch(&self, request: &Request) -> Resolution {
        match self.dispatcher.read() {
            Ok(guard) => guard.dispatch(request),
            Err(poisoned) => poisoned.into_inner().dispatch(request),
        }
    }

    pub(crate) fn cancel(&self, request: &Request) {
        match self.dispatcher.read() {
            Ok(guard) => guard.cancel(request),
            Err(poisoned) => poisoned.into_inner().cancel(request),
        }
    }
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Route table ───────────────────────────────────────────────────────────

    /// Adds, replaces (`Some`), or removes (`None`) a route. `method: None`
    /// registers a wildcard-method route.
    pub fn register(&self, method: Option<&str>, pattern: &str, route: Option<Arc<dyn Route>>) {
        self.with_dispatcher(|d| d.router_mut().register(method, pattern, route));
    }

    /// Registers a handler for `method` + `pattern`.
    pub fn on(&self, method: Option<&str>, pattern: &str, handler: impl IntoHandler) {
        self.with_dispatcher(|d| d.router_mut().on(method, pattern, handler));
    }

    pub fn get(&self, pattern: &str, handler: impl IntoHandler) {
        self.on(Some("GET"), pattern, handler);
    }

    pub fn post(&self, pattern: &str, handler: impl IntoHandler) {
        self.on(Some("POST"), pattern, handler);
    }

    pub fn put(&self, pattern: &str, handler: impl IntoHandler) {
        self.on(Some("PUT"), pattern, handler);
    }

    pub fn delete(&self, pattern: &str, handler: impl IntoHandler) {
        self.on(Some("DELETE"), pattern, handler);
    }

    pub fn head(&self, pattern: &str, handler: impl IntoHandler) {
        self.on(Some("HEAD"), pattern, handler);
    }

    /// Registers a handler matched under any HTTP method, consulted only
    /// when no exact-method route matches.
    pub fn any(&self, pattern: &str, handler: impl IntoHandler) {
        self.on(None, pattern, handler);
    }

    /// Unbinds the route at `method` + `pattern`.
    pub fn unregister(&self, method: Option<&str>, pattern: &str) {
        self.register(method, pattern, None);
    }

    /// Every registered pattern, method-qualified. Introspection only.
    pub fn routes(&self) -> Vec<String> {
        self.with_dispatcher(|d| d.router().routes())
    }

    // ── Dispatch pipeline ─────────────────────────────────────────────────────

    /// Appends a middleware entry; entries run in registration order and the
    /// first to return a response short-circuits dispatch.
    pub fn middleware(
        &self,
        layer: impl Fn(&Request) -> Option<Response> + Send + Sync + 'static,
    ) {
        self.with_dispatcher(|d| d.middleware(layer));
    }

    /// Installs the route consulted when the router has no match.
    pub fn set_not_found(&self, route: impl Route) {
        self.with_dispatcher(|d| d.set_not_found(route));
    }

    /// Like [`set_not_found`](Server::set_not_found), for a plain handler.
    pub fn set_not_found_handler(&self, handler: impl IntoHandler) {
        self.with_dispatcher(|d| d.set_not_found(CallbackRoute::new(handler)));
    }

    /// Replaces the last-resort handler (default: bare 404).
    pub fn set_fallback(&self, handler: impl IntoHandler) {
        self.with_dispatcher(|d| d.set_fallback(handler));
    }

    /// Resolves a request through middleware → router → not-found →
    /// fallback, exactly as a live connection would. For embedding facades
    /// and tests.
    pub fn dispatch(&self, request: &Request) -> Resolution {
        self.core.dispatch(request)
    }

    /// Propagates abandonment of an in-flight request.
    pub fn cancel(&self, request: &Request) {
        self.core.cancel(request);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Binds `port` and starts serving. No-op when already running.
    ///
    /// Binds the loopback interface unless `bind_all_interfaces`; port `0`
    /// picks an ephemeral port. Returns the bound address once the event
    /// loop is live, or [`Error::Bind`] — the only error this crate ever
    /// surfaces to the caller.
    pub async fn start(&self, port: u16, bind_all_interfaces: bool) -> Result<SocketAddr, Error> {
        // Stop any prior run first, without holding the lock across the join.
        let prior = {
            let mut lc = self.core.lifecycle.lock().await;
            if lc.state == State::Running {
                if let Some(addr) = lc.local_addr {
                    return Ok(addr);
                }
            }
            lc.state = State::Starting;
            lc.epoch += 1;
            halt(&mut lc)
        };
        if let Some(task) = prior {
            let _ = task.await;
        }

        let ip = if bind_all_interfaces {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        };
        let listener = match TcpListener::bind((ip, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.core.lifecycle.lock().await.state = State::Stopped;
                return Err(Error::Bind(e));
            }
        };
        let addr = listener.local_addr().map_err(Error::Bind)?;

        // A restart request aimed at a previous run must not recycle the
        // listener this call just created.
        self.core.restart_requested.store(false, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut lc = self.core.lifecycle.lock().await;
        lc.shutdown = Some(shutdown_tx);
        lc.local_addr = Some(addr);
        lc.loop_task = Some(tokio::spawn(run_loop(
            self.clone(),
            listener,
            shutdown_rx,
            port,
            bind_all_interfaces,
        )));
        lc.state = State::Running;
        info!(addr = %addr, "hearth listening");
        Ok(addr)
    }

    /// Stops the event loop, closing the listening socket and every tracked
    /// client connection. Idempotent; also invalidates any pending delayed
    /// restart.
    pub async fn stop(&self) {
        let prior = {
            let mut lc = self.core.lifecycle.lock().await;
            lc.state = State::Stopped;
            lc.epoch += 1;
            halt(&mut lc)
        };
        if let Some(task) = prior {
            let _ = task.await;
            info!("hearth stopped");
        }
    }

    /// Asks the event loop to recycle the listener — the entry point for
    /// host-lifecycle integration (e.g. the app resumed from background and
    /// the socket may be stale). Funnels through the same stop-then-delayed-
    /// restart path as an accept failure, and is honored within one
    /// readiness-wait interval.
    pub fn request_restart(&self) {
        self.core.restart_requested.store(true, Ordering::SeqCst);
    }

    pub async fn state(&self) -> State {
        self.core.lifecycle.lock().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == State::Running
    }

    /// The bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.core.lifecycle.lock().await.local_addr
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn with_dispatcher<R>(&self, f: impl FnOnce(&mut Dispatcher) -> R) -> R {
        match self.core.dispatcher.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Marks the server stopped on the loop's own initiative. Returns the
    /// new epoch to key a delayed restart on, or `None` when an external
    /// stop got there first — in which case no restart may be scheduled.
    async fn stop_for_restart(&self) -> Option<u64> {
        let mut lc = self.core.lifecycle.lock().await;
        if lc.state != State::Running {
            return None;
        }
        lc.state = State::Stopped;
        lc.epoch += 1;
        lc.shutdown = None;
        lc.local_addr = None;
        // This is the loop's own handle; the loop is about to return.
        lc.loop_task = None;
        Some(lc.epoch)
    }

    /// Re-invokes `start` with the same parameters after [`RESTART_DELAY`],
    /// unless the lifecycle has moved on in the meantime.
    fn schedule_restart(&self, port: u16, bind_all_interfaces: bool, epoch: u64) {
        let server = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RESTART_DELAY).await;
            {
                let lc = server.core.lifecycle.lock().await;
                if lc.epoch != epoch || lc.state != State::Stopped {
                    return;
                }
            }
            match server.start(port, bind_all_interfaces).await {
                Ok(addr) => info!(addr = %addr, "listener restarted"),
                Err(e) => error!("restart failed: {e}"),
            }
        });
    }
}

fn halt(lc: &mut Lifecycle) -> Option<JoinHandle<()>> {
    if let Some(shutdown) = lc.shutdown.take() {
        let _ = shutdown.send(true);
    }
    lc.local_addr = None;
    lc.loop_task.take()
}

// ── Event loop ────────────────────────────────────────────────────────────────

/// The multiplexer. Owns the listening socket and the monitored set of
/// client connections; waits for readiness, accepts, and hands accepted
/// sockets to worker tasks so a slow handler never blocks accept readiness.
async fn run_loop(
    server: Server,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    port: u16,
    bind_all_interfaces: bool,
) {
    // Every spawned worker is tracked here; dropping the set on exit aborts
    // the workers, which closes their sockets.
    let mut workers = JoinSet::new();
    // Completion reports are the only way workers touch loop state.
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    // The monitored set: one entry per client socket handed to a worker and
    // not yet retired. Mutated only from this task.
    let mut active: HashMap<u64, SocketAddr> = HashMap::new();
    let mut tick = tokio::time::interval(POLL_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            _ = tick.tick() => {
                if server.core.restart_requested.swap(false, Ordering::SeqCst) {
                    warn!("restart requested, recycling the listener");
                    if let Some(epoch) = server.stop_for_restart().await {
                        server.schedule_restart(port, bind_all_interfaces, epoch);
                    }
                    return;
                }
            }

            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let id = server.core.next_conn_id.fetch_add(1, Ordering::Relaxed);
                    active.insert(id, peer);
                    debug!(conn = id, peer = %peer, tracked = active.len(), "connection accepted");
                    workers.spawn(conn::serve_connection(
                        id,
                        stream,
                        peer,
                        Arc::clone(&server.core),
                        done_tx.clone(),
                    ));
                }
                Err(e) => {
                    // Fatal to this loop run: stop, then exactly one delayed
                    // restart with the same parameters.
                    error!("{}", Error::Accept(e));
                    if let Some(epoch) = server.stop_for_restart().await {
                        server.schedule_restart(port, bind_all_interfaces, epoch);
                    }
                    return;
                }
            },

            Some(completion) = done_rx.recv() => {
                active.remove(&completion.id);
                debug!(
                    conn = completion.id,
                    keep_alive = completion.keep_alive,
                    tracked = active.len(),
                    "connection retired"
                );
            }

            // Reap finished workers so the set does not grow without bound
            // on long-running servers.
            Some(_) = workers.join_next(), if !workers.is_empty() => {}
        }
    }

    debug!(tracked = active.len(), "event loop exiting");
}
