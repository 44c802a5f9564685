//! Trie-based request router.
//!
//! A prefix trie keyed by path segment. The first segment of every stored
//! pattern is the HTTP method name (or `*` for any method), so one tree
//! serves the whole route table. Pure data structure + matching algorithm —
//! no I/O, safe for concurrent reads once registration is done.
//!
//! Segment kinds, encoded by the literal string stored as the trie key:
//!
//! | key        | matches                                         |
//! |------------|-------------------------------------------------|
//! | `users`    | exactly the token `users`                       |
//! | `:id`      | any single token, bound as param `id`           |
//! | `*`        | any single token, no binding                    |
//! | `**`       | any run of tokens up to a known landmark child  |
//!
//! A parameter segment that terminates a pattern captures the whole
//! remaining path joined with `/` — `/files/:rest` on `/files/a/b/c` binds
//! `rest = "a/b/c"`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::handler::{BoxedHandler, IntoHandler};
use crate::request::Request;

/// Path parameters extracted during route matching.
pub type Params = HashMap<String, String>;

// ── Route ─────────────────────────────────────────────────────────────────────

/// Anything that can be bound at a route-trie terminal.
///
/// Two shapes exist: [`CallbackRoute`] wraps a single handler, and
/// [`Router`] implements `Route` itself, so a whole sub-router can be
/// registered as the target of a pattern.
pub trait Route: Send + Sync + 'static {
    /// Resolves a request to extracted parameters and a handler, or reports
    /// that this route does not apply.
    fn resolve(&self, request: &Request) -> Option<Resolution>;

    /// Releases resources when dispatch is abandoned before a response was
    /// produced. Default: no-op.
    fn cancel(&self, _request: &Request) {}
}

/// The outcome of a successful dispatch: the parameters extracted from the
/// path and the handler that will compute the response.
pub struct Resolution {
    pub params: Params,
    pub handler: BoxedHandler,
}

/// A route that resolves to one fixed handler with no parameters of its own.
pub struct CallbackRoute {
    handler: BoxedHandler,
}

impl CallbackRoute {
    pub fn new(handler: impl IntoHandler) -> Self {
        Self { handler: handler.into_handler() }
    }
}

impl Route for CallbackRoute {
    fn resolve(&self, _request: &Request) -> Option<Resolution> {
        Some(Resolution { params: Params::new(), handler: Arc::clone(&self.handler) })
    }

    fn cancel(&self, request: &Request) {
        self.handler.cancel(request);
    }
}

// ── Trie ──────────────────────────────────────────────────────────────────────

/// One trie node. Children are exclusively owned; `BTreeMap` keeps sibling
/// iteration deterministic, so when two parameter children coexist at one
/// level the lexicographically first is always the one consulted.
#[derive(Default)]
struct Node {
    children: BTreeMap<String, Node>,
    route: Option<Arc<dyn Route>>,
}

impl Node {
    /// The first parameter child (`:name` key), if any.
    fn param_child(&self) -> Option<(&str, &Node)> {
        self.children
            .iter()
            .find(|(key, _)| key.starts_with(':'))
            .map(|(key, child)| (key.as_str(), child))
    }
}

/// The route table.
///
/// Registration is `&mut self` and must complete before traffic starts;
/// dispatch is `&self` and safe from any number of worker tasks.
#[derive(Default)]
pub struct Router {
    root: Node,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `route` at `method` + `pattern`. `method: None` registers a
    /// wildcard-method route, matched when no exact-method route exists.
    /// Registering the same (method, pattern) twice overwrites — last write
    /// wins. `route: None` unbinds the terminal while leaving the trie node
    /// in place; there is no node removal.
    pub fn register(&mut self, method: Option<&str>, pattern: &str, route: Option<Arc<dyn Route>>) {
        let mut node = &mut self.root;
        for segment in Self::segments(method.unwrap_or("*"), pattern) {
            node = node.children.entry(segment.to_owned()).or_default();
        }
        node.route = route;
    }

    /// Registers a plain handler at `method` + `pattern`.
    pub fn on(&mut self, method: Option<&str>, pattern: &str, handler: impl IntoHandler) {
        self.register(method, pattern, Some(Arc::new(CallbackRoute::new(handler))));
    }

    /// Matches `request` against the table.
    ///
    /// Tries a method-qualified search first, then retries under the `*`
    /// method. Parameters collected while walking the trie are merged into
    /// the resolved route's own parameters (the inner resolution wins on a
    /// key collision, so a nested router's bindings are preserved).
    pub fn dispatch(&self, request: &Request) -> Option<Resolution> {
        self.search(request.method(), request)
            .or_else(|| self.search("*", request))
    }

    /// Every registered pattern, method-qualified, in deterministic
    /// pre-order. For introspection and debugging only.
    pub fn routes(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (method, node) in &self.root.children {
            Self::trace(node, method, "", &mut out);
        }
        out
    }

    fn search(&self, method: &str, request: &Request) -> Option<Resolution> {
        let segments: Vec<&str> = Self::segments(method, request.path()).collect();
        let mut params = Params::new();
        let route = Self::find(&self.root, &segments, &mut params)?;
        let mut resolution = route.resolve(request)?;
        for (key, value) in params {
            resolution.params.entry(key).or_insert(value);
        }
        Some(resolution)
    }

    /// Descends the trie consuming `rest` one token at a time.
    ///
    /// Matching order at each node: exhausted input → parameter child →
    /// literal child → `*` → `**`. A parameter child shadows literal
    /// siblings and there is no backtracking — both inherited from the
    /// route-table semantics this crate exists to provide.
    fn find<'n>(node: &'n Node, rest: &[&str], params: &mut Params) -> Option<&'n Arc<dyn Route>> {
        let Some((&token, rest)) = rest.split_first() else {
            // Out of tokens. A leaf parameter child still matches, binding
            // the empty string; otherwise the current node must be terminal.
            if let Some((name, child)) = node.param_child() {
                if child.children.is_empty() {
                    params.insert(name[1..].to_owned(), String::new());
                    return child.route.as_ref();
                }
            }
            return node.route.as_ref();
        };

        if let Some((name, child)) = node.param_child() {
            if child.children.is_empty() {
                // Parameter at a leaf is tail-capture shorthand: the whole
                // remaining path becomes the binding.
                let mut tail = token.to_owned();
                for segment in rest {
                    tail.push('/');
                    tail.push_str(segment);
                }
                params.insert(name[1..].to_owned(), tail);
                return child.route.as_ref();
            }
            params.insert(name[1..].to_owned(), token.to_owned());
            return Self::find(child, rest, params);
        }

        if let Some(child) = node.children.get(token) {
            return Self::find(child, rest, params);
        }

        // `*` consumes exactly one token and binds nothing.
        if let Some(child) = node.children.get("*") {
            return Self::find(child, rest, params);
        }

        // `**` skips tokens until one is a known landmark — a literal child
        // of the `**` node — then continues past it. No landmark, no match.
        if let Some(child) = node.children.get("**") {
            let remaining: Vec<&str> = std::iter::once(token).chain(rest.iter().copied()).collect();
            for (skip, landmark) in remaining.iter().enumerate() {
                if let Some(next) = child.children.get(*landmark) {
                    return Self::find(next, &remaining[skip + 1..], params);
                }
            }
            return None;
        }

        None
    }

    fn segments<'p>(method: &'p str, pattern: &'p str) -> impl Iterator<Item = &'p str> {
        let path = Self::strip_query(pattern);
        std::iter::once(method).chain(path.split('/').filter(|s| !s.is_empty()))
    }

    fn strip_query(path: &str) -> &str {
        path.split('?').next().unwrap_or(path)
    }

    fn trace(node: &Node, method: &str, prefix: &str, out: &mut Vec<String>) {
        if node.route.is_some() {
            let path = if prefix.is_empty() { "/" } else { prefix };
            out.push(format!("{method} {path}"));
        }
        for (segment, child) in &node.children {
            Self::trace(child, method, &format!("{prefix}/{segment}"), out);
        }
    }
}

impl Route for Router {
    fn resolve(&self, request: &Request) -> Option<Resolution> {
        self.dispatch(request)
    }

    fn cancel(&self, request: &Request) {
        if let Some(resolution) = self.dispatch(request) {
            resolution.handler.cancel(request);
        }
    }
}
