//! Incoming HTTP request type.

use std::net::SocketAddr;

use crate::router::Params;

/// An incoming HTTP request, parsed from the raw TCP stream.
///
/// `Clone` on purpose: the connection handler keeps a copy across the
/// response write so it can still hand the request to
/// [`Dispatcher::cancel`](crate::Dispatcher::cancel) if the write fails.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    pub(crate) params: Params,
    pub(crate) peer_addr: Option<SocketAddr>,
    pub(crate) http11: bool,
}

impl Request {
    /// Builds a bare request — for dispatching outside a live connection
    /// (an embedding server facade, or tests).
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
            params: Params::new(),
            peer_addr: None,
            http11: true,
        }
    }

    /// Adds a header. Chains, for test and facade use.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns
    /// `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// All extracted path parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The remote peer address, when it could be resolved.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Folds extracted path parameters into the request before the handler
    /// runs.
    pub(crate) fn merge_params(&mut self, params: Params) {
        self.params.extend(params);
    }
}
