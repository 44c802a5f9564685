//! Unified error type.

/// The error type for hearth's fallible operations.
///
/// Application-level errors (404, 500, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type covers
/// infrastructure failures, and only [`Error::Bind`] ever reaches the caller
/// (from [`Server::start`](crate::Server::start)). The rest have a defined
/// local recovery: an accept failure stops the loop and schedules a delayed
/// restart; a parse or write failure drops that one connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listening socket could not be created.
    #[error("bind: {0}")]
    Bind(#[source] std::io::Error),

    /// Accepting a new connection failed. Fatal to the current event-loop
    /// run; recovered automatically by a delayed restart.
    #[error("accept: {0}")]
    Accept(#[source] std::io::Error),

    /// An incoming request could not be parsed. Local to one connection.
    #[error("parse: {0}")]
    Parse(String),

    /// Writing a response failed. Local to one connection; triggers
    /// [`Dispatcher::cancel`](crate::Dispatcher::cancel).
    #[error("write: {0}")]
    Write(#[source] std::io::Error),
}
