//! Wire-level HTTP/1.1 request parsing and response serialization.
//!
//! This is the parse/write collaborator the connection handler delegates to.
//! Deliberately small: request head + `content-length` body in, status line +
//! headers + body out. Chunked transfer, ranges, and anything smarter belong
//! to the layer embedding this crate.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::request::Request;
use crate::response::{Response, status_reason};
use crate::router::Params;

/// Hard cap on the request head. Non-HTTP traffic must not grow the buffer
/// until EOF.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Why a request could not be produced from the stream.
#[derive(Debug)]
pub(crate) enum ParseError {
    /// The peer closed the connection cleanly between requests. Not a
    /// protocol error — the keep-alive cycle just ends here.
    Closed,
    /// The bytes on the wire were not a valid HTTP/1.x request.
    Malformed(&'static str),
    Io(std::io::Error),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::Malformed(what) => write!(f, "malformed request: {what}"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

/// Reads one request from `io`.
///
/// `buf` carries leftover bytes between calls on the same connection, so a
/// pipelined second request is picked up without touching the socket.
pub(crate) async fn read_request<S>(io: &mut S, buf: &mut BytesMut) -> Result<Request, ParseError>
where
    S: AsyncRead + Unpin,
{
    let head_len = loop {
        if let Some(pos) = find_head_end(buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ParseError::Malformed("request head too large"));
        }
        let n = io.read_buf(buf).await.map_err(ParseError::Io)?;
        if n == 0 {
            return Err(if buf.is_empty() {
                ParseError::Closed
            } else {
                ParseError::Malformed("connection closed mid-head")
            });
        }
    };

    let head = buf.split_to(head_len + 4);
    let head =
        std::str::from_utf8(&head).map_err(|_| ParseError::Malformed("non-utf8 request head"))?;

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let method = parts.next().filter(|m| !m.is_empty());
    let target = parts.next();
    let version = parts.next();
    let (Some(method), Some(target), Some(version)) = (method, target, version) else {
        return Err(ParseError::Malformed("bad request line"));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::Malformed("unsupported protocol version"));
    }

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ParseError::Malformed("bad header line"));
        };
        headers.push((name.trim().to_owned(), value.trim().to_owned()));
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.parse::<usize>())
        .transpose()
        .map_err(|_| ParseError::Malformed("bad content-length"))?
        .unwrap_or(0);

    while buf.len() < content_length {
        let n = io.read_buf(buf).await.map_err(ParseError::Io)?;
        if n == 0 {
            return Err(ParseError::Malformed("connection closed mid-body"));
        }
    }
    let body = buf.split_to(content_length).to_vec();

    Ok(Request {
        method: method.to_owned(),
        path: target.to_owned(),
        headers,
        body,
        params: Params::new(),
        peer_addr: None,
        http11: version == "HTTP/1.1",
    })
}

/// Whether the request's headers permit reusing the connection.
///
/// Explicit `connection: close` wins, explicit `keep-alive` wins, otherwise
/// the HTTP/1.1 default (persistent) applies and HTTP/1.0 closes.
pub(crate) fn supports_keep_alive(request: &Request) -> bool {
    match request.header("connection") {
        Some(value) if value.eq_ignore_ascii_case("close") => false,
        Some(value) if value.eq_ignore_ascii_case("keep-alive") => true,
        _ => request.http11,
    }
}

/// Serializes `response` to `io`.
///
/// The `connection` header reflects the caller's keep-alive decision unless
/// the response set one itself. Returns the keep-alive actually in force.
pub(crate) async fn write_response<S>(
    io: &mut S,
    response: &Response,
    keep_alive: bool,
) -> std::io::Result<bool>
where
    S: AsyncWrite + Unpin,
{
    let status = response.status_code();
    io.write_all(format!("HTTP/1.1 {} {}\r\n", status, status_reason(status)).as_bytes())
        .await?;
    io.write_all(format!("content-length: {}\r\n", response.body().len()).as_bytes())
        .await?;
    if response.header("connection").is_none() {
        io.write_all(if keep_alive {
            b"connection: keep-alive\r\n".as_slice()
        } else {
            b"connection: close\r\n".as_slice()
        })
        .await?;
    }
    for (name, value) in response.headers() {
        io.write_all(format!("{name}: {value}\r\n").as_bytes()).await?;
    }
    io.write_all(b"\r\n").await?;
    io.write_all(response.body()).await?;
    io.flush().await?;
    Ok(keep_alive)
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn parse(raw: &[u8]) -> Result<Request, ParseError> {
        let (mut client, mut server) = duplex(1024);
        client.write_all(raw).await.unwrap();
        drop(client);
        let mut buf = BytesMut::new();
        read_request(&mut server, &mut buf).await
    }

    #[tokio::test]
    async fn parses_request_line_headers_and_body() {
        let req = parse(b"POST /users?q=1 HTTP/1.1\r\nHost: localhost\r\ncontent-length: 4\r\n\r\nbody")
            .await
            .expect("parse");
        assert_eq!(req.method(), "POST");
        assert_eq!(req.path(), "/users?q=1");
        assert_eq!(req.header("host"), Some("localhost"));
        assert_eq!(req.body(), b"body");
        assert!(req.http11);
    }

    #[tokio::test]
    async fn leftover_bytes_feed_the_next_pipelined_request() {
        let (mut client, mut server) = duplex(1024);
        client
            .write_all(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        drop(client);

        let mut buf = BytesMut::new();
        let first = read_request(&mut server, &mut buf).await.expect("first");
        assert_eq!(first.path(), "/a");
        // Second request comes entirely out of the buffer.
        let second = read_request(&mut server, &mut buf).await.expect("second");
        assert_eq!(second.path(), "/b");
    }

    #[tokio::test]
    async fn clean_eof_between_requests_is_not_an_error() {
        match parse(b"").await {
            Err(ParseError::Closed) => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_head_is_malformed() {
        match parse(b"GET /a HTTP/1.1\r\nHost: x").await {
            Err(ParseError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_request_line_is_malformed() {
        match parse(b"nonsense\r\n\r\n").await {
            Err(ParseError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keep_alive_follows_headers_then_version() {
        let req = parse(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        assert!(supports_keep_alive(&req));

        let req = parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();
        assert!(!supports_keep_alive(&req));

        let req = parse(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        assert!(!supports_keep_alive(&req));

        let req = parse(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").await.unwrap();
        assert!(supports_keep_alive(&req));
    }

    #[tokio::test]
    async fn writes_status_line_length_and_connection_header() {
        let (mut a, mut b) = duplex(1024);
        let response = Response::builder().status(201).header("x-test", "1").text("hi");
        let actual = write_response(&mut a, &response, true).await.unwrap();
        assert!(actual);
        drop(a);

        let mut out = Vec::new();
        b.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(text.contains("content-length: 2\r\n"));
        assert!(text.contains("connection: keep-alive\r\n"));
        assert!(text.contains("x-test: 1\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn close_decision_is_written_out() {
        let (mut a, mut b) = duplex(1024);
        let response = Response::status(204);
        let actual = write_response(&mut a, &response, false).await.unwrap();
        assert!(!actual);
        drop(a);

        let mut out = Vec::new();
        b.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("connection: close\r\n"));
    }
}
