//! End-to-end tests over real sockets: raw HTTP/1.1 bytes in, bytes out.

use std::time::Duration;

use hearth::{Request, Response, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Writes one request and reads one response off the stream, leaving the
/// connection open for a follow-up exchange.
async fn roundtrip(stream: &mut TcpStream, request: &str) -> (u16, String, Vec<u8>) {
    stream.write_all(request.as_bytes()).await.expect("write request");
    let (status, head, body, rest) = read_response(stream).await;
    assert!(rest.is_empty(), "unexpected bytes after the response body");
    (status, head, body)
}

/// Reads one response. Bytes past `content-length` (e.g. from a takeover
/// session writing early) come back separately as `rest`.
async fn read_response(stream: &mut TcpStream) -> (u16, String, Vec<u8>, Vec<u8>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut tmp).await.expect("read head");
        assert!(n > 0, "eof before response head");
        buf.extend_from_slice(&tmp[..n]);
    };

    let head = String::from_utf8(buf[..head_end].to_vec()).expect("utf8 head");
    let status: u16 = head
        .lines()
        .next()
        .and_then(|line| line.split(' ').nth(1))
        .and_then(|code| code.parse().ok())
        .expect("status line");
    let content_length: usize = head
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|len| len.trim().parse().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut tmp).await.expect("read body");
        assert!(n > 0, "eof before full body");
        body.extend_from_slice(&tmp[..n]);
    }
    let rest = body.split_off(content_length);
    (status, head, body, rest)
}

/// Picks a currently-free port. Racy in principle, good enough in practice.
async fn reserve_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("reserve");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

fn ping_server() -> Server {
    let server = Server::new();
    server.get("/ping", |_req: Request| async { Response::text("pong") });
    server
}

#[tokio::test]
async fn ping_roundtrip_then_stop_frees_the_port() {
    let server = ping_server();
    let addr = server.start(0, false).await.expect("start");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let (status, _, body) =
        roundtrip(&mut stream, "GET /ping HTTP/1.1\r\nconnection: close\r\n\r\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"pong");

    server.stop().await;
    assert!(!server.is_running().await);
    // The listening socket is gone; the port can be bound again.
    TcpListener::bind(addr).await.expect("port should be free after stop");
}

#[tokio::test]
async fn keep_alive_serves_sequential_requests_on_one_connection() {
    let server = ping_server();
    server.get("/users/:id", |req: Request| async move {
        Response::text(format!("user {}", req.param("id").unwrap_or("?")))
    });
    let addr = server.start(0, false).await.expect("start");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let (status, head, body) = roundtrip(&mut stream, "GET /ping HTTP/1.1\r\n\r\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"pong");
    assert!(head.contains("connection: keep-alive"));

    // Same socket, second request.
    let (status, _, body) = roundtrip(&mut stream, "GET /users/42 HTTP/1.1\r\n\r\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"user 42");

    server.stop().await;
}

#[tokio::test]
async fn partial_content_forces_keep_alive_over_connection_close() {
    let server = ping_server();
    server.get("/range", |_req: Request| async {
        Response::builder().status(206).text("chunk")
    });
    let addr = server.start(0, false).await.expect("start");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let (status, head, _) =
        roundtrip(&mut stream, "GET /range HTTP/1.1\r\nconnection: close\r\n\r\n").await;
    assert_eq!(status, 206);
    assert!(head.contains("connection: keep-alive"));

    // The socket must still be serving despite the client's close header.
    let (status, _, body) = roundtrip(&mut stream, "GET /ping HTTP/1.1\r\n\r\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"pong");

    server.stop().await;
}

#[tokio::test]
async fn unrouted_request_gets_the_default_404() {
    let server = ping_server();
    let addr = server.start(0, false).await.expect("start");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let (status, _, _) =
        roundtrip(&mut stream, "GET /nope HTTP/1.1\r\nconnection: close\r\n\r\n").await;
    assert_eq!(status, 404);

    server.stop().await;
}

#[tokio::test]
async fn middleware_short_circuits_live_traffic() {
    let server = ping_server();
    server.middleware(|req| {
        req.header("x-blocked").map(|_| Response::status(403))
    });
    let addr = server.start(0, false).await.expect("start");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let (status, _, _) = roundtrip(
        &mut stream,
        "GET /ping HTTP/1.1\r\nx-blocked: 1\r\nconnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(status, 403);

    server.stop().await;
}

#[tokio::test]
async fn handlers_see_the_peer_address() {
    let server = Server::new();
    server.get("/whoami", |req: Request| async move {
        match req.peer_addr() {
            Some(addr) => Response::text(addr.to_string()),
            None => Response::status(500),
        }
    });
    let addr = server.start(0, false).await.expect("start");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let local = stream.local_addr().expect("local");
    let (status, _, body) =
        roundtrip(&mut stream, "GET /whoami HTTP/1.1\r\nconnection: close\r\n\r\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, local.to_string().as_bytes());

    server.stop().await;
}

#[tokio::test]
async fn socket_session_takes_over_after_the_response() {
    let server = Server::new();
    server.get("/stream", |_req: Request| async {
        Response::builder()
            .socket_session(|stream| {
                tokio::spawn(async move {
                    let mut stream = stream;
                    let _ = stream.write_all(b"EXTRA").await;
                });
            })
            .text("begin")
    });
    let addr = server.start(0, false).await.expect("start");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(b"GET /stream HTTP/1.1\r\nconnection: close\r\n\r\n")
        .await
        .expect("write request");
    let (status, _, body, mut extra) = read_response(&mut stream).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"begin");

    // Everything after the response body comes from the takeover session —
    // whether it arrived in the same read as the body or after it.
    stream.read_to_end(&mut extra).await.expect("read takeover bytes");
    assert_eq!(extra, b"EXTRA");

    server.stop().await;
}

#[tokio::test]
async fn start_is_a_noop_while_running() {
    let server = ping_server();
    let addr = server.start(0, false).await.expect("start");
    let again = server.start(0, false).await.expect("restart");
    assert_eq!(addr, again);
    server.stop().await;
}

#[tokio::test]
async fn requested_restart_recycles_the_listener_on_the_same_port() {
    let server = ping_server();
    let port = reserve_port().await;
    let addr = server.start(port, false).await.expect("start");

    server.request_restart();
    // Observed within one readiness-wait tick (3 s), restarted after the
    // fixed 1 s delay.
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(server.is_running().await);
    assert_eq!(server.local_addr().await, Some(addr));

    let mut stream = TcpStream::connect(addr).await.expect("connect after restart");
    let (status, _, body) =
        roundtrip(&mut stream, "GET /ping HTTP/1.1\r\nconnection: close\r\n\r\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"pong");

    server.stop().await;
}

#[tokio::test]
async fn stop_wins_over_a_pending_restart() {
    let server = ping_server();
    let port = reserve_port().await;
    let addr = server.start(port, false).await.expect("start");

    server.request_restart();
    server.stop().await;
    // Whether or not the loop saw the flag before stopping, no restart may
    // come back from the dead.
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(!server.is_running().await);
    TcpListener::bind(addr).await.expect("port should stay free");
}

#[tokio::test]
async fn stale_restart_flag_does_not_recycle_a_fresh_listener() {
    let server = ping_server();
    server.start(0, false).await.expect("start");
    server.request_restart();
    // The loop may never observe the flag before the stop; a later start
    // must not inherit it.
    server.stop().await;

    let addr = server.start(0, false).await.expect("start again");
    // The first tick fires immediately, so a leftover flag would stop the
    // new loop right away and restart it — onto a different ephemeral port.
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(server.is_running().await);
    assert_eq!(server.local_addr().await, Some(addr));

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let (status, _, body) =
        roundtrip(&mut stream, "GET /ping HTTP/1.1\r\nconnection: close\r\n\r\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"pong");

    server.stop().await;
}

#[tokio::test]
async fn malformed_request_drops_only_that_connection() {
    let server = ping_server();
    let addr = server.start(0, false).await.expect("start");

    let mut bad = TcpStream::connect(addr).await.expect("connect");
    bad.write_all(b"this is not http\r\n\r\n").await.expect("write garbage");
    let mut out = Vec::new();
    // Server writes nothing and closes.
    bad.read_to_end(&mut out).await.expect("read");
    assert!(out.is_empty());

    // The loop is unharmed.
    let mut good = TcpStream::connect(addr).await.expect("connect again");
    let (status, _, body) =
        roundtrip(&mut good, "GET /ping HTTP/1.1\r\nconnection: close\r\n\r\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, b"pong");

    server.stop().await;
}
