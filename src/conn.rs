//! Per-connection request/response cycle.
//!
//! One accepted socket, one worker task. The event loop hands the socket
//! over and never polls it again; everything here may block this worker
//! without stalling readiness detection for other connections.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::Error;
use crate::http1::{self, ParseError};
use crate::server::ServerCore;

/// Worker → event loop completion report. The loop uses it to retire the
/// connection's entry from the monitored set; sending is the only way a
/// worker touches loop-owned state.
pub(crate) struct Completion {
    pub id: u64,
    pub keep_alive: bool,
}

/// Drives one connection until it closes, is taken over, or fails.
///
/// Per request: parse → dispatch → handler → keep-alive decision → write.
/// A parse or write failure drops this connection only; the loop never
/// hears about it beyond the completion report.
pub(crate) async fn serve_connection(
    id: u64,
    mut stream: TcpStream,
    peer: SocketAddr,
    core: Arc<ServerCore>,
    done: mpsc::UnboundedSender<Completion>,
) {
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        let mut request = match http1::read_request(&mut stream, &mut buf).await {
            Ok(request) => request,
            Err(ParseError::Closed) => {
                let _ = done.send(Completion { id, keep_alive: false });
                return;
            }
            Err(e) => {
                debug!(conn = id, peer = %peer, "dropping connection: {}", Error::Parse(e.to_string()));
                let _ = done.send(Completion { id, keep_alive: false });
                return;
            }
        };

        // Best-effort: the address came with accept. A request constructed
        // without one just has no peer.
        request.peer_addr = Some(peer);

        let resolution = core.dispatch(&request);
        request.merge_params(resolution.params);
        // Retained across the handler call so a failed write can still be
        // cancelled with the original request.
        let retained = request.clone();

        let mut response = resolution.handler.call(request).await;

        // 206 means the client is ranging through a resource and will come
        // back for more on this socket, whatever its headers said.
        let wanted = http1::supports_keep_alive(&retained) || response.status_code() == 206;

        let keep_alive = match http1::write_response(&mut stream, &response, wanted).await {
            Ok(actual) => actual,
            Err(e) => {
                error!(conn = id, peer = %peer, "{}", Error::Write(e));
                core.cancel(&retained);
                let _ = done.send(Completion { id, keep_alive: false });
                return;
            }
        };

        debug!(
            conn = id,
            peer = %peer,
            method = %retained.method(),
            path = %retained.path(),
            status = response.status_code(),
            keep_alive,
            "request served"
        );

        if let Some(session) = response.take_socket_session() {
            // Ownership of the socket passes to the session. The keep-alive
            // verdict is reported for bookkeeping but the takeover, not this
            // loop, controls the connection from here on.
            let _ = done.send(Completion { id, keep_alive });
            session(stream);
            return;
        }

        if !keep_alive {
            let _ = done.send(Completion { id, keep_alive: false });
            return; // dropping the stream closes the socket
        }

        // Keep-alive: read the next request on this same worker. The socket
        // stays registered with the runtime reactor the whole time.
    }
}
