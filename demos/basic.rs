//! Minimal hearth example — the surface a host application embeds.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/ping
//!   curl http://localhost:3000/users/42
//!   curl http://localhost:3000/files/music/album/track.mp3
//!   curl -X DELETE http://localhost:3000/users/42
//!   curl http://localhost:3000/nope

use hearth::{Request, Response, Server};

#[tokio::main]
async fn main() -> Result<(), hearth::Error> {
    tracing_subscriber::fmt::init();

    let server = Server::new();

    server.get("/ping", ping);
    server.get("/users/:id", get_user);
    server.delete("/users/:id", delete_user);
    // Parameter at the end of a pattern captures the whole remaining path.
    server.get("/files/:path", get_file);
    // Wildcard-method route: matches any method nothing else claimed.
    server.any("/version", version);

    // Middleware sees every request before the router does.
    server.middleware(|req| {
        if req.header("x-blocked").is_some() {
            return Some(Response::status(403));
        }
        None
    });

    server.set_not_found_handler(|req: Request| async move {
        Response::builder()
            .status(404)
            .text(format!("no route for {} {}", req.method(), req.path()))
    });

    for route in server.routes() {
        tracing::info!(%route, "registered");
    }

    server.start(3000, false).await?;

    // hearth runs on its own tasks; a real host would get on with host
    // things here. The demo just waits for Ctrl-C.
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    server.stop().await;
    Ok(())
}

async fn ping(_req: Request) -> Response {
    Response::text("pong")
}

// GET /users/:id
async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
}

// DELETE /users/:id → 204 No Content
async fn delete_user(_req: Request) -> Response {
    Response::status(204)
}

// GET /files/:path — `path` holds everything after /files/, joined with `/`.
async fn get_file(req: Request) -> Response {
    let path = req.param("path").unwrap_or_default();
    Response::text(format!("would serve {path}"))
}

async fn version(_req: Request) -> Response {
    Response::text(hearth::VERSION)
}
