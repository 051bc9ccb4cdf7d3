//! Development server with live reload support.
//!
//! A lightweight HTTP server over the build output, built on `tiny_http`:
//!
//! - Static file serving from the output directory
//! - Automatic `index.html` resolution for directories
//! - Live-reload script injected into served HTML
//! - `/ws/reload` WebSocket endpoint pushing rebuild notifications
//! - `POST /api/rebuild` and `GET /api/stats` control endpoints
//! - File watching and auto-rebuild (via `watch` module)
//! - Graceful shutdown on Ctrl+C
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │   Main Thread   │     │  Watcher Thread  │
//! │  (HTTP Server)  │     │  (File Monitor)  │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//!    Handle requests         Detect changes
//!    Serve files             Trigger rebuild
//!          │                       │
//!          │     ┌───────────┐     │
//!          └────►│ ReloadHub │◄────┘
//!                └─────┬─────┘
//!                      ▼
//!             WebSocket clients
//! ```

use crate::{
    builder::Builder,
    config::SiteConfig,
    error::BuildError,
    log,
    reload::ReloadHub,
    watch::watch_for_changes_blocking,
};
use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use std::{
    fs,
    io::Cursor,
    net::SocketAddr,
    path::Path,
    sync::Arc,
    time::Duration,
};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tungstenite::{Bytes, Message, protocol::Role};

// ============================================================================
// Constants
// ============================================================================

/// Try binding to port, retry with incremented port if in use
const MAX_PORT_RETRIES: u16 = 10;

/// WebSocket endpoint browsers subscribe to.
const RELOAD_ENDPOINT: &str = "/ws/reload";

/// Handshake GUID fixed by RFC 6455.
const WS_ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Idle interval after which a ping keeps the connection alive.
const WS_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Script injected before `</body>` in every served HTML document.
const RELOAD_SCRIPT: &str = r#"<script>
(function () {
  function connect() {
    var ws = new WebSocket("ws://" + location.host + "/ws/reload");
    ws.onmessage = function (ev) {
      if (ev.data === "reload") location.reload();
      else if (ev.data.indexOf("error:") === 0) console.error("[vellum] " + ev.data.slice(6));
    };
    ws.onclose = function () { setTimeout(connect, 1000); };
  }
  connect();
})();
</script>"#;

// ============================================================================
// Server Entry Point
// ============================================================================

/// Start the development server with optional file watching.
///
/// Binds to the configured interface and port (auto-retrying on port
/// conflict), installs a Ctrl+C handler, spawns the watcher thread when
/// enabled and then accepts requests until shutdown. Each request is
/// handled on its own thread so a parked WebSocket never stalls the
/// accept loop.
pub fn serve_site(config: &'static SiteConfig, builder: &'static Builder) -> Result<()> {
    let interface: std::net::IpAddr = config.serve.interface.parse()?;
    let base_port = config.serve.port;

    let (server, addr) = try_bind_port(interface, base_port, MAX_PORT_RETRIES)?;
    let server = Arc::new(server);
    let hub = Arc::new(ReloadHub::new());

    let server_for_signal = Arc::clone(&server);
    ctrlc::set_handler(move || {
        log!("serve"; "shutting down...");
        server_for_signal.unblock();
    })
    .context("failed to set Ctrl+C handler")?;

    log!("serve"; "http://{addr}");

    if config.serve.watch {
        let hub_for_watch = Arc::clone(&hub);
        std::thread::spawn(move || {
            if let Err(err) = watch_for_changes_blocking(config, builder, hub_for_watch) {
                log!("watch"; "{err}");
            }
        });
    }

    for request in server.incoming_requests() {
        let hub = Arc::clone(&hub);
        std::thread::spawn(move || {
            hub.record_request();
            if let Err(e) = handle_request(request, config, builder, &hub) {
                log!("serve"; "request error: {e}");
            }
        });
    }

    Ok(())
}

/// Try to bind to a port, retrying with incremented port numbers if in use.
fn try_bind_port(
    interface: std::net::IpAddr,
    base_port: u16,
    max_retries: u16,
) -> Result<(Server, SocketAddr)> {
    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, port);
                }
                return Ok((server, addr));
            }
            Err(_) if offset + 1 < max_retries => {
                continue;
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to bind after {} attempts (ports {}-{}): {}",
                    max_retries,
                    base_port,
                    port,
                    e
                ));
            }
        }
    }
    unreachable!()
}

// ============================================================================
// Request Handling
// ============================================================================

/// Handle a single HTTP request.
///
/// Resolution order:
/// 1. `/ws/reload` → WebSocket upgrade
/// 2. `/api/*` → control endpoints
/// 3. Exact file match → serve file (HTML gets the reload script)
/// 4. Directory with index.html → serve index.html
/// 5. Nothing found → 404
fn handle_request(
    request: Request,
    config: &'static SiteConfig,
    builder: &'static Builder,
    hub: &ReloadHub,
) -> Result<()> {
    // Decode URL-encoded characters (e.g., %20 → space)
    let url_path = urlencoding::decode(request.url())
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_default();

    // Strip query string (e.g., ?t=123456) before resolving path
    let path_without_query = url_path.split('?').next().unwrap_or(&url_path);

    if path_without_query == RELOAD_ENDPOINT {
        return handle_websocket(request, hub);
    }
    if let Some(api_path) = path_without_query.strip_prefix("/api/") {
        return handle_api(request, api_path, builder, hub);
    }

    let request_path = path_without_query.trim_matches('/');
    let local_path = config.build.output.join(request_path);

    if local_path.is_file() {
        return serve_file(request, &local_path);
    }

    if local_path.is_dir() {
        let index_path = local_path.join("index.html");
        if index_path.is_file() {
            return serve_file(request, &index_path);
        }
    }

    serve_not_found(request)
}

// ============================================================================
// Control Endpoints
// ============================================================================

fn handle_api(
    request: Request,
    api_path: &str,
    builder: &'static Builder,
    hub: &ReloadHub,
) -> Result<()> {
    let method = request.method().clone();
    match (method, api_path) {
        (Method::Post, "rebuild") => {
            builder.invalidate_cache();
            let result = builder.build();
            hub.record_build(&result);
            match result {
                Ok(report) => serve_json(
                    request,
                    200,
                    serde_json::json!({
                        "status": "success",
                        "pages": report.rendered,
                        "duration_ms": report.duration.as_millis() as u64,
                    })
                    .to_string(),
                ),
                Err(BuildError::BuildInProgress) => serve_json(
                    request,
                    409,
                    serde_json::json!({
                        "status": "error",
                        "message": BuildError::BuildInProgress.to_string(),
                    })
                    .to_string(),
                ),
                Err(e) => serve_json(
                    request,
                    500,
                    serde_json::json!({ "status": "error", "message": e.to_string() }).to_string(),
                ),
            }
        }
        (Method::Get, "stats") => {
            let stats = hub.stats_snapshot();
            serve_json(request, 200, serde_json::to_string(&stats)?)
        }
        _ => serve_not_found(request),
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// RFC 6455 accept token for a client key.
fn ws_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_ACCEPT_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Upgrade the connection and park it on the reload hub until the client
/// disconnects. Each subscriber gets its own thread; rebuild messages
/// arrive over a bounded channel and idle gaps are bridged with pings.
fn handle_websocket(request: Request, hub: &ReloadHub) -> Result<()> {
    let Some(key) = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Sec-WebSocket-Key"))
        .map(|h| h.value.as_str().to_string())
    else {
        let response = Response::from_string("missing Sec-WebSocket-Key")
            .with_status_code(StatusCode(400));
        request.respond(response)?;
        return Ok(());
    };

    let accept = ws_accept_key(&key);
    let response = Response::empty(StatusCode(101))
        .with_header(Header::from_bytes("Upgrade", "websocket").unwrap())
        .with_header(Header::from_bytes("Connection", "Upgrade").unwrap())
        .with_header(Header::from_bytes("Sec-WebSocket-Accept", accept).unwrap());

    let stream = request.upgrade("websocket", response);
    let mut socket = tungstenite::WebSocket::from_raw_socket(stream, Role::Server, None);

    let (id, rx) = hub.clients.subscribe();
    log!("serve"; "reload client connected ({} active)", hub.clients.count());

    loop {
        let result = match rx.recv_timeout(WS_PING_INTERVAL) {
            Ok(msg) => socket.send(Message::Text(msg.into())),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                socket.send(Message::Ping(Bytes::new()))
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        };
        if result.is_err() {
            break;
        }
    }

    hub.clients.unsubscribe(id);
    log!("serve"; "reload client disconnected ({} active)", hub.clients.count());
    Ok(())
}

// ============================================================================
// Response Helpers
// ============================================================================

/// Serve a file with appropriate content type. HTML documents get the
/// live-reload script spliced in before `</body>`.
fn serve_file(request: Request, path: &Path) -> Result<()> {
    let content_type = guess_content_type(path);

    if content_type.starts_with("text/html") {
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        return serve_html(request, inject_reload_script(&content));
    }

    let content = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let response = Response::from_data(content)
        .with_header(Header::from_bytes("Content-Type", content_type).unwrap());
    request.respond(response)?;
    Ok(())
}

/// Serve HTML content.
fn serve_html(request: Request, content: String) -> Result<()> {
    let response = Response::from_string(content)
        .with_header(Header::from_bytes("Content-Type", "text/html; charset=utf-8").unwrap());
    request.respond(response)?;
    Ok(())
}

fn serve_json(request: Request, status: u16, body: String) -> Result<()> {
    let response = Response::from_string(body)
        .with_status_code(StatusCode(status))
        .with_header(Header::from_bytes("Content-Type", "application/json; charset=utf-8").unwrap());
    request.respond(response)?;
    Ok(())
}

/// Serve 404 Not Found response.
fn serve_not_found(request: Request) -> Result<()> {
    let response = Response::new(
        StatusCode(404),
        vec![Header::from_bytes("Content-Type", "text/plain").unwrap()],
        Cursor::new("404 Not Found"),
        Some(13),
        None,
    );
    request.respond(response)?;
    Ok(())
}

/// Splice the reload script before `</body>`, or append when the
/// document has no closing body tag.
fn inject_reload_script(html: &str) -> String {
    match html.rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + RELOAD_SCRIPT.len());
            out.push_str(&html[..pos]);
            out.push_str(RELOAD_SCRIPT);
            out.push_str(&html[pos..]);
            out
        }
        None => {
            let mut out = html.to_string();
            out.push_str(RELOAD_SCRIPT);
            out
        }
    }
}

// ============================================================================
// Content Type Detection
// ============================================================================

/// Guess MIME content type from file extension.
///
/// Returns `application/octet-stream` for unknown extensions.
fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        // Web content
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "application/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("xml") => "application/xml; charset=utf-8",

        // Images
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("ico") => "image/x-icon",

        // Fonts
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",

        // Documents
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",

        // Default binary
        _ => "application/octet-stream",
    }
}
