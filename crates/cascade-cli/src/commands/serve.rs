//! `cascade serve` command implementation.
//!
//! Builds once, then watches the sources and serves the output directory
//! with a live-reload WebSocket:
//!
//! ```text
//! file change → watch loop → pipeline (lint + build) → BuildEvent
//!   → ReloadHub → /__cascade socket → client swaps the <link> or reloads
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use cascade_core::reload::{client_runtime, inject_client, CLIENT_PATH, SOCKET_PATH};
use cascade_core::version::version_string;
use cascade_core::{BuildContext, Config, LoadOptions, ReloadHub, ReloadMessage, Registry};
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::build::print_build;
use super::lint::print_report;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_HOST: &str = "localhost";

/// Serve command action. Flags override the config file's `server` section.
#[derive(Debug, Clone, Default)]
pub struct ServeAction {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub open: bool,
}

struct ServeState {
    /// Output directory, the server root.
    root: PathBuf,
    hub: ReloadHub,
    port: u16,
}

pub async fn run(config: &Config, load: &LoadOptions, action: ServeAction) -> Result<ExitCode> {
    let ctx = BuildContext::load(&config.cwd, load).into_diagnostic()?;

    let server = &ctx.project.server;
    let port = action.port.or(server.port).unwrap_or(DEFAULT_PORT);
    let host = action
        .host
        .or_else(|| server.host.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let open = action.open || server.open.unwrap_or(false);

    let watch_options = ctx.watch_options().into_diagnostic()?;
    let pipeline = Arc::new(ctx.pipeline(&Registry::builtin(), true));
    let root = ctx.build.output_dir.clone();

    let hub = ReloadHub::new();
    tokio::spawn(hub.clone().forward(pipeline.subscribe(), root.clone()));

    let cycle = pipeline.run_cycle(watch_options.lint_policy).await;
    if let Some(report) = &cycle.lint {
        print_report(report);
    }
    print_build(&ctx.cwd, &cycle.build);

    // The server root and the HTML watch root must exist even if the first build failed.
    std::fs::create_dir_all(&root).into_diagnostic()?;

    let state = Arc::new(ServeState {
        root: root.clone(),
        hub,
        port,
    });
    let app = router(state);

    let addr = bind_addr(&host, port).await.into_diagnostic()?;
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    let url = base_url(&host, port);

    println!();
    println!("  {}", version_string());
    println!("  Serving {} at {}", root.display(), url);
    println!(
        "  Environment {} ({})",
        ctx.build.environment.as_str(),
        ctx.mode.as_str()
    );
    println!("  Live reload enabled");
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    if open {
        if let Err(e) = open_browser(&url) {
            warn!(error = %e, "Failed to open browser");
        }
    }

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C");
        }
        let _ = stop_tx.send(true);
    });

    let serve = axum::serve(listener, app).with_graceful_shutdown(stopped(stop_rx.clone()));
    let watching = cascade_core::watch::watch(Arc::clone(&pipeline), watch_options, stopped(stop_rx));

    let (served, watched) = tokio::join!(async { serve.await }, watching);
    served.into_diagnostic()?;
    let stats = watched.into_diagnostic()?;
    info!(
        builds = stats.builds,
        failed_builds = stats.failed_builds,
        html_reloads = stats.html_reloads,
        "Stopped"
    );

    Ok(ExitCode::SUCCESS)
}

async fn stopped(mut rx: tokio::sync::watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

fn router(state: Arc<ServeState>) -> Router {
    Router::new()
        .route(SOCKET_PATH, get(reload_socket))
        .route(CLIENT_PATH, get(serve_client))
        .fallback(serve_file)
        .with_state(state)
}

async fn serve_client(State(state): State<Arc<ServeState>>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        client_runtime(state.port),
    )
        .into_response()
}

async fn reload_socket(ws: WebSocketUpgrade, State(state): State<Arc<ServeState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone()))
}

async fn handle_socket(mut socket: WebSocket, hub: ReloadHub) {
    let mut rx = hub.subscribe();
    debug!(listeners = hub.listener_count(), "Reload listener connected");

    if socket
        .send(Message::Text(ReloadMessage::Connected.to_json()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(RecvError::Lagged(_)) => ReloadMessage::Reload,
                    Err(RecvError::Closed) => break,
                };
                if socket.send(Message::Text(msg.to_json())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Reload listener disconnected");
}

async fn serve_file(State(state): State<Arc<ServeState>>, uri: Uri) -> Response {
    let Some(path) = resolve_path(&state.root, uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Not found");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let content_type = content_type(&path);
    let body = if content_type.starts_with("text/html") {
        inject_client(&String::from_utf8_lossy(&bytes)).into_bytes()
    } else {
        bytes
    };

    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Map a request path onto the server root. `/` and directories resolve to
/// their `index.html`; any `..` segment is rejected.
fn resolve_path(root: &Path, request: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in request.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains('\\') || s.contains(':') => return None,
            s => path.push(s),
        }
    }
    if path.is_dir() {
        path.push("index.html");
    }
    Some(path)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "application/javascript",
        Some("json" | "map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("woff") => "font/woff",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Open a URL in the default browser.
fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }
    Ok(())
}

/// Resolve `host` to a bind address. IPv6 literals may be bracketed or bare.
async fn bind_addr(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    let host = match host {
        "localhost" => "127.0.0.1",
        other => other.trim_start_matches('[').trim_end_matches(']'),
    };
    tokio::net::lookup_host((host, port)).await?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("No address for {host}"),
        )
    })
}

fn base_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}
