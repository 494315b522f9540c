//! HTTP transport in front of the supervised MCP server.
//!
//! Every route funnels into the same path: decode one JSON value from the body,
//! hand it to the [`Supervisor`] and render the [`Reply`]. Requests answer
//! `200` with the subprocess response as-is, notifications answer `202` with
//! an empty body once they have been written.

use crate::config::BridgeConfig;
use crate::envelope::Envelope;
use crate::error::{BridgeError, Result};
use crate::supervisor::{Reply, SubprocessState, Supervisor};
use axum::{
    Router,
    extract::State,
    http::{Method, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use bytes::Bytes;
use futures::stream::{self, Stream};
use std::{convert::Infallible, future::Future, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

/// Shared state for the bridge
struct BridgeState {
    supervisor: Arc<Supervisor>,
    request_timeout: Option<Duration>,
}

/// Permissive CORS for browser-based MCP clients.
///
/// Any `OPTIONS` request is answered directly with `200`.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Assemble the bridge's routes around an already running supervisor.
///
/// Extra routes are registered as-is and replace a built-in route of the same
/// path. Everything not matched by a route goes to the catch-all message
/// handler.
pub fn build_router(config: &BridgeConfig, supervisor: Arc<Supervisor>) -> Router {
    let state = Arc::new(BridgeState {
        supervisor,
        request_timeout: config.request_timeout,
    });
    let shadowed = |path: &str| config.extra_routes.iter().any(|r| r.path == path);

    let mut app = Router::new();
    if !shadowed("/health") {
        app = app.route("/health", get(health_check));
    }
    if config.enable_sse && !shadowed("/sse") {
        app = app.route("/sse", get(handle_sse_stream).post(handle_sse_message));
    }
    let mut app = app.fallback(handle_message).with_state(state);

    for route in &config.extra_routes {
        info!("Registering extra route: {}", route.path);
        app = app.route(&route.path, route.handler.clone());
    }

    if config.enable_cors {
        app = app.layer(build_cors_layer());
    }
    app.layer(TraceLayer::new_for_http())
}

/// Starts the MCP server subprocess and the HTTP bridge, and blocks until
/// SIGINT or SIGTERM.
///
/// # Returns
///
/// * `Ok(())` after a graceful shutdown; the subprocess has been told to stop.
/// * `Err(BridgeError)` if the configuration is invalid, binding fails or the
///   subprocess cannot be started.
///
/// # Example
///
/// ```rust,no_run
/// use mcp_stdio_bridge::{BridgeConfig, start_bridge};
///
/// #[tokio::main]
/// async fn main() {
///    let config = BridgeConfig {
///        server_command: "/usr/local/bin/my-mcp-server".into(),
///        ..Default::default()
///    };
///    if let Err(e) = start_bridge(config).await {
///        eprintln!("Bridge failed: {}", e);
///    }
/// }
/// ```
pub async fn start_bridge(config: BridgeConfig) -> Result<()> {
    config.validate()?;

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| BridgeError::HttpServer(format!("Failed to bind: {}", e)))?;

    serve(listener, config, shutdown_signal()).await
}

/// Run the bridge on an already bound listener until `shutdown` resolves.
///
/// The subprocess is spawned here, after the listener exists, and stopped
/// once the HTTP server has drained.
pub async fn serve<F>(listener: TcpListener, config: BridgeConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| BridgeError::HttpServer(format!("Failed to get local addr: {}", e)))?;

    let supervisor = Arc::new(Supervisor::spawn(config.supervisor_config())?);
    let app = build_router(&config, supervisor.clone());

    info!(server = %config.server_name, "Listening on http://{}", local_addr);
    info!(server = %config.server_name, "HTTP endpoint: http://{}/", local_addr);
    if config.enable_sse {
        info!(server = %config.server_name, "SSE endpoint: http://{}/sse", local_addr);
    }

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BridgeError::HttpServer(format!("Server error: {}", e)));

    supervisor.shutdown();
    info!(server = %config.server_name, "HTTP bridge stopped");
    result
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Liveness of the subprocess: `200 OK` while it runs, `503` afterwards.
async fn health_check(State(state): State<Arc<BridgeState>>) -> Response {
    match state.supervisor.state() {
        SubprocessState::Running => (StatusCode::OK, "OK").into_response(),
        exited => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("MCP server {}", exited),
        )
            .into_response(),
    }
}

/// Catch-all handler: one JSON-RPC message in, one response (or `202`) out.
async fn handle_message(State(state): State<Arc<BridgeState>>, body: Bytes) -> Response {
    match forward(&state, &body).await {
        Ok(Reply::Response(response)) => {
            ([(header::CONTENT_TYPE, "application/json")], response).into_response()
        }
        Ok(Reply::Accepted) => {
            debug!("Notification processed");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `POST /sse`: like the catch-all, but the response is framed as one SSE event.
async fn handle_sse_message(State(state): State<Arc<BridgeState>>, body: Bytes) -> Response {
    match forward(&state, &body).await {
        Ok(Reply::Response(response)) => {
            let data = String::from_utf8_lossy(&response).into_owned();
            let event =
                stream::once(async move { Ok::<_, Infallible>(Event::default().data(data)) });
            Sse::new(event).into_response()
        }
        Ok(Reply::Accepted) => {
            debug!("SSE notification processed");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `GET /sse`: announce the connection, then hold the stream open until the
/// client goes away.
async fn handle_sse_stream() -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    info!("SSE stream opened");

    let stream = stream::unfold((true, StreamClosedLog), |(first, guard)| async move {
        if !first {
            std::future::pending::<()>().await;
        }
        Some((
            Ok::<_, Infallible>(Event::default().comment("connected")),
            (false, guard),
        ))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

struct StreamClosedLog;

impl Drop for StreamClosedLog {
    fn drop(&mut self) {
        info!("SSE stream closed");
    }
}

async fn forward(state: &BridgeState, body: &[u8]) -> Result<Reply> {
    let envelope = Envelope::parse(body).inspect_err(|e| {
        warn!("Failed to decode HTTP body: {}", e);
    })?;
    debug!("Received HTTP request: {}", envelope);

    let reply = state
        .supervisor
        .call(envelope, state.request_timeout)
        .await
        .inspect_err(|e| match e {
            BridgeError::Timeout(_) | BridgeError::SubprocessExited(_) => warn!("{}", e),
            _ => error!("Failed to get response from MCP server: {}", e),
        })?;

    if let Reply::Response(response) = &reply {
        debug!("Sending HTTP response: {}", String::from_utf8_lossy(response));
    }
    Ok(reply)
}
