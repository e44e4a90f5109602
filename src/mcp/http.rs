use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use super::{JsonRpcRequest, JsonRpcResponse, McpServer, INVALID_REQUEST};
use crate::config::HttpTransportConfig;
use crate::tools::ToolFacade;
use crate::Result;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Session identifier issued on `initialize`
pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
struct HttpState {
    server: McpServer,
    stream_downloads: bool,
}

/// Routes for the HTTP transport
pub fn router(server: McpServer, settings: &HttpTransportConfig) -> Router {
    let state = HttpState {
        server,
        stream_downloads: settings.stream_downloads,
    };

    let app = Router::new()
        .route("/", get(server_info))
        .route("/mcp", get(heartbeat).post(handle_request))
        .with_state(state);

    if settings.enable_cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
    } else {
        app
    }
}

/// Serve MCP over HTTP until interrupted
pub async fn serve(server: McpServer, settings: &HttpTransportConfig) -> Result<()> {
    let address = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("MCP HTTP server listening on http://{}/mcp", address);

    axum::serve(listener, router(server, settings))
        .with_graceful_shutdown(crate::web::shutdown_signal())
        .await?;
    Ok(())
}

async fn server_info() -> Json<Value> {
    Json(json!({
        "name": "VidSnatch MCP HTTP Server",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "HTTP transport for the VidSnatch MCP server",
        "mcp_endpoint": "/mcp",
        "transport": "http",
        "streaming_supported": true,
        "tools": ToolFacade::tool_definitions().iter().map(|tool| tool.name).collect::<Vec<_>>()
    }))
}

async fn handle_request(State(state): State<HttpState>, Json(body): Json<Value>) -> Response {
    let request: JsonRpcRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return Json(JsonRpcResponse::failure(
                Value::Null,
                INVALID_REQUEST,
                format!("Invalid request: {}", e),
            ))
            .into_response()
        }
    };

    tracing::info!("MCP request: {}", request.method);

    let streamed = state.stream_downloads
        && request.tool_name().is_some_and(ToolFacade::is_download_tool);

    if streamed {
        // the download runs inside the stream; its response is the only event
        let server = state.server.clone();
        let events = stream::once(async move {
            let event = match server.handle(request).await {
                Some(response) => response_event(&response),
                None => Event::default().data("{}"),
            };
            Ok::<_, Infallible>(event)
        });
        return Sse::new(events).into_response();
    }

    let initializing = request.method == "initialize";
    match state.server.handle(request).await {
        Some(response) if initializing => {
            let session = uuid::Uuid::new_v4().to_string();
            tracing::debug!("New MCP session {}", session);
            ([(SESSION_HEADER, session)], Json(response)).into_response()
        }
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn response_event(response: &JsonRpcResponse) -> Event {
    match serde_json::to_string(response) {
        Ok(data) => Event::default().data(data),
        Err(e) => Event::default().event("error").data(e.to_string()),
    }
}

async fn heartbeat() -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let beats = stream::unfold((), |()| async {
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        let beat = json!({
            "type": "heartbeat",
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        Some((Ok(Event::default().data(beat.to_string())), ()))
    });
    Sse::new(beats).keep_alive(KeepAlive::default())
}
