//! Streamable HTTP transport
//!
//! Serves MCP on `POST /mcp` in stateless mode: every request gets a fresh
//! protocol session built from a clone of the shared [`GraphMcpServer`], and
//! the session ends with the response. Bearer admission runs as axum
//! middleware in front of the MCP service so rejected requests never reach a
//! session. `GET /health` is unauthenticated.

use std::sync::Arc;

use axum::Router;
use axum::response::IntoResponse;
use axum::routing::get;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use serde_json::json;

use crate::auth;
use crate::config::AllowedHosts;
use crate::server::GraphMcpServer;

/// Path of the MCP endpoint
pub const MCP_PATH: &str = "/mcp";
/// Path of the liveness endpoint
pub const HEALTH_PATH: &str = "/health";

/// Build the HTTP router for the MCP endpoint and health check
pub fn router(server: GraphMcpServer, allowed_hosts: &AllowedHosts) -> Router {
    let mut config = StreamableHttpServerConfig::default();
    config.stateful_mode = false;
    config.json_response = true;
    let config = match allowed_hosts {
        AllowedHosts::List(hosts) => config.with_allowed_hosts(hosts.iter().cloned()),
        AllowedHosts::Any => {
            tracing::warn!("Host header validation disabled for {MCP_PATH}");
            config.disable_allowed_hosts()
        }
    };

    let mcp = StreamableHttpService::new(
        move || Ok(server.clone()),
        Arc::new(LocalSessionManager::default()),
        config,
    );

    let protected = Router::new()
        .route_service(MCP_PATH, mcp)
        .layer(axum::middleware::from_fn(auth::require_bearer));

    Router::new()
        .route(HEALTH_PATH, get(health))
        .merge(protected)
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
