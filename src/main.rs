//! m365-mcp-rs: Stateless Microsoft 365 MCP server over streamable HTTP
//!
//! This server exposes OneDrive and Outlook capabilities of Microsoft Graph as
//! MCP tools. Callers authenticate with their own Graph bearer token, which is
//! decoded (not verified) at admission and forwarded upstream per request.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and HTTP serving
//! - [`config`]: Environment-driven listener, upstream, and renderer settings
//! - [`errors`]: Application error model with MCP error mapping
//! - [`auth`]: Bearer admission middleware and unverified claim decoding
//! - [`transport`]: Stateless streamable HTTP routing and health endpoint
//! - [`server`]: MCP tool handlers with validation and business orchestration
//! - [`models`]: Input/output DTOs and schema-bearing types
//! - [`graph`]: Provider facade and its Microsoft Graph implementation
//! - [`conversation`]: Thread-to-drive ingestion pipeline
//! - [`destination`]: Free-text folder resolution for moves
//! - [`mime`]: Body sanitization and inline image resolution
//! - [`render`]: HTML-to-PDF rendering

mod auth;
mod config;
mod conversation;
mod destination;
mod errors;
mod graph;
mod mime;
mod models;
mod render;
mod server;
#[cfg(test)]
mod testing;
mod transport;

use std::sync::Arc;

use config::ServerConfig;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// endpoint over HTTP until SIGINT or SIGTERM.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// M365_MCP_PORT=3001 \
/// M365_MCP_ALLOWED_HOSTS=mcp.example.com \
/// M365_MCP_CHROMIUM_PATH=/usr/bin/chromium \
/// RUST_LOG=info \
/// cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Arc::new(ServerConfig::load_from_env()?);
    let connector = Arc::new(graph::GraphConnector::new(&config)?);
    let renderer = render::from_config(&config);
    let server = server::GraphMcpServer::new(config.clone(), connector, renderer);

    let listener = TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, "m365 MCP server listening");

    axum::serve(listener, transport::router(server, &config.allowed_hosts))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
