//! Configuration module for the HTTP listener, upstream provider, and renderer
//!
//! All configuration is loaded from environment variables following the pattern
//! `M365_MCP_<KEY>`. The server holds no upstream credentials of its own; every
//! provider call uses the caller's bearer token.

use std::env;
use std::env::VarError;
use std::path::PathBuf;

use crate::errors::{AppError, AppResult};

/// Default Microsoft Graph endpoint
const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
/// Host names accepted on `/mcp` when `M365_MCP_ALLOWED_HOSTS` is unset
const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Which `Host` headers the MCP endpoint answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedHosts {
    /// Only the listed host names
    List(Vec<String>),
    /// Any host (`M365_MCP_ALLOWED_HOSTS=*`), for deployments behind a proxy
    /// that already pins the host
    Any,
}

impl AllowedHosts {
    fn loopback() -> Self {
        Self::List(LOOPBACK_HOSTS.iter().map(|h| (*h).to_owned()).collect())
    }

    /// Parse a comma-separated host list; `*` accepts any host
    fn parse(raw: &str) -> AppResult<Self> {
        let hosts: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        if hosts.iter().any(|h| h == "*") {
            return Ok(Self::Any);
        }
        if hosts.is_empty() || hosts.iter().any(|h| h.contains(['/', ' '])) {
            return Err(AppError::InvalidInput(format!(
                "M365_MCP_ALLOWED_HOSTS must be a comma-separated list of host names: '{raw}'"
            )));
        }
        Ok(Self::List(hosts))
    }
}

/// Server-wide configuration
///
/// Read-only after startup. Cloned into the MCP server via `Arc`, so every
/// per-request session sees the same values.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind the HTTP listener to
    pub host: String,
    /// TCP port for the HTTP listener
    pub port: u16,
    /// Base URL of the upstream Graph API (no trailing slash)
    pub graph_base_url: String,
    /// Per-call upstream HTTP timeout in milliseconds
    pub http_timeout_ms: u64,
    /// Timeout for a single HTML-to-PDF render in milliseconds
    pub render_timeout_ms: u64,
    /// Headless Chromium binary; body rendering is disabled when unset
    pub chromium_path: Option<PathBuf>,
    /// Root drive folder that conversation uploads are placed under
    pub attachments_folder: String,
    /// Maximum number of messages ingested concurrently per conversation
    pub ingest_concurrency: usize,
    /// `Host` headers accepted on the MCP endpoint
    pub allowed_hosts: AllowedHosts,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set but malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// M365_MCP_PORT=3001
    /// M365_MCP_ALLOWED_HOSTS=mcp.example.com,mcp.internal
    /// M365_MCP_CHROMIUM_PATH=/usr/bin/chromium
    /// M365_MCP_INGEST_CONCURRENCY=4
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let port = match optional_env("M365_MCP_PORT")? {
            Some(_) => parse_u16_env("M365_MCP_PORT", 3001)?,
            None => parse_u16_env("PORT", 3001)?,
        };

        let graph_base_url = optional_env("M365_MCP_GRAPH_BASE_URL")?
            .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        if !graph_base_url.starts_with("https://") && !graph_base_url.starts_with("http://") {
            return Err(AppError::InvalidInput(format!(
                "M365_MCP_GRAPH_BASE_URL must be an http(s) URL: '{graph_base_url}'"
            )));
        }

        let attachments_folder = optional_env("M365_MCP_ATTACHMENTS_FOLDER")?
            .unwrap_or_else(|| "attachments".to_owned())
            .trim_matches('/')
            .to_owned();
        if attachments_folder.is_empty() || attachments_folder.split('/').any(|s| s == "..") {
            return Err(AppError::InvalidInput(
                "M365_MCP_ATTACHMENTS_FOLDER must be a non-empty relative drive path".to_owned(),
            ));
        }

        let ingest_concurrency = parse_usize_env("M365_MCP_INGEST_CONCURRENCY", 4)?;
        if ingest_concurrency == 0 {
            return Err(AppError::InvalidInput(
                "M365_MCP_INGEST_CONCURRENCY must be at least 1".to_owned(),
            ));
        }

        let allowed_hosts = match optional_env("M365_MCP_ALLOWED_HOSTS")? {
            Some(raw) => AllowedHosts::parse(&raw)?,
            None => AllowedHosts::loopback(),
        };

        Ok(Self {
            host: optional_env("M365_MCP_HOST")?.unwrap_or_else(|| "0.0.0.0".to_owned()),
            port,
            graph_base_url,
            http_timeout_ms: parse_u64_env("M365_MCP_HTTP_TIMEOUT_MS", 30_000)?,
            render_timeout_ms: parse_u64_env("M365_MCP_RENDER_TIMEOUT_MS", 60_000)?,
            chromium_path: optional_env("M365_MCP_CHROMIUM_PATH")?.map(PathBuf::from),
            attachments_folder,
            ingest_concurrency,
            allowed_hosts,
        })
    }

    /// Socket address string for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 3001,
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_owned(),
            http_timeout_ms: 30_000,
            render_timeout_ms: 60_000,
            chromium_path: None,
            attachments_folder: "attachments".to_owned(),
            ingest_concurrency: 4,
            allowed_hosts: AllowedHosts::loopback(),
        }
    }
}

/// Read an optional environment variable; blank values count as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u16` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match optional_env(key)? {
        Some(v) => v.parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match optional_env(key)? {
        Some(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

/// Parse a `usize` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `usize`.
fn parse_usize_env(key: &str, default: usize) -> AppResult<usize> {
    match optional_env(key)? {
        Some(v) => v.parse::<usize>().map_err(|_| {
            AppError::InvalidInput(format!("invalid usize environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::{AllowedHosts, ServerConfig};

    #[test]
    fn default_config_binds_loopback_with_graph_v1() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:3001");
        assert!(config.graph_base_url.ends_with("/v1.0"));
        assert!(config.chromium_path.is_none());
        assert_eq!(config.ingest_concurrency, 4);
        assert_eq!(
            config.allowed_hosts,
            AllowedHosts::List(vec![
                "localhost".to_owned(),
                "127.0.0.1".to_owned(),
                "::1".to_owned()
            ])
        );
    }

    #[test]
    fn allowed_hosts_parse_lists_and_wildcard() {
        assert_eq!(
            AllowedHosts::parse(" MCP.example.com , mcp.internal ").expect("valid list"),
            AllowedHosts::List(vec!["mcp.example.com".to_owned(), "mcp.internal".to_owned()])
        );
        assert_eq!(AllowedHosts::parse("*").expect("wildcard"), AllowedHosts::Any);
        assert!(AllowedHosts::parse(" , ").is_err());
        assert!(AllowedHosts::parse("https://mcp.example.com").is_err());
    }
}
