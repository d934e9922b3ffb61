//! HTML-to-PDF rendering
//!
//! The renderer is an opaque collaborator behind [`DocumentRenderer`]. The
//! production implementation drives a headless Chromium binary with
//! `--print-to-pdf` against a temporary file; when no binary is configured the
//! [`DisabledRenderer`] fails every render, which the ingestion pipeline
//! records as a per-artifact error.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};

/// Renders sanitized, self-contained HTML to PDF bytes
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render_html_to_pdf(&self, html: &str) -> AppResult<Vec<u8>>;
}

/// Pick the renderer for the configured environment
pub fn from_config(config: &ServerConfig) -> Arc<dyn DocumentRenderer> {
    match &config.chromium_path {
        Some(path) => Arc::new(ChromiumRenderer {
            binary: path.clone(),
            render_timeout: Duration::from_millis(config.render_timeout_ms),
        }),
        None => {
            tracing::info!("M365_MCP_CHROMIUM_PATH not set; message bodies will not be rendered");
            Arc::new(DisabledRenderer)
        }
    }
}

/// Headless Chromium `--print-to-pdf` renderer
#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    binary: PathBuf,
    render_timeout: Duration,
}

#[async_trait]
impl DocumentRenderer for ChromiumRenderer {
    async fn render_html_to_pdf(&self, html: &str) -> AppResult<Vec<u8>> {
        let workdir = tempfile::tempdir()
            .map_err(|e| AppError::Render(format!("cannot create render directory: {e}")))?;
        let input = workdir.path().join("body.html");
        let output = workdir.path().join("body.pdf");
        tokio::fs::write(&input, html)
            .await
            .map_err(|e| AppError::Render(format!("cannot stage HTML: {e}")))?;

        let mut command = Command::new(&self.binary);
        command
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--no-pdf-header-footer")
            .arg(format!("--user-data-dir={}", workdir.path().join("profile").display()))
            .arg(format!("--print-to-pdf={}", output.display()))
            .arg(format!("file://{}", input.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| AppError::Render(format!("cannot start renderer: {e}")))?;
        let result = timeout(self.render_timeout, child.wait_with_output())
            .await
            .map_err(|_| AppError::Timeout("PDF render timed out".to_owned()))?
            .map_err(|e| AppError::Render(format!("renderer did not finish: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let last_line = stderr.lines().last().unwrap_or_default();
            return Err(AppError::Render(format!(
                "renderer exited with {}: {last_line}",
                result.status
            )));
        }

        let pdf = tokio::fs::read(&output)
            .await
            .map_err(|e| AppError::Render(format!("renderer produced no PDF: {e}")))?;
        if !pdf.starts_with(b"%PDF") {
            return Err(AppError::Render("renderer output is not a PDF".to_owned()));
        }
        Ok(pdf)
    }
}

/// Renderer used when no headless browser is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRenderer;

#[async_trait]
impl DocumentRenderer for DisabledRenderer {
    async fn render_html_to_pdf(&self, _html: &str) -> AppResult<Vec<u8>> {
        Err(AppError::Render(
            "body rendering is disabled; set M365_MCP_CHROMIUM_PATH".to_owned(),
        ))
    }
}
