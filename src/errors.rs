//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` type for protocol
//! compliance. Expected negative outcomes (no matching destination, a single
//! failed upload) are not errors; they are modelled as result variants by the
//! modules that produce them.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers every failure the Graph MCP server can surface. Each variant maps to
/// an MCP error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Bearer token is not a decodable three-segment credential
    #[error("malformed credential: {0}")]
    MalformedCredential(String),
    /// Bearer token claims carry no `exp`
    #[error("credential is missing an expiry claim")]
    MissingExpiry,
    /// Upstream provider answered with a non-success status
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    /// Item metadata carried no transient download URL
    #[error("item {0} has no download locator")]
    NoDownloadLocator(String),
    /// Fetching item content from the download URL failed
    #[error("download failed with status {status}")]
    DownloadFailed { status: u16 },
    /// Upstream data exceeds what one call will process
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    /// Headless HTML-to-PDF rendering failed
    #[error("render failed: {0}")]
    Render(String),
    /// Operation timeout (HTTP call, render process)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Request was cancelled by the transport (client went away)
    #[error("request cancelled")]
    Cancelled,
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convert to MCP `ErrorData`
    ///
    /// Maps each `AppError` variant to the appropriate MCP error type and
    /// includes a structured `code` field for client error handling.
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `MalformedCredential`, `MissingExpiry` → `invalid_request`
    /// - `Upstream` → `invalid_request` (status in data)
    /// - `NoDownloadLocator` → `resource_not_found`
    /// - `LimitExceeded` → `invalid_request`
    /// - `DownloadFailed`, `Render`, `Timeout`, `Cancelled` → `internal_error`
    /// - `Internal` → `internal_error` with a fixed message
    ///
    /// `Internal` never echoes its detail; the detail is logged instead.
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::MalformedCredential(_) => ErrorData::invalid_request(
                self.to_string(),
                Some(json!({ "code": "malformed_credential" })),
            ),
            Self::MissingExpiry => ErrorData::invalid_request(
                self.to_string(),
                Some(json!({ "code": "missing_expiry" })),
            ),
            Self::Upstream { status, message } => ErrorData::invalid_request(
                format!("upstream provider rejected the request: {message}"),
                Some(json!({ "code": "upstream_error", "status": status })),
            ),
            Self::NoDownloadLocator(_) => ErrorData::resource_not_found(
                self.to_string(),
                Some(json!({ "code": "no_download_locator" })),
            ),
            Self::LimitExceeded(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "limit_exceeded" })))
            }
            Self::DownloadFailed { status } => ErrorData::internal_error(
                self.to_string(),
                Some(json!({ "code": "download_failed", "status": status })),
            ),
            Self::Render(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "render_failed" })))
            }
            Self::Timeout(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "timeout" })))
            }
            Self::Cancelled => ErrorData::internal_error(
                "request cancelled".to_owned(),
                Some(json!({ "code": "cancelled" })),
            ),
            Self::Internal(detail) => {
                tracing::error!(%detail, "internal error while handling tool call");
                ErrorData::internal_error(
                    "internal error".to_owned(),
                    Some(json!({ "code": "internal" })),
                )
            }
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let data = AppError::Internal("db password is hunter2".to_owned()).to_error_data();
        assert_eq!(data.message, "internal error");
        let rendered = serde_json::to_string(&data).expect("serializable");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("\"internal\""));
    }

    #[test]
    fn upstream_errors_carry_status_code() {
        let data = AppError::Upstream {
            status: 404,
            message: "itemNotFound".to_owned(),
        }
        .to_error_data();
        let extra = data.data.expect("structured data present");
        assert_eq!(extra["code"], "upstream_error");
        assert_eq!(extra["status"], 404);
    }

    #[test]
    fn oversized_results_are_invalid_requests() {
        let data = AppError::LimitExceeded("result spans more than 20 pages".to_owned())
            .to_error_data();
        assert_eq!(data.code, rmcp::model::ErrorCode::INVALID_REQUEST);
        assert!(data.message.contains("20 pages"));
        let extra = data.data.expect("structured data present");
        assert_eq!(extra["code"], "limit_exceeded");
    }
}
