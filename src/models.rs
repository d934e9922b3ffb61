//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation. Inputs ignore
//! unknown fields; outputs never carry raw attachment bytes.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
/// The same serialized value is emitted as text and as structured content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Authenticated user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserProfile {
    /// Directory object id
    pub id: String,
    pub display_name: Option<String>,
    pub mail: Option<String>,
    pub user_principal_name: Option<String>,
    pub job_title: Option<String>,
    pub office_location: Option<String>,
}

/// Drive item metadata
///
/// Normalized from the provider's drive item. Transient download URLs are
/// only included by `get_file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DriveItemInfo {
    /// Drive item id
    pub id: String,
    /// Display name
    pub name: String,
    /// MIME type for files, `None` for folders
    pub mime_type: Option<String>,
    /// Size in bytes
    pub size: u64,
    /// Browser URL
    pub web_url: Option<String>,
    /// Whether the item is a container (folder)
    pub is_folder: bool,
    /// Drive path of the parent folder (e.g. `/drive/root:/Documents`)
    pub parent_path: Option<String>,
}

/// File detail returned by `get_file`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FileDetail {
    #[serde(flatten)]
    pub item: DriveItemInfo,
    /// Short-lived pre-authenticated download URL
    pub download_url: Option<String>,
    /// Base64 file content (only when `include_content=true`)
    pub content_base64: Option<String>,
}

/// Counted list of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ListResult<T>
where
    T: JsonSchema,
{
    /// Number of entries in `results`
    pub count: usize,
    pub results: Vec<T>,
}

impl<T: JsonSchema> ListResult<T> {
    pub fn new(results: Vec<T>) -> Self {
        Self {
            count: results.len(),
            results,
        }
    }
}

/// Message summary for inbox search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MessageSummary {
    /// Message id
    pub id: String,
    /// Conversation id (input for `get_conversation`)
    pub conversation_id: Option<String>,
    pub subject: Option<String>,
    /// Sender email address
    pub from: Option<String>,
    /// Sender display name
    pub from_name: Option<String>,
    /// Received timestamp (RFC 3339)
    pub received: Option<String>,
    /// Short body preview
    pub preview: Option<String>,
    pub has_attachments: bool,
    /// Outlook web link
    pub web_link: Option<String>,
}

/// What produced an uploaded artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Rich message body rendered to PDF
    BodyDocument,
    /// File attachment copied as-is
    Attachment,
}

/// Source metadata of an uploaded artifact (content bytes stripped)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactSource {
    pub kind: ArtifactKind,
    /// Original (unsanitized) name
    pub name: String,
    pub content_type: Option<String>,
    /// Size in bytes as reported by the provider or produced by the renderer
    pub size: u64,
}

/// Result of uploading one artifact
///
/// Exactly one of `item` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UploadedItem {
    pub source: ArtifactSource,
    /// Destination drive item on success
    pub item: Option<DriveItemInfo>,
    /// Failure description on error
    pub error: Option<String>,
}

impl UploadedItem {
    pub fn uploaded(source: ArtifactSource, item: DriveItemInfo) -> Self {
        Self {
            source,
            item: Some(item),
            error: None,
        }
    }

    pub fn failed(source: ArtifactSource, error: impl Into<String>) -> Self {
        Self {
            source,
            item: None,
            error: Some(error.into()),
        }
    }
}

/// One processed message of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationMessage {
    pub id: String,
    pub subject: Option<String>,
    /// Sender email address
    pub from: Option<String>,
    /// Received timestamp (RFC 3339)
    pub received: Option<String>,
    /// Short body preview
    pub preview: Option<String>,
    /// Body document first, then attachments in source order
    pub uploads: Vec<UploadedItem>,
}

/// Result of `get_conversation`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationResult {
    pub conversation_id: String,
    /// Number of messages in `results`
    pub count: usize,
    /// Messages oldest first
    pub results: Vec<ConversationMessage>,
}

/// Result of `create_draft_email`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DraftResult {
    pub id: String,
    pub web_link: Option<String>,
    pub subject: Option<String>,
    pub is_draft: bool,
    pub has_attachments: bool,
    pub attachment_count: usize,
}

/// Input: fetch a drive item
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetFileInput {
    /// Drive item id of the file
    pub item_id: String,
    /// Also return base64 content (files up to 4 MiB)
    #[serde(default)]
    pub include_content: bool,
}

/// Input: search the drive
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchFilesInput {
    /// Search query (name, content, or metadata)
    pub query: String,
    /// Maximum results (1..200, default 20)
    #[serde(default = "default_file_top")]
    pub top: usize,
}

/// Input: move a drive item to a folder described in free text
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveFileInput {
    /// Drive item id of the file to move
    pub item_id: String,
    /// Free-text description of the destination folder (e.g. `Archive 2025`)
    pub destination: String,
    /// Optional new name for the file
    pub new_name: Option<String>,
}

/// Input: search the mailbox
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchInboxInput {
    /// Search query (subject, body, sender)
    pub query: String,
    /// Maximum messages (1..50, default 10)
    #[serde(default = "default_message_top")]
    pub top: usize,
}

/// Input: ingest a conversation
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetConversationInput {
    /// Conversation id from a message search result
    pub conversation_id: String,
}

/// Body format of a draft
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BodyContentType {
    #[default]
    Html,
    Text,
}

/// Draft importance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

/// Draft recipient
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RecipientInput {
    /// Email address
    pub address: String,
    /// Display name
    pub name: Option<String>,
}

/// Input: create a draft email
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateDraftInput {
    pub subject: String,
    /// Body content (HTML or plain text)
    pub body: String,
    #[serde(default)]
    pub body_content_type: BodyContentType,
    #[serde(default)]
    pub to_recipients: Vec<RecipientInput>,
    #[serde(default)]
    pub cc_recipients: Vec<RecipientInput>,
    #[serde(default)]
    pub bcc_recipients: Vec<RecipientInput>,
    #[serde(default)]
    pub importance: Importance,
    /// Drive item ids to attach (max 3 MiB each)
    #[serde(default)]
    pub attachment_item_ids: Vec<String>,
}

fn default_file_top() -> usize {
    20
}

fn default_message_top() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::{BodyContentType, CreateDraftInput, Importance, SearchFilesInput};
    use serde_json::json;

    #[test]
    fn unknown_fields_are_ignored_and_defaults_apply() {
        let input: SearchFilesInput =
            serde_json::from_value(json!({ "query": "budget", "extra": true }))
                .expect("extra field ignored");
        assert_eq!(input.top, 20);
    }

    #[test]
    fn missing_or_mistyped_required_fields_are_rejected() {
        assert!(serde_json::from_value::<SearchFilesInput>(json!({ "top": 5 })).is_err());
        assert!(serde_json::from_value::<SearchFilesInput>(json!({ "query": 7 })).is_err());
    }

    #[test]
    fn draft_defaults_to_html_normal_importance() {
        let input: CreateDraftInput =
            serde_json::from_value(json!({ "subject": "Hi", "body": "<p>x</p>" }))
                .expect("minimal draft parses");
        assert_eq!(input.body_content_type, BodyContentType::Html);
        assert_eq!(input.importance, Importance::Normal);
        assert!(input.to_recipients.is_empty());
    }
}
