//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers 7 MCP tools. Handles
//! input validation, business logic orchestration, and response formatting.
//! One `GraphMcpServer` value is built at startup and cloned into every
//! per-request session; it holds no mutable state.

use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::service::RequestContext;
use rmcp::{Json, RoleServer, ServerHandler, tool, tool_handler, tool_router};

use crate::auth::Credential;
use crate::config::ServerConfig;
use crate::conversation::{self, IngestOptions};
use crate::destination;
use crate::errors::{AppError, AppResult};
use crate::graph::{DraftAttachment, DraftMessage, ProviderConnector, Recipient, ResourceProvider};
use crate::models::{
    ConversationResult, CreateDraftInput, DraftResult, DriveItemInfo, FileDetail, GetConversationInput,
    GetFileInput, ListResult, MessageSummary, Meta, MoveFileInput, RecipientInput,
    SearchFilesInput, SearchInboxInput, ToolEnvelope, UserProfile,
};
use crate::render::DocumentRenderer;

/// Maximum drive search results
const MAX_FILE_TOP: usize = 200;
/// Maximum inbox search results
const MAX_MESSAGE_TOP: usize = 50;
/// Largest file returned inline by `get_file`
const MAX_INLINE_CONTENT_BYTES: u64 = 4 * 1024 * 1024;
/// Largest drive file attached to a draft
const MAX_DRAFT_ATTACHMENT_BYTES: usize = 3 * 1024 * 1024;
/// Maximum drive attachments per draft
const MAX_DRAFT_ATTACHMENTS: usize = 10;

/// Microsoft 365 MCP server
///
/// Holds read-only configuration, the provider connector, and the document
/// renderer. Implements MCP tool handlers via `#[tool]` attribute macro and
/// `ServerHandler` trait.
#[derive(Clone)]
pub struct GraphMcpServer {
    /// Server config (folders, concurrency)
    config: Arc<ServerConfig>,
    /// Builds a provider bound to the calling request's credential
    connector: Arc<dyn ProviderConnector>,
    /// Renders rich message bodies to PDF
    renderer: Arc<dyn DocumentRenderer>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GraphMcpServer {
    /// Create a new MCP server instance
    pub fn new(
        config: Arc<ServerConfig>,
        connector: Arc<dyn ProviderConnector>,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> Self {
        Self {
            config,
            connector,
            renderer,
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: Profile of the authenticated user
    #[tool(
        name = "get_user_info",
        description = "Get information about the authenticated user"
    )]
    async fn get_user_info(
        &self,
        context: RequestContext<RoleServer>,
    ) -> Result<Json<ToolEnvelope<UserProfile>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            let user = self.provider(&context)?.get_user().await?;
            let who = user
                .display_name
                .clone()
                .unwrap_or_else(|| user.id.clone());
            Ok((format!("Signed in as {who}"), user))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Drive item metadata, optionally with content
    #[tool(
        name = "get_file",
        description = "Get a file from OneDrive by ID. Returns file metadata including OneDrive file ID, name, size, and URLs. Set include_content=true to also return base64 content (files up to 4 MiB)."
    )]
    async fn get_file(
        &self,
        Parameters(input): Parameters<GetFileInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<Json<ToolEnvelope<FileDetail>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_id(&input.item_id, "item_id")?;
            let provider = self.provider(&context)?;
            let detail = get_file_impl(provider.as_ref(), &input).await?;
            Ok((format!("File '{}' retrieved", detail.item.name), detail))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Relevance search over the drive
    #[tool(
        name = "search_files",
        description = "Search for files in OneDrive by name, content, or metadata."
    )]
    async fn search_files(
        &self,
        Parameters(input): Parameters<SearchFilesInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<Json<ToolEnvelope<ListResult<DriveItemInfo>>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_search_text(&input.query)?;
            validate_range(input.top, 1, MAX_FILE_TOP, "top")?;
            let items = self
                .provider(&context)?
                .search_items(&input.query, input.top)
                .await?;
            let data = ListResult::new(items);
            Ok((format!("{} item(s) found", data.count), data))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Move a file to a folder described in free text
    ///
    /// The destination is the first folder the provider's search ranks for
    /// the description; the response names it so the caller can verify.
    #[tool(
        name = "move_file",
        description = "Move a file to a different folder in OneDrive. The destination is a free-text folder description resolved by search; the first matching folder is used and returned. Optionally rename the file during the move."
    )]
    async fn move_file(
        &self,
        Parameters(input): Parameters<MoveFileInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_id(&input.item_id, "item_id")?;
            validate_search_text(&input.destination)?;
            if let Some(name) = &input.new_name {
                validate_file_name(name)?;
            }
            let provider = self.provider(&context)?;
            let outcome = destination::move_to_described_folder(
                provider.as_ref(),
                &input.item_id,
                &input.destination,
                input.new_name.as_deref(),
            )
            .await?;
            let summary = match &outcome {
                destination::Resolution::Moved { moved, destination } => {
                    format!("Moved '{}' to '{}'", moved.name, destination.path)
                }
                destination::Resolution::NoMatch { error, .. } => error.clone(),
            };
            let data = serde_json::to_value(outcome)
                .map_err(|e| AppError::Internal(format!("serialization failure: {e}")))?;
            Ok((summary, data))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Search mailbox messages
    #[tool(
        name = "search_inbox_messages",
        description = "Search for messages in the inbox. Returns message details including conversation_id."
    )]
    async fn search_inbox_messages(
        &self,
        Parameters(input): Parameters<SearchInboxInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<Json<ToolEnvelope<ListResult<MessageSummary>>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_search_text(&input.query)?;
            validate_range(input.top, 1, MAX_MESSAGE_TOP, "top")?;
            let messages = self
                .provider(&context)?
                .search_messages(&input.query, input.top)
                .await?;
            let data = ListResult::new(messages.iter().map(|m| m.summary()).collect());
            Ok((format!("{} message(s) found", data.count), data))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Ingest a conversation thread into OneDrive
    ///
    /// Renders HTML bodies to PDF and copies file attachments into
    /// `<attachments folder>/<conversation prefix>`. Per-file failures are
    /// reported inline.
    #[tool(
        name = "get_conversation",
        description = "Get all messages and attachments from a conversation thread, oldest first. HTML bodies are rendered to PDF and file attachments are uploaded to OneDrive; per-file failures are reported inline. Use search_inbox_messages first to find the conversation_id."
    )]
    async fn get_conversation(
        &self,
        Parameters(input): Parameters<GetConversationInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<Json<ToolEnvelope<ConversationResult>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_id(&input.conversation_id, "conversation_id")?;
            let provider = self.provider(&context)?;
            let options = IngestOptions {
                root_folder: self.config.attachments_folder.clone(),
                concurrency: self.config.ingest_concurrency,
            };
            let data = conversation::ingest_conversation(
                provider.as_ref(),
                self.renderer.as_ref(),
                &input.conversation_id,
                &options,
                &context.ct,
            )
            .await?;
            Ok((conversation_summary(&data), data))
        }
        .await;
        finalize_tool(started, result)
    }

    /// Tool: Create a draft email
    #[tool(
        name = "create_draft_email",
        description = "Creates a draft email message in the user's Drafts folder. Supports HTML content and file attachments from OneDrive (referenced by drive item ID, max 3 MiB each). The draft can be edited and sent later from Outlook."
    )]
    async fn create_draft_email(
        &self,
        Parameters(input): Parameters<CreateDraftInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<Json<ToolEnvelope<DraftResult>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_draft_input(&input)?;
            let provider = self.provider(&context)?;
            let data = create_draft_impl(provider.as_ref(), input).await?;
            Ok(("Draft created".to_owned(), data))
        }
        .await;
        finalize_tool(started, result)
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for GraphMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Microsoft 365 MCP server. Every call acts as the user identified by the request's bearer token; get_conversation copies thread attachments into OneDrive.",
        )
    }
}

impl GraphMcpServer {
    /// Provider bound to the credential admitted for this request
    fn provider(
        &self,
        context: &RequestContext<RoleServer>,
    ) -> AppResult<Arc<dyn ResourceProvider>> {
        let credential = request_credential(context)?;
        tracing::debug!(subject = %credential.claims.subject, "connecting provider");
        Ok(self.connector.connect(&credential))
    }
}

/// Credential placed in the HTTP request extensions by the admission layer
fn request_credential(context: &RequestContext<RoleServer>) -> AppResult<Credential> {
    context
        .extensions
        .get::<axum::http::request::Parts>()
        .and_then(|parts| parts.extensions.get::<Credential>())
        .cloned()
        .ok_or_else(|| AppError::Internal("tool call reached without admitted credential".to_owned()))
}

async fn get_file_impl(
    provider: &dyn ResourceProvider,
    input: &GetFileInput,
) -> AppResult<FileDetail> {
    let (item, download_url) = provider.get_item(&input.item_id).await?;
    if !input.include_content {
        return Ok(FileDetail {
            item,
            download_url,
            content_base64: None,
        });
    }

    if item.is_folder {
        return Err(AppError::invalid("include_content is not supported for folders"));
    }
    if item.size > MAX_INLINE_CONTENT_BYTES {
        return Err(AppError::InvalidInput(format!(
            "file is {} bytes; include_content supports at most {MAX_INLINE_CONTENT_BYTES}",
            item.size
        )));
    }
    let content = provider.get_item_bytes(&input.item_id).await?;
    Ok(FileDetail {
        item: content.item,
        download_url: Some(content.download_url),
        content_base64: Some(content.base64),
    })
}

async fn create_draft_impl(
    provider: &dyn ResourceProvider,
    input: CreateDraftInput,
) -> AppResult<DraftResult> {
    let attachments = try_join_all(input.attachment_item_ids.iter().map(|id| async move {
        let content = provider.get_item_bytes(id).await?;
        if content.bytes.len() > MAX_DRAFT_ATTACHMENT_BYTES {
            return Err(AppError::InvalidInput(format!(
                "attachment '{}' is {} bytes; drafts accept at most {MAX_DRAFT_ATTACHMENT_BYTES} per file",
                content.item.name,
                content.bytes.len()
            )));
        }
        Ok(DraftAttachment {
            name: content.item.name,
            content_type: content.item.mime_type,
            content_base64: content.base64,
        })
    }))
    .await?;

    let draft = DraftMessage {
        subject: input.subject,
        body: input.body,
        body_content_type: input.body_content_type,
        to: recipients(input.to_recipients),
        cc: recipients(input.cc_recipients),
        bcc: recipients(input.bcc_recipients),
        importance: input.importance,
        attachments,
    };
    let created = provider.create_draft_message(&draft).await?;
    Ok(DraftResult {
        id: created.id,
        web_link: created.web_link,
        subject: created.subject,
        is_draft: created.is_draft,
        has_attachments: created.has_attachments,
        attachment_count: created.attachment_count,
    })
}

fn recipients(input: Vec<RecipientInput>) -> Vec<Recipient> {
    input
        .into_iter()
        .map(|r| Recipient {
            address: r.address.trim().to_owned(),
            name: r.name,
        })
        .collect()
}

fn conversation_summary(data: &ConversationResult) -> String {
    let uploads = data.results.iter().flat_map(|m| &m.uploads);
    let (ok, failed) = uploads.fold((0usize, 0usize), |(ok, failed), u| {
        if u.error.is_some() {
            (ok, failed + 1)
        } else {
            (ok + 1, failed)
        }
    });
    if failed == 0 {
        format!("{} message(s), {ok} file(s) uploaded", data.count)
    } else {
        format!(
            "{} message(s), {ok} file(s) uploaded, {failed} failed",
            data.count
        )
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

/// Validate provider identifiers (item, conversation)
fn validate_id(value: &str, field: &str) -> AppResult<()> {
    if value.trim().is_empty() || value.len() > 512 {
        return Err(AppError::InvalidInput(format!(
            "{field} must be 1..512 characters"
        )));
    }
    validate_no_controls(value, field)
}

/// Reject control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate numeric value in range
fn validate_range(value: usize, min: usize, max: usize, field: &str) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::InvalidInput(format!(
            "{field} must be in range {min}..{max}"
        )));
    }
    Ok(())
}

/// Validate search text field bounds and characters
fn validate_search_text(input: &str) -> AppResult<()> {
    if input.trim().is_empty() || input.len() > 256 {
        return Err(AppError::InvalidInput(
            "search text fields must be 1..256 chars".to_owned(),
        ));
    }
    validate_no_controls(input, "search text")
}

/// Validate a caller-chosen file name
fn validate_file_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() || name.len() > 255 {
        return Err(AppError::invalid("new_name must be 1..255 characters"));
    }
    if name.contains(['/', '\\']) || name.split('.').all(str::is_empty) {
        return Err(AppError::invalid("new_name must be a plain file name"));
    }
    validate_no_controls(name, "new_name")
}

/// Minimal address check: one `@`, non-empty local part and dotted domain
fn validate_email(address: &str) -> AppResult<()> {
    let address = address.trim();
    let valid = match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !address.chars().any(|c| c.is_whitespace() || c.is_control())
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "invalid email address '{address}'"
        )))
    }
}

/// Validate create draft input
fn validate_draft_input(input: &CreateDraftInput) -> AppResult<()> {
    if input.subject.len() > 998 {
        return Err(AppError::invalid("subject must be at most 998 characters"));
    }
    validate_no_controls(&input.subject, "subject")?;
    for recipient in input
        .to_recipients
        .iter()
        .chain(&input.cc_recipients)
        .chain(&input.bcc_recipients)
    {
        validate_email(&recipient.address)?;
    }
    if input.attachment_item_ids.len() > MAX_DRAFT_ATTACHMENTS {
        return Err(AppError::InvalidInput(format!(
            "at most {MAX_DRAFT_ATTACHMENTS} attachments per draft"
        )));
    }
    for id in &input.attachment_item_ids {
        validate_id(id, "attachment_item_ids")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        conversation_summary, create_draft_impl, finalize_tool, get_file_impl, validate_draft_input,
        validate_email, validate_file_name, validate_search_text,
    };
    use crate::errors::AppError;
    use crate::models::{
        ArtifactKind, ArtifactSource, ConversationMessage, ConversationResult, CreateDraftInput,
        GetFileInput, ToolEnvelope, UploadedItem,
    };
    use crate::testing::{FakeProvider, file_item};

    fn sample_conversation() -> ConversationResult {
        let source = ArtifactSource {
            kind: ArtifactKind::Attachment,
            name: "a.pdf".to_owned(),
            content_type: Some("application/pdf".to_owned()),
            size: 3,
        };
        ConversationResult {
            conversation_id: "c1".to_owned(),
            count: 1,
            results: vec![ConversationMessage {
                id: "m1".to_owned(),
                subject: Some("Hi".to_owned()),
                from: Some("ann@example.com".to_owned()),
                received: Some("2025-01-02T10:00:00Z".to_owned()),
                preview: Some("hello".to_owned()),
                uploads: vec![
                    UploadedItem::uploaded(source.clone(), file_item("d1", "a.pdf")),
                    UploadedItem::failed(source, "Failed to upload to OneDrive"),
                ],
            }],
        }
    }

    #[test]
    fn rejects_control_chars_in_search_text() {
        let err = validate_search_text("hello\nworld").expect_err("must fail");
        assert!(err.to_string().contains("control characters"));
    }

    #[test]
    fn email_validation_accepts_plain_addresses_only() {
        validate_email("ann@example.com").expect("valid");
        for bad in ["ann", "@example.com", "ann@example", "a b@example.com", "a@b@c.com"] {
            assert!(validate_email(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn new_name_must_be_plain_file_name() {
        validate_file_name("report.pdf").expect("valid");
        assert!(validate_file_name("../report.pdf").is_err());
        assert!(validate_file_name("..").is_err());
    }

    #[test]
    fn draft_validation_checks_every_recipient_list() {
        let input: CreateDraftInput = serde_json::from_value(json!({
            "subject": "Hi",
            "body": "x",
            "to_recipients": [{ "address": "ann@example.com" }],
            "bcc_recipients": [{ "address": "not-an-address" }]
        }))
        .expect("parses");
        let err = validate_draft_input(&input).expect_err("bcc is invalid");
        assert!(err.to_string().contains("not-an-address"));
    }

    #[test]
    fn structured_output_round_trips_through_text() {
        let started = std::time::Instant::now();
        let data = sample_conversation();
        let rmcp::Json(envelope) =
            finalize_tool(started, Ok((conversation_summary(&data), data))).expect("ok");

        let text = serde_json::to_string(&envelope).expect("serializes");
        let structured = serde_json::to_value(&envelope).expect("serializes");
        let parsed: serde_json::Value = serde_json::from_str(&text).expect("parses");
        assert_eq!(parsed, structured);

        let back: ToolEnvelope<ConversationResult> =
            serde_json::from_value(parsed).expect("typed round trip");
        assert_eq!(back, envelope);
        assert!(!text.contains("content_bytes"));
    }

    #[test]
    fn conversation_summary_counts_failures() {
        assert_eq!(
            conversation_summary(&sample_conversation()),
            "1 message(s), 1 file(s) uploaded, 1 failed"
        );
    }

    #[tokio::test]
    async fn get_file_without_content_skips_download() {
        let provider = FakeProvider::default();
        let detail = get_file_impl(
            &provider,
            &GetFileInput {
                item_id: "file-1".to_owned(),
                include_content: false,
            },
        )
        .await
        .expect("metadata");
        assert_eq!(detail.item.id, "file-1");
        assert!(detail.content_base64.is_none());
        assert_eq!(provider.downloads(), 0);
    }

    #[tokio::test]
    async fn get_file_with_content_returns_base64() {
        let provider = FakeProvider::default();
        let detail = get_file_impl(
            &provider,
            &GetFileInput {
                item_id: "file-1".to_owned(),
                include_content: true,
            },
        )
        .await
        .expect("content");
        assert_eq!(detail.content_base64.as_deref(), Some("aGVsbG8="));
        assert_eq!(provider.downloads(), 1);
    }

    #[tokio::test]
    async fn missing_download_locator_surfaces_as_error() {
        let provider = FakeProvider::default().without_download_url();
        let err = get_file_impl(
            &provider,
            &GetFileInput {
                item_id: "file-1".to_owned(),
                include_content: true,
            },
        )
        .await
        .expect_err("no locator");
        assert!(matches!(err, AppError::NoDownloadLocator(_)));
    }

    #[tokio::test]
    async fn draft_attaches_drive_files() {
        let provider = FakeProvider::default();
        let input: CreateDraftInput = serde_json::from_value(json!({
            "subject": "Report",
            "body": "<p>see attached</p>",
            "to_recipients": [{ "address": "ann@example.com", "name": "Ann" }],
            "attachment_item_ids": ["file-1", "file-2"]
        }))
        .expect("parses");

        let result = create_draft_impl(&provider, input).await.expect("draft created");
        assert_eq!(result.attachment_count, 2);
        assert!(result.has_attachments);

        let draft = provider.last_draft().expect("draft recorded");
        assert_eq!(draft.to[0].address, "ann@example.com");
        assert_eq!(draft.attachments[0].content_base64, "aGVsbG8=");
    }
}
