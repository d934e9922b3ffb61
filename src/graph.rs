//! Microsoft Graph facade
//!
//! [`ResourceProvider`] is the seam between tool handlers and the upstream
//! API: one method per capability, typed inputs, normalized outputs.
//! [`GraphClient`] implements it over `reqwest`, with every call bounded by the
//! configured timeout and every non-success status surfaced as
//! `AppError::Upstream`. A client is built per request from that request's
//! [`Credential`] by a [`ProviderConnector`]; nothing credential-bearing is
//! shared between requests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::timeout;

use crate::auth::Credential;
use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{BodyContentType, DriveItemInfo, Importance, MessageSummary, UserProfile};

/// OData type tag of attachments that carry inline content bytes
const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";
/// Messages requested per thread page
const THREAD_PAGE_SIZE: usize = 50;
/// Upper bound on pages fetched for one thread
const MAX_THREAD_PAGES: usize = 20;
/// Message fields selected for search and thread listings
const MESSAGE_SELECT: &str = "id,conversationId,subject,from,receivedDateTime,bodyPreview,body,hasAttachments,webLink";

/// Raw bytes of a drive item plus their base64 form
#[derive(Debug, Clone)]
pub struct ItemBytes {
    pub item: DriveItemInfo,
    pub bytes: Vec<u8>,
    pub base64: String,
    /// Transient download URL the bytes were fetched from
    pub download_url: String,
}

/// Message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBody {
    pub content: String,
    /// `html` or `text`
    pub content_type: String,
}

impl MessageBody {
    /// Whether the body is markup that should be rendered to a document
    pub fn is_rich(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("html")
    }
}

/// Message attachment
///
/// `content_bytes` is only present for file attachments; item and reference
/// attachments are reference-only and never uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub id: String,
    pub name: String,
    pub content_type: Option<String>,
    pub size: u64,
    /// Base64 content as delivered by the provider
    pub content_bytes: Option<String>,
    /// Content-ID for images referenced from the body via `cid:`
    pub content_id: Option<String>,
    pub is_inline: bool,
}

/// Snapshot of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub id: String,
    pub conversation_id: Option<String>,
    pub subject: Option<String>,
    pub from_name: Option<String>,
    pub from_address: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub preview: Option<String>,
    pub body: Option<MessageBody>,
    pub has_attachments: bool,
    pub web_link: Option<String>,
    pub attachments: Vec<MailAttachment>,
}

impl MailMessage {
    /// Received time as RFC 3339
    pub fn received_rfc3339(&self) -> Option<String> {
        self.received_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    /// Summary form used by inbox search
    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            id: self.id.clone(),
            conversation_id: self.conversation_id.clone(),
            subject: self.subject.clone(),
            from: self.from_address.clone(),
            from_name: self.from_name.clone(),
            received: self.received_rfc3339(),
            preview: self.preview.clone(),
            has_attachments: self.has_attachments,
            web_link: self.web_link.clone(),
        }
    }
}

/// Draft recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub name: Option<String>,
}

/// File attached to a new draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftAttachment {
    pub name: String,
    pub content_type: Option<String>,
    pub content_base64: String,
}

/// Draft message to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftMessage {
    pub subject: String,
    pub body: String,
    pub body_content_type: BodyContentType,
    pub to: Vec<Recipient>,
    pub cc: Vec<Recipient>,
    pub bcc: Vec<Recipient>,
    pub importance: Importance,
    pub attachments: Vec<DraftAttachment>,
}

/// Draft as created by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedDraft {
    pub id: String,
    pub web_link: Option<String>,
    pub subject: Option<String>,
    pub is_draft: bool,
    pub has_attachments: bool,
    pub attachment_count: usize,
}

/// Upstream capabilities used by the tools
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Profile of the token's user
    async fn get_user(&self) -> AppResult<UserProfile>;

    /// Drive item metadata, including the transient download URL if any
    async fn get_item(&self, item_id: &str) -> AppResult<(DriveItemInfo, Option<String>)>;

    /// Relevance-ordered drive search
    async fn search_items(&self, query: &str, top: usize) -> AppResult<Vec<DriveItemInfo>>;

    /// Metadata plus content of a file
    ///
    /// # Errors
    ///
    /// - `NoDownloadLocator` if the item has no download URL (e.g. folders)
    /// - `DownloadFailed` if fetching the URL returns a non-success status
    async fn get_item_bytes(&self, item_id: &str) -> AppResult<ItemBytes>;

    /// Upload `bytes` as `folder/file_name`, replacing any existing file
    ///
    /// Implementations must run the name through [`sanitize_file_name`].
    async fn upload_item(
        &self,
        folder: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> AppResult<DriveItemInfo>;

    /// Re-parent (and optionally rename) an item
    async fn move_item(
        &self,
        item_id: &str,
        parent_id: &str,
        new_name: Option<&str>,
    ) -> AppResult<DriveItemInfo>;

    /// Single message with attachments
    async fn get_message(&self, message_id: &str) -> AppResult<MailMessage>;

    /// Relevance-ordered mailbox search
    async fn search_messages(&self, query: &str, top: usize) -> AppResult<Vec<MailMessage>>;

    /// Every message of a conversation, oldest first, with attachments
    async fn get_thread_messages(&self, conversation_id: &str) -> AppResult<Vec<MailMessage>>;

    /// Create a draft in the Drafts folder
    async fn create_draft_message(&self, draft: &DraftMessage) -> AppResult<CreatedDraft>;
}

/// Builds a provider bound to one request's credential
pub trait ProviderConnector: Send + Sync {
    fn connect(&self, credential: &Credential) -> Arc<dyn ResourceProvider>;
}

/// Connector producing [`GraphClient`]s
///
/// Holds only the HTTP connection pool and endpoint settings.
#[derive(Debug, Clone)]
pub struct GraphConnector {
    http: reqwest::Client,
    base_url: String,
    call_timeout: Duration,
}

impl GraphConnector {
    /// Create connector from server config
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the HTTP client cannot be built.
    pub fn new(config: &ServerConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("m365-mcp-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.graph_base_url.clone(),
            call_timeout: Duration::from_millis(config.http_timeout_ms),
        })
    }
}

impl ProviderConnector for GraphConnector {
    fn connect(&self, credential: &Credential) -> Arc<dyn ResourceProvider> {
        Arc::new(GraphClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            call_timeout: self.call_timeout,
            token: credential.token.clone(),
        })
    }
}

/// Graph API client for a single request
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    call_timeout: Duration,
    token: SecretString,
}

impl GraphClient {
    /// Authenticated request against a path below the base URL
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(self.token.expose_secret())
    }

    /// Send with timeout and map non-success statuses to `Upstream`
    async fn send(&self, builder: RequestBuilder, what: &str) -> AppResult<Response> {
        let response = timeout(self.call_timeout, builder.send())
            .await
            .map_err(|_| AppError::Timeout(format!("{what} timed out")))
            .and_then(|r| r.map_err(|e| AppError::Internal(format!("{what} failed: {e}"))))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = upstream_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        });
        tracing::warn!(%status, %what, %message, "upstream returned error");
        Err(AppError::Upstream {
            status: status.as_u16(),
            message,
        })
    }

    /// Send and decode a JSON body
    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> AppResult<T> {
        let response = self.send(builder, what).await?;
        timeout(self.call_timeout, response.json::<T>())
            .await
            .map_err(|_| AppError::Timeout(format!("{what} body timed out")))
            .and_then(|r| {
                r.map_err(|e| AppError::Internal(format!("{what} returned unexpected JSON: {e}")))
            })
    }

    async fn fetch_download(&self, url: &str) -> AppResult<Vec<u8>> {
        // Pre-authenticated URL; the bearer token must not be sent to it.
        let response = timeout(self.call_timeout, self.http.get(url).send())
            .await
            .map_err(|_| AppError::Timeout("download timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Internal(format!("download failed: {e}"))))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::DownloadFailed {
                status: status.as_u16(),
            });
        }
        let bytes = timeout(self.call_timeout, response.bytes())
            .await
            .map_err(|_| AppError::Timeout("download body timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Internal(format!("download body failed: {e}"))))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ResourceProvider for GraphClient {
    async fn get_user(&self) -> AppResult<UserProfile> {
        let user: GraphUser = self
            .send_json(self.request(Method::GET, "/me"), "get user")
            .await?;
        Ok(user.into())
    }

    async fn get_item(&self, item_id: &str) -> AppResult<(DriveItemInfo, Option<String>)> {
        let path = format!("/me/drive/items/{}", urlencoding::encode(item_id));
        let item: GraphDriveItem = self
            .send_json(self.request(Method::GET, &path), "get item")
            .await?;
        let download_url = item.download_url.clone();
        Ok((item.into(), download_url))
    }

    async fn search_items(&self, query: &str, top: usize) -> AppResult<Vec<DriveItemInfo>> {
        let path = format!(
            "/me/drive/root/search(q='{}')",
            urlencoding::encode(&escape_odata_literal(query))
        );
        let page: GraphPage<GraphDriveItem> = self
            .send_json(
                self.request(Method::GET, &path)
                    .query(&[("$top", top.to_string())]),
                "search items",
            )
            .await?;
        Ok(page.value.into_iter().map(Into::into).collect())
    }

    async fn get_item_bytes(&self, item_id: &str) -> AppResult<ItemBytes> {
        let (item, download_url) = self.get_item(item_id).await?;
        let download_url =
            download_url.ok_or_else(|| AppError::NoDownloadLocator(item_id.to_owned()))?;
        let bytes = self.fetch_download(&download_url).await?;
        let base64 = STANDARD.encode(&bytes);
        Ok(ItemBytes {
            item,
            bytes,
            base64,
            download_url,
        })
    }

    async fn upload_item(
        &self,
        folder: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> AppResult<DriveItemInfo> {
        let path = format!(
            "/me/drive/root:/{}:/content",
            drive_path(folder, &sanitize_file_name(file_name))
        );
        let item: GraphDriveItem = self
            .send_json(
                self.request(Method::PUT, &path)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(bytes),
                "upload item",
            )
            .await?;
        Ok(item.into())
    }

    async fn move_item(
        &self,
        item_id: &str,
        parent_id: &str,
        new_name: Option<&str>,
    ) -> AppResult<DriveItemInfo> {
        let path = format!("/me/drive/items/{}", urlencoding::encode(item_id));
        let mut patch = json!({ "parentReference": { "id": parent_id } });
        if let Some(name) = new_name {
            patch["name"] = Value::String(sanitize_file_name(name));
        }
        let item: GraphDriveItem = self
            .send_json(self.request(Method::PATCH, &path).json(&patch), "move item")
            .await?;
        Ok(item.into())
    }

    async fn get_message(&self, message_id: &str) -> AppResult<MailMessage> {
        let path = format!("/me/messages/{}", urlencoding::encode(message_id));
        let message: GraphMessage = self
            .send_json(
                self.request(Method::GET, &path)
                    .query(&[("$expand", "attachments")]),
                "get message",
            )
            .await?;
        Ok(message.into())
    }

    async fn search_messages(&self, query: &str, top: usize) -> AppResult<Vec<MailMessage>> {
        let search = format!("\"{}\"", query.replace('"', "'"));
        let page: GraphPage<GraphMessage> = self
            .send_json(
                self.request(Method::GET, "/me/messages").query(&[
                    ("$search", search),
                    ("$top", top.to_string()),
                    ("$select", MESSAGE_SELECT.to_owned()),
                ]),
                "search messages",
            )
            .await?;
        Ok(page.value.into_iter().map(Into::into).collect())
    }

    async fn get_thread_messages(&self, conversation_id: &str) -> AppResult<Vec<MailMessage>> {
        let filter = format!(
            "conversationId eq '{}'",
            escape_odata_literal(conversation_id)
        );
        let page_size = THREAD_PAGE_SIZE.to_string();
        let first: GraphPage<GraphMessage> = self
            .send_json(
                self.request(Method::GET, "/me/messages").query(&[
                    ("$filter", filter.as_str()),
                    ("$expand", "attachments"),
                    ("$select", MESSAGE_SELECT),
                    ("$top", page_size.as_str()),
                ]),
                "get thread messages",
            )
            .await?;

        let pages = collect_pages(first, MAX_THREAD_PAGES, |next| {
            self.send_json(
                self.http.get(next).bearer_auth(self.token.expose_secret()),
                "get thread messages page",
            )
        })
        .await?;

        let mut messages: Vec<MailMessage> = pages.into_iter().map(MailMessage::from).collect();
        // Graph rejects $orderby together with this filter; order locally.
        messages.sort_by_key(|m| m.received_at);
        Ok(messages)
    }

    async fn create_draft_message(&self, draft: &DraftMessage) -> AppResult<CreatedDraft> {
        let created: GraphMessage = self
            .send_json(
                self.request(Method::POST, "/me/messages")
                    .json(&draft_payload(draft)),
                "create draft",
            )
            .await?;
        let attachment_count = created
            .attachments
            .as_ref()
            .map_or(draft.attachments.len(), Vec::len);
        Ok(CreatedDraft {
            id: created.id,
            web_link: created.web_link,
            subject: created.subject,
            is_draft: created.is_draft.unwrap_or(true),
            has_attachments: created.has_attachments.unwrap_or(attachment_count > 0),
            attachment_count,
        })
    }
}

/// Drain `first` and every page behind its `@odata.nextLink` chain
///
/// At most `max_pages` pages are fetched in total; a chain that continues past
/// that fails with `LimitExceeded` instead of returning a partial list.
async fn collect_pages<T, F, Fut>(
    first: GraphPage<T>,
    max_pages: usize,
    mut fetch_next: F,
) -> AppResult<Vec<T>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = AppResult<GraphPage<T>>>,
{
    let mut items = Vec::new();
    let mut page = first;
    let mut fetched = 1;
    loop {
        items.append(&mut page.value);
        let Some(next) = page.next_link.take() else {
            return Ok(items);
        };
        if fetched >= max_pages {
            tracing::warn!(pages = fetched, items = items.len(), "page limit reached");
            return Err(AppError::LimitExceeded(format!(
                "result spans more than {max_pages} pages ({} items read)",
                items.len()
            )));
        }
        page = fetch_next(next).await?;
        fetched += 1;
    }
}

/// Pull `error.message` out of a Graph error body
fn upstream_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(str::to_owned)
}

/// Double single quotes for OData string literals
fn escape_odata_literal(input: &str) -> String {
    input.replace('\'', "''")
}

/// Percent-encode each segment of `folder/name`
fn drive_path(folder: &str, file_name: &str) -> String {
    folder
        .split('/')
        .filter(|s| !s.is_empty())
        .chain(std::iter::once(file_name))
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Make a provider-safe file name
///
/// Removes path separators, `..`, control characters, and characters OneDrive
/// rejects, then trims leading/trailing dots and spaces. Returns `attachment`
/// when nothing usable is left.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|ch| {
            !ch.is_control() && !matches!(ch, '"' | '*' | ':' | '<' | '>' | '?' | '|' | '#' | '%')
        })
        .collect();
    let cleaned = cleaned.replace("..", ".");
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "attachment".to_owned()
    } else {
        trimmed.chars().take(200).collect()
    }
}

fn draft_payload(draft: &DraftMessage) -> Value {
    let recipients = |list: &[Recipient]| -> Vec<Value> {
        list.iter()
            .map(|r| json!({ "emailAddress": { "address": r.address, "name": r.name } }))
            .collect()
    };
    let attachments: Vec<Value> = draft
        .attachments
        .iter()
        .map(|a| {
            json!({
                "@odata.type": FILE_ATTACHMENT_TYPE,
                "name": a.name,
                "contentType": a.content_type,
                "contentBytes": a.content_base64,
            })
        })
        .collect();

    json!({
        "subject": draft.subject,
        "body": {
            "contentType": match draft.body_content_type {
                BodyContentType::Html => "html",
                BodyContentType::Text => "text",
            },
            "content": draft.body,
        },
        "toRecipients": recipients(&draft.to),
        "ccRecipients": recipients(&draft.cc),
        "bccRecipients": recipients(&draft.bcc),
        "importance": match draft.importance {
            Importance::Low => "low",
            Importance::Normal => "normal",
            Importance::High => "high",
        },
        "attachments": attachments,
    })
}

#[derive(Debug, Deserialize)]
struct GraphPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    id: String,
    display_name: Option<String>,
    mail: Option<String>,
    user_principal_name: Option<String>,
    job_title: Option<String>,
    office_location: Option<String>,
}

impl From<GraphUser> for UserProfile {
    fn from(u: GraphUser) -> Self {
        Self {
            id: u.id,
            display_name: u.display_name,
            mail: u.mail,
            user_principal_name: u.user_principal_name,
            job_title: u.job_title,
            office_location: u.office_location,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDriveItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: Option<u64>,
    web_url: Option<String>,
    file: Option<GraphFileFacet>,
    folder: Option<Value>,
    parent_reference: Option<GraphParentReference>,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphFileFacet {
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphParentReference {
    path: Option<String>,
}

impl From<GraphDriveItem> for DriveItemInfo {
    fn from(item: GraphDriveItem) -> Self {
        Self {
            id: item.id,
            name: item.name,
            mime_type: item.file.and_then(|f| f.mime_type),
            size: item.size.unwrap_or(0),
            web_url: item.web_url,
            is_folder: item.folder.is_some(),
            parent_path: item.parent_reference.and_then(|p| p.path),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    conversation_id: Option<String>,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    received_date_time: Option<DateTime<Utc>>,
    body_preview: Option<String>,
    body: Option<GraphItemBody>,
    has_attachments: Option<bool>,
    is_draft: Option<bool>,
    web_link: Option<String>,
    attachments: Option<Vec<GraphAttachment>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphItemBody {
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    #[serde(rename = "@odata.type")]
    odata_type: Option<String>,
    #[serde(default)]
    id: String,
    name: Option<String>,
    content_type: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    is_inline: bool,
    content_id: Option<String>,
    content_bytes: Option<String>,
}

impl From<GraphMessage> for MailMessage {
    fn from(m: GraphMessage) -> Self {
        let (from_name, from_address) = m
            .from
            .and_then(|f| f.email_address)
            .map_or((None, None), |e| (e.name, e.address));
        let attachments: Vec<MailAttachment> = m
            .attachments
            .unwrap_or_default()
            .into_iter()
            .map(|a| {
                let is_file = a.odata_type.as_deref() == Some(FILE_ATTACHMENT_TYPE);
                MailAttachment {
                    id: a.id,
                    name: a.name.unwrap_or_else(|| "attachment".to_owned()),
                    content_type: a.content_type,
                    size: a.size,
                    content_bytes: a.content_bytes.filter(|_| is_file),
                    content_id: a.content_id,
                    is_inline: a.is_inline,
                }
            })
            .collect();
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            subject: m.subject,
            from_name,
            from_address,
            received_at: m.received_date_time,
            preview: m.body_preview,
            body: m.body.map(|b| MessageBody {
                content: b.content.unwrap_or_default(),
                content_type: b.content_type.unwrap_or_else(|| "text".to_owned()),
            }),
            has_attachments: m.has_attachments.unwrap_or(!attachments.is_empty()),
            web_link: m.web_link,
            attachments,
        }
    }
}
