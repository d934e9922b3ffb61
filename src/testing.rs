//! In-memory fakes and fixtures for unit tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde_json::Value;

use crate::auth::Credential;
use crate::errors::{AppError, AppResult};
use crate::graph::{
    CreatedDraft, DraftMessage, ItemBytes, MailAttachment, MailMessage, MessageBody,
    ProviderConnector, ResourceProvider, sanitize_file_name,
};
use crate::models::{DriveItemInfo, UserProfile};
use crate::render::DocumentRenderer;

/// Content served for every fake download
const FAKE_CONTENT: &[u8] = b"hello";

/// Unsigned JWT with the given claim payload
pub fn jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

pub fn attachment(name: &str, content_bytes: Option<&str>) -> MailAttachment {
    MailAttachment {
        id: format!("att-{name}"),
        name: name.to_owned(),
        content_type: Some("application/octet-stream".to_owned()),
        size: content_bytes.map_or(0, |b| b.len() as u64),
        content_bytes: content_bytes.map(str::to_owned),
        content_id: None,
        is_inline: false,
    }
}

fn message(id: &str, subject: &str, content: &str, content_type: &str) -> MailMessage {
    MailMessage {
        id: id.to_owned(),
        conversation_id: Some("conv".to_owned()),
        subject: Some(subject.to_owned()),
        from_name: Some("Ann".to_owned()),
        from_address: Some("ann@example.com".to_owned()),
        received_at: None,
        preview: Some(content.chars().take(40).collect()),
        body: Some(MessageBody {
            content: content.to_owned(),
            content_type: content_type.to_owned(),
        }),
        has_attachments: false,
        web_link: None,
        attachments: Vec::new(),
    }
}

pub fn html_message(id: &str, subject: &str, html: &str) -> MailMessage {
    message(id, subject, html, "html")
}

pub fn text_message(id: &str, subject: &str, text: &str) -> MailMessage {
    message(id, subject, text, "text")
}

pub fn file_item(id: &str, name: &str) -> DriveItemInfo {
    DriveItemInfo {
        id: id.to_owned(),
        name: name.to_owned(),
        mime_type: Some("application/octet-stream".to_owned()),
        size: FAKE_CONTENT.len() as u64,
        web_url: Some(format!("https://drive.example/{id}")),
        is_folder: false,
        parent_path: Some("/drive/root:".to_owned()),
    }
}

pub fn folder_item(id: &str, name: &str, parent_path: &str) -> DriveItemInfo {
    DriveItemInfo {
        id: id.to_owned(),
        name: name.to_owned(),
        mime_type: None,
        size: 0,
        web_url: Some(format!("https://drive.example/{id}")),
        is_folder: true,
        parent_path: Some(parent_path.to_owned()),
    }
}

type DelayFn = Box<dyn Fn(&str) -> u64 + Send + Sync>;

#[derive(Default)]
struct Recorded {
    uploads: Vec<(String, String)>,
    moves: Vec<(String, String, Option<String>)>,
    downloads: usize,
    drafts: Vec<DraftMessage>,
}

/// Scriptable provider recording every mutating call
#[derive(Default)]
pub struct FakeProvider {
    thread: Vec<MailMessage>,
    full_messages: Vec<MailMessage>,
    search: Vec<DriveItemInfo>,
    failing_upload: Option<(String, u16)>,
    failing_thread: Option<u16>,
    upload_delay: Option<DelayFn>,
    no_download_url: bool,
    recorded: Mutex<Recorded>,
}

impl FakeProvider {
    pub fn with_thread(mut self, messages: Vec<MailMessage>) -> Self {
        self.thread = messages;
        self
    }

    /// Copy served by `get_message` in place of the thread listing
    pub fn with_full_message(mut self, message: MailMessage) -> Self {
        self.full_messages.push(message);
        self
    }

    pub fn with_search(mut self, items: Vec<DriveItemInfo>) -> Self {
        self.search = items;
        self
    }

    pub fn failing_upload(mut self, name: &str, status: u16) -> Self {
        self.failing_upload = Some((name.to_owned(), status));
        self
    }

    pub fn failing_thread(mut self, status: u16) -> Self {
        self.failing_thread = Some(status);
        self
    }

    pub fn with_upload_delay_ms(mut self, delay: impl Fn(&str) -> u64 + Send + Sync + 'static) -> Self {
        self.upload_delay = Some(Box::new(delay));
        self
    }

    pub fn without_download_url(mut self) -> Self {
        self.no_download_url = true;
        self
    }

    /// `(folder, file name)` of every upload attempt
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.recorded.lock().expect("lock").uploads.clone()
    }

    /// `(item id, parent id, new name)` of every move
    pub fn moves(&self) -> Vec<(String, String, Option<String>)> {
        self.recorded.lock().expect("lock").moves.clone()
    }

    pub fn downloads(&self) -> usize {
        self.recorded.lock().expect("lock").downloads
    }

    pub fn last_draft(&self) -> Option<DraftMessage> {
        self.recorded.lock().expect("lock").drafts.last().cloned()
    }
}

#[async_trait]
impl ResourceProvider for FakeProvider {
    async fn get_user(&self) -> AppResult<UserProfile> {
        Ok(UserProfile {
            id: "user-1".to_owned(),
            display_name: Some("Ann Example".to_owned()),
            mail: Some("ann@example.com".to_owned()),
            user_principal_name: Some("ann@example.com".to_owned()),
            job_title: None,
            office_location: None,
        })
    }

    async fn get_item(&self, item_id: &str) -> AppResult<(DriveItemInfo, Option<String>)> {
        let url = (!self.no_download_url).then(|| format!("https://download.example/{item_id}"));
        Ok((file_item(item_id, "report.pdf"), url))
    }

    async fn search_items(&self, _query: &str, top: usize) -> AppResult<Vec<DriveItemInfo>> {
        Ok(self.search.iter().take(top).cloned().collect())
    }

    async fn get_item_bytes(&self, item_id: &str) -> AppResult<ItemBytes> {
        let (item, url) = self.get_item(item_id).await?;
        let download_url = url.ok_or_else(|| AppError::NoDownloadLocator(item_id.to_owned()))?;
        self.recorded.lock().expect("lock").downloads += 1;
        Ok(ItemBytes {
            item,
            bytes: FAKE_CONTENT.to_vec(),
            base64: STANDARD.encode(FAKE_CONTENT),
            download_url,
        })
    }

    async fn upload_item(
        &self,
        folder: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> AppResult<DriveItemInfo> {
        if let Some(delay) = &self.upload_delay {
            tokio::time::sleep(Duration::from_millis(delay(file_name))).await;
        }
        self.recorded
            .lock()
            .expect("lock")
            .uploads
            .push((folder.to_owned(), file_name.to_owned()));
        if let Some((name, status)) = &self.failing_upload
            && name == file_name
        {
            return Err(AppError::Upstream {
                status: *status,
                message: "upload rejected".to_owned(),
            });
        }
        let name = sanitize_file_name(file_name);
        Ok(DriveItemInfo {
            id: format!("up-{name}"),
            size: bytes.len() as u64,
            parent_path: Some(folder.to_owned()),
            ..file_item("", &name)
        })
    }

    async fn move_item(
        &self,
        item_id: &str,
        parent_id: &str,
        new_name: Option<&str>,
    ) -> AppResult<DriveItemInfo> {
        self.recorded.lock().expect("lock").moves.push((
            item_id.to_owned(),
            parent_id.to_owned(),
            new_name.map(str::to_owned),
        ));
        Ok(file_item(item_id, new_name.unwrap_or("moved.pdf")))
    }

    async fn get_message(&self, message_id: &str) -> AppResult<MailMessage> {
        self.full_messages
            .iter()
            .chain(&self.thread)
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(|| AppError::Upstream {
                status: 404,
                message: "message not found".to_owned(),
            })
    }

    async fn search_messages(&self, _query: &str, top: usize) -> AppResult<Vec<MailMessage>> {
        Ok(self.thread.iter().take(top).cloned().collect())
    }

    async fn get_thread_messages(&self, _conversation_id: &str) -> AppResult<Vec<MailMessage>> {
        if let Some(status) = self.failing_thread {
            return Err(AppError::Upstream {
                status,
                message: "thread unavailable".to_owned(),
            });
        }
        Ok(self.thread.clone())
    }

    async fn create_draft_message(&self, draft: &DraftMessage) -> AppResult<CreatedDraft> {
        self.recorded.lock().expect("lock").drafts.push(draft.clone());
        Ok(CreatedDraft {
            id: "draft-1".to_owned(),
            web_link: Some("https://outlook.example/draft-1".to_owned()),
            subject: Some(draft.subject.clone()),
            is_draft: true,
            has_attachments: !draft.attachments.is_empty(),
            attachment_count: draft.attachments.len(),
        })
    }
}

/// Connector handing out one shared [`FakeProvider`]
#[derive(Default)]
pub struct FakeConnector {
    provider: Arc<FakeProvider>,
    connects: AtomicUsize,
}

impl FakeConnector {
    /// Number of providers built so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ProviderConnector for FakeConnector {
    fn connect(&self, _credential: &Credential) -> Arc<dyn ResourceProvider> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.provider.clone()
    }
}

/// Renderer returning a fixed PDF, or failing every render
#[derive(Debug, Default)]
pub struct FakeRenderer {
    fail: bool,
}

impl FakeRenderer {
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn render_html_to_pdf(&self, _html: &str) -> AppResult<Vec<u8>> {
        if self.fail {
            return Err(AppError::Render("renderer crashed".to_owned()));
        }
        Ok(b"%PDF-1.7 test".to_vec())
    }
}
