//! Conversation ingestion pipeline
//!
//! Fetches every message of a thread and, per message, renders a rich body to
//! PDF and copies file attachments into the drive. Only the initial thread
//! fetch is fatal; every render, decode, or upload failure is recorded on the
//! artifact it belongs to and the rest of the thread carries on.
//!
//! Concurrency is structured: messages are processed through an
//! order-preserving `buffered` stream and each message joins all of its own
//! uploads before its result is built, so nothing outlives the call.
//!
//! Every message shares the thread folder, so attachment names are prefixed
//! with the message's 1-based position in the thread (`03 image001.png`) and
//! de-duplicated within a message. Re-ingesting an unchanged thread writes
//! the same names again.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, AppResult};
use crate::graph::{MailAttachment, MailMessage, ResourceProvider, sanitize_file_name};
use crate::mime;
use crate::models::{
    ArtifactKind, ArtifactSource, ConversationMessage, ConversationResult, UploadedItem,
};
use crate::render::DocumentRenderer;

/// Characters of the conversation id used for the destination folder
const FOLDER_PREFIX_CHARS: usize = 8;
/// Maximum preview characters echoed per message
const MAX_PREVIEW_CHARS: usize = 300;
/// Trailing id characters that distinguish body documents
const ID_TAG_CHARS: usize = 8;

/// Per-call ingestion settings
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Drive folder that per-thread folders are created under
    pub root_folder: String,
    /// Maximum messages processed at once
    pub concurrency: usize,
}

/// Ingest a conversation into the drive
///
/// # Errors
///
/// - Whatever `get_thread_messages` fails with (the only fatal step)
/// - `Cancelled` if `cancel` fires before all messages settle
pub async fn ingest_conversation(
    provider: &dyn ResourceProvider,
    renderer: &dyn DocumentRenderer,
    conversation_id: &str,
    options: &IngestOptions,
    cancel: &CancellationToken,
) -> AppResult<ConversationResult> {
    let messages = provider.get_thread_messages(conversation_id).await?;
    let folder = thread_folder(&options.root_folder, conversation_id);
    tracing::info!(
        messages = messages.len(),
        %folder,
        "ingesting conversation"
    );

    let jobs: Vec<_> = messages
        .iter()
        .enumerate()
        .map(|(index, message)| ingest_message(provider, renderer, &folder, index + 1, message))
        .collect();
    let work = stream::iter(jobs)
        .buffered(options.concurrency.max(1))
        .collect::<Vec<_>>();

    let results = tokio::select! {
        results = work => results,
        () = cancel.cancelled() => {
            tracing::info!("conversation ingestion abandoned: request cancelled");
            return Err(AppError::Cancelled);
        }
    };

    Ok(ConversationResult {
        conversation_id: conversation_id.to_owned(),
        count: results.len(),
        results,
    })
}

/// Destination folder for a thread: `<root>/<sanitized id prefix>`
pub fn thread_folder(root: &str, conversation_id: &str) -> String {
    let prefix: String = conversation_id
        .chars()
        .take(FOLDER_PREFIX_CHARS)
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '_' })
        .collect();
    let prefix = if prefix.is_empty() {
        "conversation".to_owned()
    } else {
        prefix
    };
    format!("{}/{prefix}", root.trim_matches('/'))
}

/// Process one message: body document first, then attachments in order
async fn ingest_message(
    provider: &dyn ResourceProvider,
    renderer: &dyn DocumentRenderer,
    folder: &str,
    position: usize,
    message: &MailMessage,
) -> ConversationMessage {
    let refetched = refetch_attachments(provider, message).await;
    let message = refetched.as_ref().unwrap_or(message);

    let body_upload = async {
        match &message.body {
            Some(body) if body.is_rich() => Some(
                upload_body_document(provider, renderer, folder, message, &body.content).await,
            ),
            _ => None,
        }
    };
    let eligible: Vec<&MailAttachment> = message
        .attachments
        .iter()
        .filter(|a| a.content_bytes.is_some())
        .collect();
    let names = attachment_upload_names(position, &eligible);
    let mut jobs = Vec::with_capacity(eligible.len());
    for (attachment, name) in eligible.into_iter().zip(names) {
        jobs.push(upload_attachment(provider, folder, attachment, name));
    }
    let attachment_uploads = join_all(jobs);

    let (body_result, attachment_results) = tokio::join!(body_upload, attachment_uploads);

    let mut uploads = Vec::with_capacity(attachment_results.len() + 1);
    uploads.extend(body_result);
    uploads.extend(attachment_results);

    ConversationMessage {
        id: message.id.clone(),
        subject: message.subject.clone(),
        from: message.from_address.clone(),
        received: message.received_rfc3339(),
        preview: message
            .preview
            .clone()
            .map(|p| mime::truncate_chars(p, MAX_PREVIEW_CHARS)),
        uploads,
    }
}

/// Full copy of a message whose listing omitted its attachments
///
/// Thread listings can flag `has_attachments` without expanding them. A failed
/// refetch keeps the listed copy; its attachments are then simply absent.
async fn refetch_attachments(
    provider: &dyn ResourceProvider,
    message: &MailMessage,
) -> Option<MailMessage> {
    if !message.has_attachments || !message.attachments.is_empty() {
        return None;
    }
    match provider.get_message(&message.id).await {
        Ok(full) => Some(full),
        Err(e) => {
            tracing::warn!(message_id = %message.id, error = %e, "attachment refetch failed");
            None
        }
    }
}

async fn upload_body_document(
    provider: &dyn ResourceProvider,
    renderer: &dyn DocumentRenderer,
    folder: &str,
    message: &MailMessage,
    html: &str,
) -> UploadedItem {
    let name = body_document_name(message);
    let mut source = ArtifactSource {
        kind: ArtifactKind::BodyDocument,
        name: name.clone(),
        content_type: Some("application/pdf".to_owned()),
        size: 0,
    };

    let prepared = mime::prepare_for_render(html, &message.attachments);
    let pdf = match renderer.render_html_to_pdf(&prepared).await {
        Ok(pdf) => pdf,
        Err(e) => {
            tracing::warn!(message_id = %message.id, error = %e, "body render failed");
            return UploadedItem::failed(source, format!("Failed to render message body: {e}"));
        }
    };
    source.size = pdf.len() as u64;

    match provider.upload_item(folder, &name, pdf).await {
        Ok(item) => UploadedItem::uploaded(source, item),
        Err(e) => {
            tracing::warn!(message_id = %message.id, error = %e, "body document upload failed");
            UploadedItem::failed(source, format!("Failed to upload to OneDrive: {e}"))
        }
    }
}

async fn upload_attachment(
    provider: &dyn ResourceProvider,
    folder: &str,
    attachment: &MailAttachment,
    upload_name: String,
) -> UploadedItem {
    let source = ArtifactSource {
        kind: ArtifactKind::Attachment,
        name: attachment.name.clone(),
        content_type: attachment.content_type.clone(),
        size: attachment.size,
    };

    let encoded = attachment.content_bytes.as_deref().unwrap_or_default();
    let bytes = match STANDARD.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(attachment_id = %attachment.id, error = %e, "attachment content is not base64");
            return UploadedItem::failed(source, format!("Attachment content is not valid base64: {e}"));
        }
    };

    match provider.upload_item(folder, &upload_name, bytes).await {
        Ok(item) => {
            tracing::debug!(attachment_id = %attachment.id, inline = attachment.is_inline, "attachment uploaded");
            UploadedItem::uploaded(source, item)
        }
        Err(e) => {
            tracing::warn!(attachment_id = %attachment.id, error = %e, "attachment upload failed");
            UploadedItem::failed(source, format!("Failed to upload to OneDrive: {e}"))
        }
    }
}

/// Drive names for one message's attachments
///
/// `<position> <sanitized name>`, with ` (2)`, ` (3)`, ... inserted before the
/// extension when a message carries the same name twice. Comparison ignores
/// case since the drive does.
fn attachment_upload_names(position: usize, attachments: &[&MailAttachment]) -> Vec<String> {
    let mut seen = HashSet::new();
    attachments
        .iter()
        .map(|attachment| {
            let base = sanitize_file_name(&attachment.name);
            let (stem, extension) = split_extension(&base);
            let mut candidate = format!("{position:02} {base}");
            let mut copy = 2;
            while !seen.insert(candidate.to_lowercase()) {
                candidate = format!("{position:02} {stem} ({copy}){extension}");
                copy += 1;
            }
            candidate
        })
        .collect()
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}

/// Stable PDF name: subject, received time, and a message id tag
///
/// Provider message ids share long mailbox prefixes, so the tag is taken from
/// the end of the id.
fn body_document_name(message: &MailMessage) -> String {
    let subject = message
        .subject
        .as_deref()
        .map(sanitize_file_name)
        .filter(|s| s != "attachment")
        .unwrap_or_else(|| "message".to_owned());
    let subject: String = subject.chars().take(80).collect();
    let subject = subject.trim_end();

    let alnum: Vec<char> = message.id.chars().filter(char::is_ascii_alphanumeric).collect();
    let tag: String = alnum[alnum.len().saturating_sub(ID_TAG_CHARS)..].iter().collect();
    let tag = if tag.is_empty() { "message".to_owned() } else { tag };

    match message.received_at {
        Some(at) => format!("{subject} {} {tag}.pdf", at.format("%Y%m%d-%H%M%S")),
        None => format!("{subject} {tag}.pdf"),
    }
}
